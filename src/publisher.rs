use std::sync::Arc;

use crate::{PublishOptions, SourceClient, SourceResult};
use streambus_types::{BusErr, Fields, MessageId, StreamKey};

#[derive(Debug, Clone)]
/// A publish helper bound to one stream key.
pub struct Publisher {
    key: StreamKey,
    options: PublishOptions,
    client: Arc<dyn SourceClient>,
}

impl Publisher {
    pub(crate) fn new(key: StreamKey, options: PublishOptions, client: Arc<dyn SourceClient>) -> Self {
        Self {
            key,
            options,
            client,
        }
    }

    /// Append one message and return the id the source assigned to it.
    /// An empty body encodes to nothing and is refused.
    pub async fn publish(&self, fields: Fields) -> SourceResult<MessageId> {
        if fields.is_empty() {
            return Err(BusErr::EmptyPayload);
        }
        self.client.publish(&self.key, fields, &self.options).await
    }

    pub fn stream_key(&self) -> &StreamKey {
        &self.key
    }
}
