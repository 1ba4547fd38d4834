use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};

use super::{dispatch, StreamInfo, StreamTask};
use crate::{FetchRequest, SourceClient, SourceResult};
use streambus_types::{BusErr, StreamKey, StreamMessage};

#[derive(Debug)]
/// Collapses every stream sharing the container's fetch parameters into one
/// multi-key fetch per cycle, demultiplexing the single reply back to per-key
/// sinks. Only for non-group subscriptions; each key can carry at most one
/// live subscription here.
pub(crate) struct MergedPullTask {
    client: Arc<dyn SourceClient>,
    streams: HashMap<StreamKey, StreamInfo>,
}

impl MergedPullTask {
    pub(crate) fn new(client: Arc<dyn SourceClient>) -> Self {
        Self {
            client,
            streams: HashMap::new(),
        }
    }

    fn sweep(&mut self) {
        self.streams.retain(|_, info| !info.sink.is_cancelled());
    }
}

#[async_trait]
impl StreamTask for MergedPullTask {
    /// Registering a second live subscription for a key is a contract
    /// violation; a cancelled one is replaced transparently.
    fn add(&mut self, info: StreamInfo) -> SourceResult<()> {
        let key = info.offset.key().clone();
        if let Some(existing) = self.streams.get(&key) {
            if !existing.sink.is_cancelled() {
                return Err(BusErr::SubscriptionConflict(key));
            }
        }
        self.streams.insert(key, info);
        Ok(())
    }

    async fn pull(&mut self) {
        self.sweep();
        let requests: Vec<FetchRequest> = self
            .streams
            .values()
            .filter(|info| info.eligible())
            .map(|info| info.request())
            .collect();
        if requests.is_empty() {
            return;
        }
        match self.client.fetch_many(&requests).await {
            Ok(messages) => {
                let mut by_key: HashMap<StreamKey, Vec<StreamMessage>> = HashMap::new();
                for message in messages {
                    by_key
                        .entry(message.stream_key().clone())
                        .or_default()
                        .push(message);
                }
                for (key, batch) in by_key {
                    match self.streams.get_mut(&key) {
                        Some(info) => dispatch(info, batch),
                        None => log::warn!("Dropping messages for unknown stream `{key}`"),
                    }
                }
            }
            Err(err) => {
                for request in &requests {
                    if let Some(info) = self.streams.get(&request.key) {
                        info.sink.error(err.clone());
                    }
                }
            }
        }
    }
}
