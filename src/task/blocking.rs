use async_trait::async_trait;
use std::sync::Arc;

use super::{dispatch, StreamInfo, StreamTask};
use crate::{SourceClient, SourceResult};

#[derive(Debug)]
/// Issues one fetch-and-wait call per stream, sequentially. Blocking fetches
/// are never batched together: a long wait on one stream must not hold up
/// another stream's round trip on a shared lane.
pub(crate) struct BlockingPullTask {
    client: Arc<dyn SourceClient>,
    streams: Vec<StreamInfo>,
}

impl BlockingPullTask {
    pub(crate) fn new(client: Arc<dyn SourceClient>) -> Self {
        Self {
            client,
            streams: Vec::new(),
        }
    }

    fn sweep(&mut self) {
        // the only garbage-collection path for finished subscriptions
        self.streams.retain(|info| !info.sink.is_cancelled());
    }
}

#[async_trait]
impl StreamTask for BlockingPullTask {
    fn add(&mut self, info: StreamInfo) -> SourceResult<()> {
        self.streams.push(info);
        Ok(())
    }

    async fn pull(&mut self) {
        self.sweep();
        for info in self.streams.iter_mut() {
            if !info.eligible() {
                continue;
            }
            let request = info.request();
            match self.client.fetch(&request).await {
                Ok(messages) => dispatch(info, messages),
                Err(err) => info.sink.error(err),
            }
        }
    }
}
