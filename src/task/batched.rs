use async_trait::async_trait;
use std::sync::Arc;

use super::{dispatch, StreamInfo, StreamTask};
use crate::{FetchRequest, SourceClient, SourceResult};

#[derive(Debug)]
/// Gathers every eligible stream's fetch into a single pipelined round trip:
/// N streams, one flush, instead of N round trips.
pub(crate) struct BatchedPullTask {
    client: Arc<dyn SourceClient>,
    streams: Vec<StreamInfo>,
}

impl BatchedPullTask {
    pub(crate) fn new(client: Arc<dyn SourceClient>) -> Self {
        Self {
            client,
            streams: Vec::new(),
        }
    }

    fn sweep(&mut self) {
        self.streams.retain(|info| !info.sink.is_cancelled());
    }
}

#[async_trait]
impl StreamTask for BatchedPullTask {
    fn add(&mut self, info: StreamInfo) -> SourceResult<()> {
        self.streams.push(info);
        Ok(())
    }

    async fn pull(&mut self) {
        self.sweep();
        let mut picked = Vec::new();
        let mut requests: Vec<FetchRequest> = Vec::new();
        for (index, info) in self.streams.iter().enumerate() {
            if info.eligible() {
                picked.push(index);
                requests.push(info.request());
            }
        }
        if requests.is_empty() {
            return;
        }
        match self.client.fetch_batch(&requests).await {
            Ok(replies) => {
                // one reply per request, in submission order
                for (index, messages) in picked.into_iter().zip(replies) {
                    dispatch(&mut self.streams[index], messages);
                }
            }
            Err(err) => {
                // the whole round trip failed; no offset moves
                for index in picked {
                    self.streams[index].sink.error(err.clone());
                }
            }
        }
    }
}
