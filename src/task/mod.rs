mod batched;
mod blocking;
mod merged;

pub(crate) use batched::*;
pub(crate) use blocking::*;
pub(crate) use merged::*;

use async_trait::async_trait;
use flume::{Receiver, Sender};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{sink::Sink, FetchParams, FetchRequest, SourceResult};
use streambus_types::{ConsumerId, GroupId, StreamMessage, StreamOffset};

#[derive(Debug)]
/// Binds one subscription to its source key, read cursor and fetch
/// parameters. Owned exclusively by the pull task driving it; only
/// [`dispatch`] moves the cursor.
pub(crate) struct StreamInfo {
    pub fetch: FetchParams,
    pub offset: StreamOffset,
    pub sink: Sink,
    pub group: Option<(GroupId, ConsumerId)>,
}

impl StreamInfo {
    pub(crate) fn request(&self) -> FetchRequest {
        FetchRequest::new(
            self.offset.key().clone(),
            self.offset.pos(),
            &self.fetch,
            self.group.clone(),
        )
    }

    /// Worth fetching for: live, subscribed, not paused, and with room to
    /// accept a batch.
    pub(crate) fn eligible(&self) -> bool {
        !self.sink.is_cancelled() && !self.sink.is_not_ready() && !self.sink.is_not_enough_space()
    }
}

#[derive(Debug)]
pub(crate) enum TaskCmd {
    /// Register a stream; the receipt reports contract violations back to the
    /// subscribe call site.
    Add(Box<StreamInfo>, Sender<SourceResult<()>>),
    /// Run one fetch-and-dispatch cycle.
    Pull,
}

/// One pull strategy. A closed set of three implementations, selected once at
/// subscribe time. Sink workers are driven by the container on a separate
/// cycle, so a fetch waiting out its block duration cannot stall them.
#[async_trait]
pub(crate) trait StreamTask: Send {
    fn add(&mut self, info: StreamInfo) -> SourceResult<()>;

    async fn pull(&mut self);
}

/// Drive a pull task from its command channel until every sender is gone.
/// `busy` is raised by the trigger before a Pull is sent and lowered here
/// once the cycle completes, so cycles never pile up.
pub(crate) async fn run_task<T: StreamTask>(
    mut task: T,
    cmds: Receiver<TaskCmd>,
    busy: Arc<AtomicBool>,
    name: &str,
) {
    while let Ok(cmd) = cmds.recv_async().await {
        match cmd {
            TaskCmd::Add(info, receipt) => {
                receipt.try_send(task.add(*info)).ok();
            }
            TaskCmd::Pull => {
                task.pull().await;
                busy.store(false, Ordering::Release);
            }
        }
    }
    log::debug!("{name} pull task exit");
}

/// Shared dispatch policy: offer messages in fetched order, stop at the first
/// rejection, and advance the cursor only past the accepted prefix. A
/// rejected message is fetched again next cycle rather than skipped.
pub(crate) fn dispatch(info: &mut StreamInfo, messages: Vec<StreamMessage>) {
    for message in messages {
        let id = message.id();
        if info.sink.next(message) {
            info.offset.advance(id);
        } else {
            log::trace!(
                "`{}` full; will refetch after {:?}",
                info.offset.key(),
                info.offset.pos()
            );
            break;
        }
    }
}
