use flume::Sender;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};

use crate::{
    sink::{Sink, SinkConfig},
    task::{
        run_task, BatchedPullTask, BlockingPullTask, MergedPullTask, StreamInfo, StreamTask,
        TaskCmd,
    },
    ContainerOptions, Flow, PublishOptions, Publisher, ReadOptions, SourceClient, SourceResult,
};
use streambus_types::{BusErr, ConsumerId, GroupId, MessageId, StreamKey, StreamOffset};

#[derive(Debug)]
/// Owns the pull strategies and the periodic triggers that drive them, and
/// hands out subscriptions and publishers over one source client.
///
/// All scheduled work runs on the injected runtime; closing the container
/// cancels the scheduled jobs and releases the client asynchronously.
pub struct StreamContainer {
    client: Arc<dyn SourceClient>,
    options: ContainerOptions,
    runtime: Handle,
    blocking: TaskEndpoint,
    batched: TaskEndpoint,
    merged: TaskEndpoint,
    sinks: Arc<Mutex<Vec<Sink>>>,
    jobs: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

#[derive(Debug, Clone)]
struct TaskEndpoint {
    cmds: Sender<TaskCmd>,
    busy: Arc<AtomicBool>,
}

impl TaskEndpoint {
    /// Submit one pull cycle, unless the previous one has not completed yet.
    fn trigger_pull(&self) {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            && self.cmds.try_send(TaskCmd::Pull).is_err()
        {
            self.busy.store(false, Ordering::Release);
        }
    }
}

impl StreamContainer {
    /// Spawn the pull-task loops and the two trigger jobs. The container is
    /// live immediately; it does nothing until streams are subscribed.
    pub fn new(client: Arc<dyn SourceClient>, options: ContainerOptions) -> Self {
        let runtime = options
            .runtime()
            .cloned()
            .unwrap_or_else(Handle::current);
        let mut jobs = Vec::new();
        let blocking = endpoint(
            BlockingPullTask::new(client.clone()),
            &runtime,
            "blocking",
            &mut jobs,
        );
        let batched = endpoint(
            BatchedPullTask::new(client.clone()),
            &runtime,
            "batched",
            &mut jobs,
        );
        let merged = endpoint(
            MergedPullTask::new(client.clone()),
            &runtime,
            "merged",
            &mut jobs,
        );

        let endpoints = [blocking.clone(), batched.clone(), merged.clone()];
        let pull_interval = options.pull_interval();
        jobs.push(runtime.spawn(async move {
            let mut tick = interval(pull_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                for endpoint in &endpoints {
                    endpoint.trigger_pull();
                }
            }
        }));
        // drive sink workers at twice the fetch cadence, independent of the
        // pull tasks, so a fetch waiting out its block duration cannot stall
        // worker revival
        let sinks: Arc<Mutex<Vec<Sink>>> = Arc::new(Mutex::new(Vec::new()));
        jobs.push(runtime.spawn({
            let sinks = sinks.clone();
            async move {
                let mut tick = interval(pull_interval / 2);
                tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tick.tick().await;
                    let mut sinks = sinks.lock().expect("Sink registry poisoned");
                    sinks.retain(|sink| !sink.is_cancelled());
                    for sink in sinks.iter() {
                        sink.run();
                    }
                }
            }
        }));

        Self {
            client,
            options,
            runtime,
            blocking,
            batched,
            merged,
            sinks,
            jobs: Mutex::new(jobs),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a subscription starting at `offset` and return its [`Flow`].
    /// Fetching begins once a subscriber is bound to the flow.
    pub async fn subscribe(
        &self,
        offset: StreamOffset,
        options: ReadOptions,
    ) -> SourceResult<Flow> {
        self.subscribe_inner(offset, options, None).await
    }

    /// Like [`StreamContainer::subscribe`], reading as `consumer` within
    /// `group`. Deliveries are tracked by the source per group.
    pub async fn subscribe_group(
        &self,
        offset: StreamOffset,
        options: ReadOptions,
        group: GroupId,
        consumer: ConsumerId,
    ) -> SourceResult<Flow> {
        self.subscribe_inner(offset, options, Some((group, consumer)))
            .await
    }

    async fn subscribe_inner(
        &self,
        offset: StreamOffset,
        options: ReadOptions,
        group: Option<(GroupId, ConsumerId)>,
    ) -> SourceResult<Flow> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusErr::Closed);
        }
        let sink = Sink::new(
            SinkConfig {
                batch_size: options.batch_size(),
                buffer_factor: options.buffer_factor(),
                pause_interval: self.options.pause_interval(),
            },
            self.runtime.clone(),
        );
        let info = StreamInfo {
            fetch: options.fetch_params(),
            offset,
            sink: sink.clone(),
            group: group.clone(),
        };
        // strategy is chosen here, once; it never switches at runtime
        let endpoint = if group.is_none()
            && options.fetch_params() == self.options.shared_fetch_params()
        {
            &self.merged
        } else if options.block().is_some() {
            &self.blocking
        } else {
            &self.batched
        };
        let (receipt, confirmed) = flume::bounded(1);
        endpoint
            .cmds
            .send(TaskCmd::Add(Box::new(info), receipt))
            .map_err(|_| BusErr::Closed)?;
        match confirmed.recv_async().await {
            Ok(result) => result?,
            Err(_) => return Err(BusErr::Closed),
        }
        self.sinks
            .lock()
            .expect("Sink registry poisoned")
            .push(sink.clone());
        Ok(Flow::new(sink))
    }

    /// A publish helper bound to `key`.
    pub fn publisher(&self, key: StreamKey, options: PublishOptions) -> Publisher {
        Publisher::new(key, options, self.client.clone())
    }

    /// Acknowledge messages consumed on behalf of `group`.
    pub async fn ack(
        &self,
        key: &StreamKey,
        group: &GroupId,
        ids: &[MessageId],
    ) -> SourceResult<()> {
        self.client.ack(key, group, ids).await
    }

    /// Cancel every scheduled job and release the source client. Idempotent;
    /// in-progress message handling is allowed to finish on its own.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let jobs = std::mem::take(&mut *self.jobs.lock().expect("Container jobs poisoned"));
        for job in jobs {
            job.abort();
        }
        self.client.close().await;
        log::debug!("Container closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn endpoint<T: StreamTask + 'static>(
    task: T,
    runtime: &Handle,
    name: &'static str,
    jobs: &mut Vec<JoinHandle<()>>,
) -> TaskEndpoint {
    let (cmds, receiver) = flume::unbounded();
    let busy = Arc::new(AtomicBool::new(false));
    jobs.push(runtime.spawn(run_task(task, receiver, busy.clone(), name)));
    TaskEndpoint { cmds, busy }
}
