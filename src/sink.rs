use flume::Receiver;
use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, Weak,
    },
    time::Duration,
};
use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::{sleep, Instant},
};

use crate::{SourceErr, SourceResult};
use streambus_types::{
    BoxError, BusErr, RetryControl, RetryDirective, StreamMessage, Subscriber, SubscriptionControl,
};

#[derive(Debug, Clone, Copy)]
pub(crate) struct SinkConfig {
    pub batch_size: usize,
    pub buffer_factor: usize,
    pub pause_interval: Duration,
}

impl SinkConfig {
    /// Hard capacity of the buffer.
    pub fn capacity(&self) -> usize {
        self.batch_size * self.buffer_factor
    }

    /// Soft cutoff: skip fetching once this many messages are queued,
    /// leaving headroom for in-flight retries.
    pub fn refill_threshold(&self) -> usize {
        self.batch_size
    }
}

#[derive(Debug, Clone)]
/// The bounded buffer and consumer-worker orchestrator behind one
/// subscription. Created unready; bound to a subscriber exactly once;
/// cancelled exactly once.
pub(crate) struct Sink {
    core: Arc<SinkCore>,
}

#[derive(Debug)]
pub(crate) struct SinkCore {
    config: SinkConfig,
    runtime: Handle,
    cancelled: AtomicBool,
    pause: Mutex<Option<Pause>>,
    state: Mutex<SinkState>,
}

#[derive(Debug, Clone, Copy)]
struct Pause {
    until: Instant,
    nap: Duration,
}

enum SinkState {
    Unready,
    Ready(Ready),
    Cancelled,
}

struct Ready {
    subscriber: Arc<dyn Subscriber>,
    queue: flume::Sender<StreamMessage>,
    workers: Vec<Arc<ConsumeWorker>>,
    slots: Vec<Option<JoinHandle<()>>>,
}

impl Debug for SinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unready => f.debug_tuple("Unready").finish(),
            Self::Ready(ready) => f
                .debug_struct("Ready")
                .field("queued", &ready.queue.len())
                .field("workers", &ready.workers.len())
                .finish(),
            Self::Cancelled => f.debug_tuple("Cancelled").finish(),
        }
    }
}

impl Sink {
    pub(crate) fn new(config: SinkConfig, runtime: Handle) -> Self {
        Self {
            core: Arc::new(SinkCore {
                config,
                runtime,
                cancelled: AtomicBool::new(false),
                pause: Mutex::new(None),
                state: Mutex::new(SinkState::Unready),
            }),
        }
    }

    /// Bind the subscriber and allocate the buffer and `parallelism` workers,
    /// without starting them. Errors if a subscriber is already bound; a
    /// silent no-op if the sink was cancelled first.
    pub(crate) fn subscribe(
        &self,
        subscriber: Arc<dyn Subscriber>,
        parallelism: usize,
    ) -> SourceResult<()> {
        assert_ne!(parallelism, 0);
        if self.is_cancelled() {
            return Ok(());
        }
        let mut state = self.core.state.lock().expect("Sink state poisoned");
        match &*state {
            // cancel may have won the race since the check above
            SinkState::Cancelled => Ok(()),
            SinkState::Ready(_) => Err(BusErr::AlreadySubscribed),
            SinkState::Unready => {
                let (queue, feed) = flume::bounded(self.core.config.capacity());
                let workers = (0..parallelism)
                    .map(|_| {
                        Arc::new(ConsumeWorker::new(
                            Arc::downgrade(&self.core),
                            feed.clone(),
                            subscriber.clone(),
                        ))
                    })
                    .collect();
                let slots = (0..parallelism).map(|_| None).collect();
                *state = SinkState::Ready(Ready {
                    subscriber,
                    queue,
                    workers,
                    slots,
                });
                Ok(())
            }
        }
    }

    /// Try to enqueue one message. `false` signals backpressure: the buffer
    /// is full (or the sink is not live) and the fetch path must not advance
    /// its offset past the previous message.
    pub(crate) fn next(&self, message: StreamMessage) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let state = self.core.state.lock().expect("Sink state poisoned");
        match &*state {
            SinkState::Ready(ready) => ready.queue.try_send(message).is_ok(),
            _ => false,
        }
    }

    /// Forward an upstream (fetch-side) failure to the subscriber, if the
    /// sink is still live.
    pub(crate) fn error(&self, error: BusErr<SourceErr>) {
        let subscriber = {
            let state = self.core.state.lock().expect("Sink state poisoned");
            match &*state {
                SinkState::Ready(ready) => Some(ready.subscriber.clone()),
                _ => None,
            }
        };
        if let Some(subscriber) = subscriber {
            if !self.is_cancelled() {
                let error: BoxError = Box::new(error);
                subscriber.on_source_error(error, &*self.core);
            }
        }
    }

    pub(crate) fn pause(&self, duration: Duration) {
        self.core.pause(duration);
    }

    pub(crate) fn cancel(&self) {
        self.core.cancel();
    }

    /// (Re)start any worker whose previous pass has completed, keeping up to
    /// `parallelism` workers live. Called periodically by the container's
    /// drive trigger.
    pub(crate) fn run(&self) {
        if self.is_cancelled() {
            return;
        }
        let mut state = self.core.state.lock().expect("Sink state poisoned");
        let SinkState::Ready(ready) = &mut *state else {
            return;
        };
        for (worker, slot) in ready.workers.iter().zip(ready.slots.iter_mut()) {
            if slot.as_ref().map_or(true, |task| task.is_finished()) {
                let worker = worker.clone();
                *slot = Some(self.core.runtime.spawn(worker.run()));
            }
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.core.cancelled.load(Ordering::Acquire)
    }

    /// No subscriber bound yet, or paused: the fetch path skips this sink.
    pub(crate) fn is_not_ready(&self) -> bool {
        if self.core.is_paused() {
            return true;
        }
        let state = self.core.state.lock().expect("Sink state poisoned");
        !matches!(&*state, SinkState::Ready(_))
    }

    /// Soft occupancy check, distinct from the hard capacity enforced by
    /// [`Sink::next`].
    pub(crate) fn is_not_enough_space(&self) -> bool {
        let state = self.core.state.lock().expect("Sink state poisoned");
        match &*state {
            SinkState::Ready(ready) => ready.queue.len() >= self.core.config.refill_threshold(),
            _ => true,
        }
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        let state = self.core.state.lock().expect("Sink state poisoned");
        match &*state {
            SinkState::Ready(ready) => ready.queue.len(),
            _ => 0,
        }
    }
}

impl SinkCore {
    /// Terminal and idempotent. Running workers observe the flag and exit
    /// within one loop iteration; nothing is interrupted preemptively.
    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.state.lock().expect("Sink state poisoned");
        // drops buffer, workers and subscriber
        *state = SinkState::Cancelled;
        log::debug!("Sink cancelled");
    }

    fn pause(&self, duration: Duration) {
        let mut pause = self.pause.lock().expect("Sink pause poisoned");
        *pause = Some(Pause {
            until: Instant::now() + duration,
            nap: duration.min(self.config.pause_interval),
        });
    }

    fn is_paused(&self) -> bool {
        let mut pause = self.pause.lock().expect("Sink pause poisoned");
        match *pause {
            Some(p) if Instant::now() < p.until => true,
            Some(_) => {
                // expired
                *pause = None;
                false
            }
            None => false,
        }
    }

    fn nap(&self) -> Duration {
        let pause = self.pause.lock().expect("Sink pause poisoned");
        match *pause {
            Some(p) => p.nap,
            None => self.config.pause_interval,
        }
    }
}

impl SubscriptionControl for SinkCore {
    fn cancel(&self) {
        SinkCore::cancel(self)
    }

    fn pause(&self, duration: Duration) {
        SinkCore::pause(self, duration)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// One worker slot of a sink. Lives for the sink's lifetime; its retry state
/// survives across passes.
pub(crate) struct ConsumeWorker {
    sink: Weak<SinkCore>,
    feed: Receiver<StreamMessage>,
    subscriber: Arc<dyn Subscriber>,
    retry: Mutex<RetryState>,
}

#[derive(Debug, Default)]
struct RetryState {
    armed: bool,
    delay: Option<Duration>,
    pending: Option<StreamMessage>,
    attempts: u32,
}

impl Debug for ConsumeWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumeWorker")
            .field("retry", &self.retry)
            .finish()
    }
}

impl ConsumeWorker {
    fn new(
        sink: Weak<SinkCore>,
        feed: Receiver<StreamMessage>,
        subscriber: Arc<dyn Subscriber>,
    ) -> Self {
        Self {
            sink,
            feed,
            subscriber,
            retry: Mutex::new(RetryState::default()),
        }
    }

    fn retry_armed(&self) -> bool {
        self.retry.lock().expect("Retry state poisoned").armed
    }

    /// One pass: loop until the buffer is exhausted, the sink is gone, or a
    /// pause empties out. Failures never escape the pass; the next drive
    /// trigger revives the worker.
    pub(crate) async fn run(self: Arc<Self>) {
        let Some(sink) = self.sink.upgrade() else {
            return;
        };
        loop {
            if sink.is_cancelled() {
                break;
            }
            if sink.is_paused() {
                if self.feed.is_empty() && !self.retry_armed() {
                    break;
                }
                // drain slowly while paused
                sleep(sink.nap()).await;
                if sink.is_cancelled() {
                    break;
                }
            }
            if self.retry_armed() {
                self.retry_pass(&sink).await;
                continue;
            }
            let Ok(message) = self.feed.try_recv() else {
                break;
            };
            self.deliver(&sink, message).await;
        }
    }

    async fn deliver(&self, sink: &SinkCore, message: StreamMessage) {
        if let Err(error) = self.subscriber.on_message(&message).await {
            let attempts = {
                let mut retry = self.retry.lock().expect("Retry state poisoned");
                retry.pending = Some(message.clone());
                retry.attempts += 1;
                retry.attempts
            };
            log::debug!(
                "Message {} of `{}` failed on attempt {attempts}",
                message.id(),
                message.stream_key()
            );
            self.failed(sink, error, &message, attempts).await;
        }
    }

    /// Redeliver the pending message. The armed flag is cleared up front, so
    /// a further retry only happens if the failure handler re-arms it.
    async fn retry_pass(&self, sink: &SinkCore) {
        let (message, delay) = {
            let mut retry = self.retry.lock().expect("Retry state poisoned");
            retry.armed = false;
            (retry.pending.clone(), retry.delay.take())
        };
        let Some(message) = message else {
            return;
        };
        if let Some(delay) = delay {
            sleep(delay).await;
            if sink.is_cancelled() {
                return;
            }
        }
        match self.subscriber.on_message(&message).await {
            Ok(()) => {
                let mut retry = self.retry.lock().expect("Retry state poisoned");
                retry.pending = None;
                retry.attempts = 0;
            }
            Err(error) => {
                let attempts = {
                    let mut retry = self.retry.lock().expect("Retry state poisoned");
                    retry.attempts += 1;
                    retry.attempts
                };
                self.failed(sink, error, &message, attempts).await;
            }
        }
    }

    /// Ask the failure handler what to do, then apply its directive.
    async fn failed(&self, sink: &SinkCore, error: BoxError, message: &StreamMessage, attempts: u32) {
        let mut control = RetryControl::new();
        self.subscriber
            .on_failure(error, message, attempts, &mut control)
            .await;
        match control.directive() {
            Some(RetryDirective::Retry { delay }) => {
                let mut retry = self.retry.lock().expect("Retry state poisoned");
                retry.armed = true;
                retry.delay = delay;
            }
            Some(RetryDirective::Cancel) => {
                self.drop_pending();
                sink.cancel();
            }
            Some(RetryDirective::Pause(duration)) => {
                self.drop_pending();
                sink.pause(duration);
            }
            None => self.drop_pending(),
        }
    }

    /// Abandon the pending message. The attempt counter starts over: it
    /// counts deliveries of one message since the last success, never
    /// across distinct messages.
    fn drop_pending(&self) {
        let mut retry = self.retry.lock().expect("Retry state poisoned");
        retry.pending = None;
        retry.delay = None;
        retry.attempts = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    fn message(millis: u64) -> StreamMessage {
        use streambus_types::{Fields, MessageHeader, MessageId, StreamKey};
        StreamMessage::new(
            MessageHeader::new(StreamKey::new("unit").unwrap(), MessageId::new(millis, 0)),
            Fields::new().push("n", millis.to_string()),
        )
    }

    fn config(batch_size: usize) -> SinkConfig {
        SinkConfig {
            batch_size,
            buffer_factor: 2,
            pause_interval: Duration::from_millis(20),
        }
    }

    #[derive(Debug, Default)]
    struct Quiet {
        seen: AtomicU32,
    }

    #[async_trait]
    impl Subscriber for Quiet {
        async fn on_message(&self, _: &StreamMessage) -> Result<(), BoxError> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_failure(
            &self,
            _: BoxError,
            _: &StreamMessage,
            _: u32,
            _: &mut RetryControl,
        ) {
        }
    }

    #[tokio::test]
    async fn backpressure_at_capacity() {
        let sink = Sink::new(config(2), Handle::current());
        sink.subscribe(Arc::new(Quiet::default()), 1).unwrap();
        // capacity = batch 2 × factor 2 = 4
        for millis in 1..=4 {
            assert!(sink.next(message(millis)));
        }
        assert!(sink.is_not_enough_space());
        assert!(!sink.next(message(5)));
        assert_eq!(sink.queued(), 4);
    }

    #[tokio::test]
    async fn soft_threshold_trips_before_capacity() {
        let sink = Sink::new(config(2), Handle::current());
        sink.subscribe(Arc::new(Quiet::default()), 1).unwrap();
        assert!(sink.next(message(1)));
        assert!(!sink.is_not_enough_space());
        assert!(sink.next(message(2)));
        assert!(sink.is_not_enough_space());
        // soft cutoff reached, yet the hard capacity still accepts
        assert!(sink.next(message(3)));
    }

    #[tokio::test]
    async fn double_subscribe_fails() {
        let sink = Sink::new(config(2), Handle::current());
        sink.subscribe(Arc::new(Quiet::default()), 1).unwrap();
        assert!(matches!(
            sink.subscribe(Arc::new(Quiet::default()), 1),
            Err(BusErr::AlreadySubscribed)
        ));
    }

    #[tokio::test]
    async fn subscribe_after_cancel_is_a_no_op() {
        let sink = Sink::new(config(2), Handle::current());
        sink.cancel();
        sink.subscribe(Arc::new(Quiet::default()), 1).unwrap();
        assert!(sink.is_not_ready());
        assert!(!sink.next(message(1)));
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let sink = Sink::new(config(2), Handle::current());
        sink.subscribe(Arc::new(Quiet::default()), 2).unwrap();
        sink.cancel();
        sink.cancel();
        assert!(sink.is_cancelled());
    }

    #[tokio::test]
    async fn workers_drain_the_buffer() {
        let sink = Sink::new(config(4), Handle::current());
        let subscriber = Arc::new(Quiet::default());
        sink.subscribe(subscriber.clone(), 2).unwrap();
        for millis in 1..=6 {
            assert!(sink.next(message(millis)));
        }
        sink.run();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(subscriber.seen.load(Ordering::SeqCst), 6);
        assert_eq!(sink.queued(), 0);
    }

    #[tokio::test]
    async fn paused_sink_still_drains() {
        let sink = Sink::new(config(4), Handle::current());
        let subscriber = Arc::new(Quiet::default());
        sink.subscribe(subscriber.clone(), 1).unwrap();
        for millis in 1..=3 {
            assert!(sink.next(message(millis)));
        }
        sink.pause(Duration::from_millis(200));
        assert!(sink.is_not_ready());
        sink.run();
        tokio::time::sleep(Duration::from_millis(150)).await;
        // one message per nap while paused
        assert!(subscriber.seen.load(Ordering::SeqCst) >= 2);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!sink.is_not_ready());
        sink.run();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(subscriber.seen.load(Ordering::SeqCst), 3);
    }
}
