use std::time::Duration;
use tokio::runtime::Handle;

/// Maximum number of messages to fetch from the source in one request.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// How often the container triggers a fetch cycle.
pub const DEFAULT_PULL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on a single worker nap while its sink is paused.
pub const DEFAULT_PAUSE_INTERVAL: Duration = Duration::from_secs(1);

/// Sink capacity = batch size × buffer factor.
pub const DEFAULT_BUFFER_FACTOR: usize = 2;

#[derive(Debug, Clone)]
/// Container-wide configuration. The batch size and block duration here are
/// also the shared fetch parameters of the merged pull strategy.
pub struct ContainerOptions {
    pull_interval: Duration,
    batch_size: usize,
    block: Option<Duration>,
    pause_interval: Duration,
    buffer_factor: usize,
    runtime: Option<Handle>,
}

#[derive(Debug, Clone)]
/// Per-subscription read configuration.
pub struct ReadOptions {
    batch_size: usize,
    block: Option<Duration>,
    auto_ack: bool,
    buffer_factor: usize,
}

#[derive(Debug, Default, Clone)]
/// Options applied when publishing a message.
pub struct PublishOptions {
    maxlen: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The fetch parameters of one subscription, as sent to the source.
pub struct FetchParams {
    pub count: usize,
    pub block: Option<Duration>,
    pub auto_ack: bool,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            pull_interval: DEFAULT_PULL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            block: None,
            pause_interval: DEFAULT_PAUSE_INTERVAL,
            buffer_factor: DEFAULT_BUFFER_FACTOR,
            runtime: None,
        }
    }
}

impl ContainerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// How often each pull strategy is triggered. Sink workers are driven at
    /// half this interval. Cannot be zero.
    pub fn set_pull_interval(&mut self, v: Duration) -> &mut Self {
        assert!(!v.is_zero());
        self.pull_interval = v;
        self
    }
    pub fn pull_interval(&self) -> Duration {
        self.pull_interval
    }

    /// Maximum number of messages fetched per stream per cycle. A larger N
    /// reduces round trips but holds more messages in memory. Cannot be `0`.
    pub fn set_batch_size(&mut self, v: usize) -> &mut Self {
        assert_ne!(v, 0);
        self.batch_size = v;
        self
    }
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Block duration of the shared (merged) fetch. `None` means fetches
    /// return immediately.
    pub fn set_block(&mut self, v: Option<Duration>) -> &mut Self {
        self.block = v;
        self
    }
    pub fn block(&self) -> Option<Duration> {
        self.block
    }

    /// Upper bound on how long a paused worker naps before re-checking
    /// cancellation. Cannot be zero.
    pub fn set_pause_interval(&mut self, v: Duration) -> &mut Self {
        assert!(!v.is_zero());
        self.pause_interval = v;
        self
    }
    pub fn pause_interval(&self) -> Duration {
        self.pause_interval
    }

    /// Sink capacity as a multiple of the batch size. The soft refill
    /// threshold stays at one batch, so a larger factor leaves more headroom
    /// for in-flight retries. Must be at least 2.
    pub fn set_buffer_factor(&mut self, v: usize) -> &mut Self {
        assert!(v >= 2);
        self.buffer_factor = v;
        self
    }
    pub fn buffer_factor(&self) -> usize {
        self.buffer_factor
    }

    /// The runtime that scheduled jobs, pulls and sink workers are spawned
    /// onto. If unset, the runtime current at container construction is used.
    pub fn set_runtime(&mut self, v: Handle) -> &mut Self {
        self.runtime = Some(v);
        self
    }
    pub fn runtime(&self) -> Option<&Handle> {
        self.runtime.as_ref()
    }

    pub(crate) fn shared_fetch_params(&self) -> FetchParams {
        FetchParams {
            count: self.batch_size,
            block: self.block,
            auto_ack: true,
        }
    }
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            block: None,
            auto_ack: true,
            buffer_factor: DEFAULT_BUFFER_FACTOR,
        }
    }
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of messages fetched for this subscription per cycle.
    /// The sink buffer is sized to `batch_size × buffer_factor`. Cannot be `0`.
    pub fn set_batch_size(&mut self, v: usize) -> &mut Self {
        assert_ne!(v, 0);
        self.batch_size = v;
        self
    }
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// How long one fetch may wait for messages to arrive. Requesting a block
    /// routes the subscription to the blocking pull strategy.
    pub fn set_block(&mut self, v: Option<Duration>) -> &mut Self {
        self.block = v;
        self
    }
    pub fn block(&self) -> Option<Duration> {
        self.block
    }

    /// Only relevant to group subscriptions: acknowledge messages as soon as
    /// they are fetched. Turn this off to ack explicitly via the container.
    pub fn set_auto_ack(&mut self, v: bool) -> &mut Self {
        self.auto_ack = v;
        self
    }
    pub fn auto_ack(&self) -> bool {
        self.auto_ack
    }

    /// See [`ContainerOptions::set_buffer_factor`].
    pub fn set_buffer_factor(&mut self, v: usize) -> &mut Self {
        assert!(v >= 2);
        self.buffer_factor = v;
        self
    }
    pub fn buffer_factor(&self) -> usize {
        self.buffer_factor
    }

    pub(crate) fn fetch_params(&self) -> FetchParams {
        FetchParams {
            count: self.batch_size,
            block: self.block,
            auto_ack: self.auto_ack,
        }
    }
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trim the stream to approximately this many entries on publish
    /// (`MAXLEN ~`). `None` means the stream is never trimmed here.
    pub fn set_maxlen(&mut self, v: Option<usize>) -> &mut Self {
        self.maxlen = v;
        self
    }
    pub fn maxlen(&self) -> Option<usize> {
        self.maxlen
    }
}
