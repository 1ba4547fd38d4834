use async_trait::async_trait;
use std::time::Duration;

use crate::{BoxError, StreamMessage};

/// Cancel / pause surface of a live subscription, handed to fetch-side error
/// callbacks. Both operations are idempotent and cooperative: running message
/// handlers are allowed to finish.
pub trait SubscriptionControl: Send + Sync {
    fn cancel(&self);

    fn pause(&self, duration: Duration);

    fn is_cancelled(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What a failure handler asked the engine to do with the failed message.
pub enum RetryDirective {
    /// Redeliver the message, after the delay if one is set.
    Retry { delay: Option<Duration> },
    /// Cancel the whole subscription.
    Cancel,
    /// Pause the whole subscription for the given duration.
    Pause(Duration),
}

#[derive(Debug, Default)]
/// The retry-capable control surface passed to [`Subscriber::on_failure`].
/// Calling none of its methods drops the failed message.
/// The last call wins.
pub struct RetryControl {
    directive: Option<RetryDirective>,
}

impl RetryControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Redeliver the failed message on the worker's next pass.
    pub fn retry(&mut self) {
        self.directive = Some(RetryDirective::Retry { delay: None });
    }

    /// Redeliver the failed message after `delay`.
    pub fn retry_after(&mut self, delay: Duration) {
        self.directive = Some(RetryDirective::Retry {
            delay: Some(delay),
        });
    }

    /// Give up and cancel the whole subscription.
    pub fn cancel(&mut self) {
        self.directive = Some(RetryDirective::Cancel);
    }

    /// Pause the whole subscription; buffered messages keep draining.
    pub fn pause(&mut self, duration: Duration) {
        self.directive = Some(RetryDirective::Pause(duration));
    }

    pub fn directive(&self) -> Option<RetryDirective> {
        self.directive
    }
}

/// The callback surface of a subscription. One subscriber serves one sink for
/// the sink's whole lifetime; its methods may be invoked concurrently from
/// multiple worker tasks.
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    /// Deliver one message. Returning an error routes the message and the
    /// error into [`Subscriber::on_failure`].
    async fn on_message(&self, message: &StreamMessage) -> Result<(), BoxError>;

    /// An upstream (fetch-side) failure scoped to this subscription.
    /// The subscription stays live unless this handler cancels it.
    fn on_source_error(&self, error: BoxError, subscription: &dyn SubscriptionControl) {
        let _ = (error, subscription);
    }

    /// A message failed to be consumed. `attempts` counts deliveries of the
    /// pending message since the last success. Direct the engine through
    /// `retry`; doing nothing drops the message.
    async fn on_failure(
        &self,
        error: BoxError,
        message: &StreamMessage,
        attempts: u32,
        retry: &mut RetryControl,
    );
}
