use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::{sink::Sink, SourceResult};
use streambus_types::Subscriber;

#[derive(Debug, Clone)]
/// The subscription entry point returned by
/// [`StreamContainer::subscribe`](crate::StreamContainer::subscribe).
/// Nothing is fetched until a subscriber is bound here.
pub struct Flow {
    sink: Sink,
}

#[derive(Debug)]
/// Handle to a live subscription. Dropping it does *not* cancel the
/// subscription; call [`Disposable::dispose`].
pub struct Disposable {
    sink: Mutex<Option<Sink>>,
}

impl Flow {
    pub(crate) fn new(sink: Sink) -> Self {
        Self { sink }
    }

    /// Bind `subscriber` and allow up to `parallelism` concurrent workers to
    /// drain the buffer. Fails if a subscriber is already bound.
    pub fn subscribe(
        &self,
        subscriber: Arc<dyn Subscriber>,
        parallelism: usize,
    ) -> SourceResult<Disposable> {
        self.sink.subscribe(subscriber, parallelism)?;
        Ok(Disposable {
            sink: Mutex::new(Some(self.sink.clone())),
        })
    }
}

impl Disposable {
    /// Cancel the subscription and drop the reference. Idempotent.
    pub fn dispose(&self) {
        if let Some(sink) = self
            .sink
            .lock()
            .expect("Disposable poisoned")
            .take()
        {
            sink.cancel();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.sink.lock().expect("Disposable poisoned").is_none()
    }

    /// Stop fetching for `duration`; buffered messages keep draining.
    /// A no-op once disposed.
    pub fn pause(&self, duration: Duration) {
        if let Some(sink) = &*self.sink.lock().expect("Disposable poisoned") {
            sink.pause(duration);
        }
    }
}
