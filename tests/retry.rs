// cargo test --test retry -- --nocapture
mod util;

use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::time::Instant;
use util::{payload, wait_for, MockSource};

use streambus::{ContainerOptions, ReadOptions, StreamContainer};
use streambus_types::{
    BoxError, RetryControl, RetryDirective, StreamKey, StreamMessage, StreamOffset, Subscriber,
};

/// Fails scripted messages a set number of times, then succeeds; every
/// failure applies the configured directive, or gives the message up when
/// there is none.
#[derive(Debug)]
struct Flaky {
    failures: Mutex<HashMap<u64, u32>>,
    log: Mutex<Vec<(u64, u32, Instant)>>,
    seen: Mutex<Vec<u64>>,
    directive: Option<RetryDirective>,
}

impl Flaky {
    fn new(failures: &[(u64, u32)], directive: RetryDirective) -> Self {
        Self::with(failures, Some(directive))
    }

    /// Never asks for a retry: every failure abandons its message.
    fn giving_up(failures: &[(u64, u32)]) -> Self {
        Self::with(failures, None)
    }

    fn with(failures: &[(u64, u32)], directive: Option<RetryDirective>) -> Self {
        Self {
            failures: Mutex::new(failures.iter().copied().collect()),
            log: Mutex::new(Vec::new()),
            seen: Mutex::new(Vec::new()),
            directive,
        }
    }

    fn seen(&self) -> Vec<u64> {
        self.seen.lock().unwrap().clone()
    }

    fn log(&self) -> Vec<(u64, u32, Instant)> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl Subscriber for Flaky {
    async fn on_message(&self, message: &StreamMessage) -> Result<(), BoxError> {
        let n = payload(message);
        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&n) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(format!("rejecting {n}").into());
                }
            }
        }
        self.seen.lock().unwrap().push(n);
        Ok(())
    }

    async fn on_failure(
        &self,
        _: BoxError,
        message: &StreamMessage,
        attempts: u32,
        retry: &mut RetryControl,
    ) {
        self.log
            .lock()
            .unwrap()
            .push((payload(message), attempts, Instant::now()));
        match self.directive {
            Some(RetryDirective::Retry { delay: None }) => retry.retry(),
            Some(RetryDirective::Retry { delay: Some(d) }) => retry.retry_after(d),
            Some(RetryDirective::Cancel) => retry.cancel(),
            Some(RetryDirective::Pause(d)) => retry.pause(d),
            None => (),
        }
    }
}

fn small_container(source: Arc<MockSource>) -> StreamContainer {
    let mut options = ContainerOptions::new();
    options.set_pull_interval(Duration::from_millis(10));
    StreamContainer::new(source, options)
}

#[tokio::test(flavor = "multi_thread")]
async fn delayed_retry_redelivers_the_same_message() -> anyhow::Result<()> {
    env_logger::builder().is_test(true).try_init().ok();

    let source = Arc::new(MockSource::default());
    let key = StreamKey::new("jobs")?;
    source.seed(&key, 1, 5);
    let container = small_container(source);

    let delay = Duration::from_millis(100);
    let subscriber = Arc::new(Flaky::new(
        &[(3, 2), (5, 1)],
        RetryDirective::Retry { delay: Some(delay) },
    ));
    let flow = container
        .subscribe(StreamOffset::earliest(key), ReadOptions::new())
        .await?;
    flow.subscribe(subscriber.clone(), 1)?;

    assert!(
        wait_for(|| subscriber.seen().len() == 5, Duration::from_secs(3)).await,
        "only {:?} arrived",
        subscriber.seen()
    );
    // the retried messages complete in place, so order is preserved
    assert_eq!(subscriber.seen(), [1, 2, 3, 4, 5]);

    let log = subscriber.log();
    let attempts: Vec<(u64, u32)> = log.iter().map(|(n, a, _)| (*n, *a)).collect();
    // two failures of 3, then — counter reset by the success of 3 and 4 —
    // the single failure of 5 starts over at attempt 1
    assert_eq!(attempts, [(3, 1), (3, 2), (5, 1)]);
    // the second delivery of 3 honored the requested delay
    let spacing = log[1].2 - log[0].2;
    assert!(spacing >= delay.mul_f32(0.8), "redelivered after {spacing:?}");

    container.close().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_directive_stops_the_subscription() -> anyhow::Result<()> {
    let source = Arc::new(MockSource::default());
    let key = StreamKey::new("jobs")?;
    source.seed(&key, 1, 5);
    let container = small_container(source);

    let subscriber = Arc::new(Flaky::new(&[(2, u32::MAX)], RetryDirective::Cancel));
    let flow = container
        .subscribe(StreamOffset::earliest(key), ReadOptions::new())
        .await?;
    flow.subscribe(subscriber.clone(), 1)?;

    assert!(wait_for(|| !subscriber.log().is_empty(), Duration::from_secs(2)).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    // 1 got through; the failure of 2 cancelled everything after it
    assert_eq!(subscriber.seen(), [1]);

    container.close().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn pause_directive_suspends_fetching() -> anyhow::Result<()> {
    let source = Arc::new(MockSource::default());
    let key = StreamKey::new("jobs")?;
    source.seed(&key, 1, 2);
    let container = small_container(source.clone());

    let pause = Duration::from_millis(250);
    let subscriber = Arc::new(Flaky::new(&[(1, 1)], RetryDirective::Pause(pause)));
    let flow = container
        .subscribe(StreamOffset::earliest(key.clone()), ReadOptions::new())
        .await?;
    flow.subscribe(subscriber.clone(), 1)?;

    assert!(wait_for(|| !subscriber.log().is_empty(), Duration::from_secs(2)).await);
    let paused_at = Instant::now();
    // the failed message is dropped (no retry was requested); buffered
    // messages keep draining while the fetch side is paused
    assert!(wait_for(|| subscriber.seen() == [2], Duration::from_secs(2)).await);

    // a message published mid-pause only arrives once the pause expires
    source.seed(&key, 3, 3);
    assert!(
        wait_for(|| subscriber.seen() == [2, 3], Duration::from_secs(2)).await,
        "got {:?}",
        subscriber.seen()
    );
    assert!(paused_at.elapsed() >= pause.mul_f32(0.8));

    container.close().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn giving_up_resets_the_attempt_counter() -> anyhow::Result<()> {
    let source = Arc::new(MockSource::default());
    let key = StreamKey::new("jobs")?;
    source.seed(&key, 1, 3);
    let container = small_container(source);

    // 1 and 2 each fail once and are abandoned; no retry is ever requested
    let subscriber = Arc::new(Flaky::giving_up(&[(1, 1), (2, 1)]));
    let flow = container
        .subscribe(StreamOffset::earliest(key), ReadOptions::new())
        .await?;
    flow.subscribe(subscriber.clone(), 1)?;

    assert!(
        wait_for(|| subscriber.seen() == [3], Duration::from_secs(2)).await,
        "got {:?}",
        subscriber.seen()
    );
    let attempts: Vec<(u64, u32)> = subscriber.log().iter().map(|(n, a, _)| (*n, *a)).collect();
    // abandoning 1 must not leak its attempt count into 2's first failure
    assert_eq!(attempts, [(1, 1), (2, 1)]);

    container.close().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn immediate_retry_is_not_repeated_unless_rearmed() -> anyhow::Result<()> {
    let source = Arc::new(MockSource::default());
    let key = StreamKey::new("jobs")?;
    source.seed(&key, 1, 3);
    let container = small_container(source);

    let subscriber = Arc::new(Flaky::new(&[(2, 3)], RetryDirective::Retry { delay: None }));
    let flow = container
        .subscribe(StreamOffset::earliest(key), ReadOptions::new())
        .await?;
    flow.subscribe(subscriber.clone(), 1)?;

    assert!(
        wait_for(|| subscriber.seen().len() == 3, Duration::from_secs(3)).await,
        "only {:?} arrived",
        subscriber.seen()
    );
    assert_eq!(subscriber.seen(), [1, 2, 3]);
    let attempts: Vec<(u64, u32)> = subscriber.log().iter().map(|(n, a, _)| (*n, *a)).collect();
    // each failure re-armed the retry once; the fourth delivery succeeded
    assert_eq!(attempts, [(2, 1), (2, 2), (2, 3)]);

    container.close().await;
    Ok(())
}
