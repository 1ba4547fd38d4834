#![allow(dead_code)]

use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use streambus::{FetchRequest, PublishOptions, SourceClient, SourceErr, SourceResult};
use streambus_types::{
    BoxError, BusErr, ConsumerId, Fields, GroupId, MessageHeader, MessageId, RetryControl,
    StreamKey, StreamMessage, StreamPos, Subscriber, SubscriptionControl,
};

/// An in-memory source: messages are scripted per key, ids are `n-0`, and
/// fetches observe the same cursor semantics as the real thing.
#[derive(Debug, Default)]
pub struct MockSource {
    streams: Mutex<HashMap<String, Vec<StreamMessage>>>,
    group_cursors: Mutex<HashMap<(String, String), MessageId>>,
    acked: Mutex<Vec<(String, String, MessageId)>>,
    pub fetch_calls: AtomicUsize,
    pub batch_calls: AtomicUsize,
    pub many_calls: AtomicUsize,
    pub fail_fetches: AtomicBool,
}

#[allow(dead_code)]
impl MockSource {
    pub fn seed(&self, key: &StreamKey, from: u64, to: u64) {
        let mut streams = self.streams.lock().unwrap();
        let entries = streams.entry(key.name().to_owned()).or_default();
        for n in from..=to {
            entries.push(message(key, n));
        }
    }

    pub fn acked(&self) -> Vec<(String, String, MessageId)> {
        self.acked.lock().unwrap().clone()
    }

    fn read(&self, request: &FetchRequest) -> Vec<StreamMessage> {
        let streams = self.streams.lock().unwrap();
        let Some(entries) = streams.get(request.key.name()) else {
            return Vec::new();
        };
        if let Some((group, _)) = &request.group {
            // deliveries are tracked server-side per group
            let mut cursors = self.group_cursors.lock().unwrap();
            let cursor = cursors
                .entry((request.key.name().to_owned(), group.name().to_owned()))
                .or_insert(MessageId::new(0, 0));
            let batch: Vec<_> = entries
                .iter()
                .filter(|m| m.id() > *cursor)
                .take(request.count)
                .cloned()
                .collect();
            if let Some(last) = batch.last() {
                *cursor = last.id();
            }
            return batch;
        }
        match request.pos {
            StreamPos::Latest => Vec::new(),
            StreamPos::Earliest => entries.iter().take(request.count).cloned().collect(),
            StreamPos::After(id) => entries
                .iter()
                .filter(|m| m.id() > id)
                .take(request.count)
                .cloned()
                .collect(),
        }
    }

    fn check(&self) -> SourceResult<()> {
        if self.fail_fetches.load(Ordering::SeqCst) {
            Err(BusErr::Backend(SourceErr::IoError(
                "mock outage".to_owned(),
            )))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SourceClient for MockSource {
    async fn fetch(&self, request: &FetchRequest) -> SourceResult<Vec<StreamMessage>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.read(request))
    }

    async fn fetch_batch(
        &self,
        requests: &[FetchRequest],
    ) -> SourceResult<Vec<Vec<StreamMessage>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(requests.iter().map(|request| self.read(request)).collect())
    }

    async fn fetch_many(&self, requests: &[FetchRequest]) -> SourceResult<Vec<StreamMessage>> {
        self.many_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(requests
            .iter()
            .flat_map(|request| self.read(request))
            .collect())
    }

    async fn publish(
        &self,
        key: &StreamKey,
        fields: Fields,
        _: &PublishOptions,
    ) -> SourceResult<MessageId> {
        let mut streams = self.streams.lock().unwrap();
        let entries = streams.entry(key.name().to_owned()).or_default();
        let id = MessageId::new(
            entries.last().map(|m| m.id().millis + 1).unwrap_or(1),
            0,
        );
        entries.push(StreamMessage::new(
            MessageHeader::new(key.clone(), id),
            fields,
        ));
        Ok(id)
    }

    async fn ack(&self, key: &StreamKey, group: &GroupId, ids: &[MessageId]) -> SourceResult<()> {
        let mut acked = self.acked.lock().unwrap();
        for id in ids {
            acked.push((key.name().to_owned(), group.name().to_owned(), *id));
        }
        Ok(())
    }
}

pub fn message(key: &StreamKey, n: u64) -> StreamMessage {
    StreamMessage::new(
        MessageHeader::new(key.clone(), MessageId::new(n, 0)),
        Fields::new().push("n", n.to_string()),
    )
}

pub fn payload(message: &StreamMessage) -> u64 {
    message
        .fields()
        .get_str("n")
        .expect("field `n` missing")
        .expect("field `n` not utf-8")
        .parse()
        .expect("field `n` not a number")
}

/// Collects everything it is given, optionally slowly.
#[derive(Debug, Default)]
pub struct Collector {
    seen: Mutex<Vec<u64>>,
    pub source_errors: AtomicUsize,
    pub delay: Option<Duration>,
}

#[allow(dead_code)]
impl Collector {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn seen(&self) -> Vec<u64> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Subscriber for Collector {
    async fn on_message(&self, message: &StreamMessage) -> Result<(), BoxError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.seen.lock().unwrap().push(payload(message));
        Ok(())
    }

    fn on_source_error(&self, _: BoxError, _: &dyn SubscriptionControl) {
        self.source_errors.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_failure(&self, _: BoxError, _: &StreamMessage, _: u32, _: &mut RetryControl) {}
}

#[allow(dead_code)]
pub async fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

#[allow(dead_code)]
pub fn group() -> (GroupId, ConsumerId) {
    (GroupId::new("workers"), ConsumerId::new("worker-1"))
}
