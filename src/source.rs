use async_trait::async_trait;
use redis::{
    aio::ConnectionLike, cmd as command, streams::StreamReadOptions, Cmd, ErrorKind, Pipeline,
};
use std::{collections::HashSet, fmt::Debug, sync::Mutex, time::Duration};
use tokio::sync::Mutex as AsyncMutex;
use url::Url;

use crate::{
    connection::Lane, map_err, parse_message_id, string_from_redis_value, FetchParams,
    PublishOptions, RedisConnectOptions, SourceResult, StreamFetchReply,
};
use streambus_types::{
    BusErr, ConsumerId, Fields, GroupId, MessageId, StreamKey, StreamMessage, StreamPos,
};

#[derive(Debug, Clone)]
/// One fetch call against the source: a key, a position, and how to read.
pub struct FetchRequest {
    pub key: StreamKey,
    pub pos: StreamPos,
    pub count: usize,
    pub block: Option<Duration>,
    pub group: Option<(GroupId, ConsumerId)>,
    pub auto_ack: bool,
}

impl FetchRequest {
    pub(crate) fn new(
        key: StreamKey,
        pos: StreamPos,
        params: &FetchParams,
        group: Option<(GroupId, ConsumerId)>,
    ) -> Self {
        Self {
            key,
            pos,
            count: params.count,
            block: params.block,
            group,
            auto_ack: params.auto_ack,
        }
    }
}

/// The capabilities this engine needs from the external source client.
/// Everything else about the source (command surface, topology, TLS) stays
/// behind the implementation.
#[async_trait]
pub trait SourceClient: Debug + Send + Sync + 'static {
    /// Fetch one batch for one key, waiting up to `request.block` if set.
    async fn fetch(&self, request: &FetchRequest) -> SourceResult<Vec<StreamMessage>>;

    /// Queue every request, flush once, and return one reply per request in
    /// submission order.
    async fn fetch_batch(&self, requests: &[FetchRequest]) -> SourceResult<Vec<Vec<StreamMessage>>>;

    /// Fetch across many keys in a single call; replies are tagged with their
    /// source key. All requests share count / block / group parameters.
    async fn fetch_many(&self, requests: &[FetchRequest]) -> SourceResult<Vec<StreamMessage>>;

    /// Append a message, returning the source-assigned id.
    async fn publish(
        &self,
        key: &StreamKey,
        fields: Fields,
        options: &PublishOptions,
    ) -> SourceResult<MessageId>;

    /// Acknowledge messages previously delivered to a group consumer.
    async fn ack(&self, key: &StreamKey, group: &GroupId, ids: &[MessageId]) -> SourceResult<()>;

    /// Release the underlying resources. Must be idempotent.
    async fn close(&self) {}
}

#[derive(Debug)]
/// [`SourceClient`] over Redis Streams, built on the [`redis`] crate.
///
/// Holds two connections: one dedicated to blocking reads, so that an
/// `XREAD .. BLOCK` waiting out its duration cannot starve the pipelined
/// lane that serves non-blocking fetches, publishes and acks.
pub struct RedisSource {
    shared: AsyncMutex<Lane>,
    blocking: AsyncMutex<Lane>,
    groups: Mutex<HashSet<(String, String)>>,
}

impl RedisSource {
    pub async fn connect(url: Url, options: RedisConnectOptions) -> SourceResult<Self> {
        let shared = Lane::open(&url, &options).await?;
        let blocking = Lane::open(&url, &options).await?;
        Ok(Self {
            shared: AsyncMutex::new(shared),
            blocking: AsyncMutex::new(blocking),
            groups: Mutex::new(HashSet::new()),
        })
    }

    fn lane(&self, block: Option<Duration>) -> &AsyncMutex<Lane> {
        if block.is_some() {
            &self.blocking
        } else {
            &self.shared
        }
    }

    /// `XGROUP CREATE` once per (key, group); `BUSYGROUP` from concurrent
    /// creators is fine. `MKSTREAM` lets a subscription be installed before
    /// the first publish touches the key.
    async fn ensure_group(
        &self,
        conn: &mut redis::aio::Connection,
        request: &FetchRequest,
    ) -> SourceResult<()> {
        let Some((group, _)) = &request.group else {
            return Ok(());
        };
        let entry = (request.key.name().to_owned(), group.name().to_owned());
        {
            let groups = self.groups.lock().expect("Group set poisoned");
            if groups.contains(&entry) {
                return Ok(());
            }
        }
        let mut cmd = command("XGROUP");
        cmd.arg("CREATE")
            .arg(request.key.name())
            .arg(group.name())
            .arg(match request.pos {
                StreamPos::Earliest => "0".to_owned(),
                StreamPos::Latest => "$".to_owned(),
                StreamPos::After(id) => id.to_string(),
            })
            .arg("MKSTREAM");
        match conn.req_packed_command(&cmd).await {
            Ok(_) => (),
            Err(err) if err.code() == Some("BUSYGROUP") => (),
            Err(err) => return Err(map_err(err)),
        }
        self.groups
            .lock()
            .expect("Group set poisoned")
            .insert(entry);
        Ok(())
    }
}

#[async_trait]
impl SourceClient for RedisSource {
    async fn fetch(&self, request: &FetchRequest) -> SourceResult<Vec<StreamMessage>> {
        let mut conn = self.lane(request.block).lock().await;
        let inner = conn.get().await?;
        self.ensure_group(inner, request).await?;
        let cmd = read_command(std::slice::from_ref(request));
        match inner.req_packed_command(&cmd).await {
            Ok(value) => Ok(StreamFetchReply::from_redis_value(value)
                .map_err(BusErr::Backend)?
                .messages),
            Err(err) => {
                if err.kind() == ErrorKind::IoError {
                    conn.reconnect();
                }
                Err(map_err(err))
            }
        }
    }

    async fn fetch_batch(
        &self,
        requests: &[FetchRequest],
    ) -> SourceResult<Vec<Vec<StreamMessage>>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.shared.lock().await;
        let inner = conn.get().await?;
        for request in requests {
            self.ensure_group(inner, request).await?;
        }
        let mut pipe = Pipeline::with_capacity(requests.len());
        for request in requests {
            pipe.add_command(read_command(std::slice::from_ref(request)));
        }
        match inner.req_packed_commands(&pipe, 0, requests.len()).await {
            Ok(values) => {
                let mut replies = Vec::with_capacity(values.len());
                for value in values {
                    replies.push(
                        StreamFetchReply::from_redis_value(value)
                            .map_err(BusErr::Backend)?
                            .messages,
                    );
                }
                Ok(replies)
            }
            Err(err) => {
                if err.kind() == ErrorKind::IoError {
                    conn.reconnect();
                }
                Err(map_err(err))
            }
        }
    }

    async fn fetch_many(&self, requests: &[FetchRequest]) -> SourceResult<Vec<StreamMessage>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let block = requests[0].block;
        let mut conn = self.lane(block).lock().await;
        let inner = conn.get().await?;
        let cmd = read_command(requests);
        match inner.req_packed_command(&cmd).await {
            Ok(value) => Ok(StreamFetchReply::from_redis_value(value)
                .map_err(BusErr::Backend)?
                .messages),
            Err(err) => {
                if err.kind() == ErrorKind::IoError {
                    conn.reconnect();
                }
                Err(map_err(err))
            }
        }
    }

    async fn publish(
        &self,
        key: &StreamKey,
        fields: Fields,
        options: &PublishOptions,
    ) -> SourceResult<MessageId> {
        let mut cmd = command("XADD");
        cmd.arg(key.name());
        if let Some(maxlen) = options.maxlen() {
            cmd.arg("MAXLEN").arg("~").arg(maxlen);
        }
        cmd.arg("*");
        for (field, value) in fields.iter() {
            cmd.arg(field).arg(value);
        }
        let mut conn = self.shared.lock().await;
        let inner = conn.get().await?;
        match inner.req_packed_command(&cmd).await {
            Ok(value) => {
                let id = string_from_redis_value(value).map_err(BusErr::Backend)?;
                parse_message_id(&id).map_err(BusErr::Backend)
            }
            Err(err) => {
                if err.kind() == ErrorKind::IoError {
                    conn.reconnect();
                }
                Err(map_err(err))
            }
        }
    }

    async fn ack(&self, key: &StreamKey, group: &GroupId, ids: &[MessageId]) -> SourceResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut cmd = command("XACK");
        cmd.arg(key.name()).arg(group.name());
        for id in ids {
            cmd.arg(id.to_string());
        }
        let mut conn = self.shared.lock().await;
        let inner = conn.get().await?;
        match inner.req_packed_command(&cmd).await {
            Ok(_) => Ok(()),
            Err(err) => {
                if err.kind() == ErrorKind::IoError {
                    conn.reconnect();
                }
                Err(map_err(err))
            }
        }
    }

    async fn close(&self) {
        self.shared.lock().await.shutdown();
        self.blocking.lock().await.shutdown();
        log::debug!("RedisSource closed");
    }
}

/// Build one `XREAD` / `XREADGROUP` across every given request.
/// All requests must agree on count / block / group mode.
fn read_command(requests: &[FetchRequest]) -> Cmd {
    let first = &requests[0];
    let mut opts = StreamReadOptions::default().count(first.count);
    if let Some(block) = first.block {
        opts = opts.block(block.as_millis() as usize);
    }
    if let Some((group, consumer)) = &first.group {
        opts = opts.group(group.name(), consumer.id());
        if first.auto_ack {
            opts = opts.noack();
        }
    }
    let mut cmd = command(if first.group.is_some() {
        "XREADGROUP"
    } else {
        "XREAD"
    });
    cmd.arg(&opts).arg("STREAMS");
    for request in requests {
        cmd.arg(request.key.name());
    }
    for request in requests {
        if request.group.is_some() {
            // groups always ask for new deliveries; the server tracks the rest
            cmd.arg(">");
        } else {
            match request.pos {
                StreamPos::Earliest => cmd.arg("0-0"),
                StreamPos::Latest => cmd.arg("$"),
                StreamPos::After(id) => cmd.arg(id.to_string()),
            };
        }
    }
    cmd
}
