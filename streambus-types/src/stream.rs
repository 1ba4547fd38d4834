use std::{fmt::Display, str::FromStr, sync::Arc};
pub use time::OffsetDateTime as Timestamp;

use crate::StreamKeyErr;

/// Maximum string length of a stream key.
pub const MAX_STREAM_KEY_LEN: usize = 249;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// Identifies a stream within the source.
pub struct StreamKey {
    name: Arc<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// A source-assigned message id: milliseconds since the unix epoch plus a
/// sub-millisecond sequence number. Monotonic within one stream key.
pub struct MessageId {
    pub millis: u64,
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Identifies a position in a stream.
pub enum StreamPos {
    Earliest,
    Latest,
    /// Strictly after the given id.
    After(MessageId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The read cursor of one subscription: a stream key and a position within it.
pub struct StreamOffset {
    key: StreamKey,
    pos: StreamPos,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// Used to identify a group of consumers.
pub struct GroupId {
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// Used to identify a consumer within a group.
pub struct ConsumerId {
    id: String,
}

impl StreamKey {
    pub fn new<S: Into<String>>(key: S) -> Result<Self, StreamKeyErr> {
        let key = key.into();
        if is_valid_stream_key(key.as_str()) {
            Ok(Self {
                name: Arc::new(key),
            })
        } else {
            Err(StreamKeyErr::InvalidStreamKey)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl MessageId {
    pub const fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    /// The wall-clock instant encoded in the id, or `None` if `millis` falls
    /// outside the representable calendar.
    pub fn timestamp(&self) -> Option<Timestamp> {
        Timestamp::from_unix_timestamp_nanos(self.millis as i128 * 1_000_000).ok()
    }
}

impl StreamOffset {
    pub fn new(key: StreamKey, pos: StreamPos) -> Self {
        Self { key, pos }
    }

    /// Start from the next message to arrive.
    pub fn latest(key: StreamKey) -> Self {
        Self::new(key, StreamPos::Latest)
    }

    /// Start from the beginning of the stream.
    pub fn earliest(key: StreamKey) -> Self {
        Self::new(key, StreamPos::Earliest)
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn pos(&self) -> StreamPos {
        self.pos
    }

    /// Move the cursor past `id`. The cursor never moves backwards.
    pub fn advance(&mut self, id: MessageId) {
        if let StreamPos::After(cur) = self.pos {
            if id <= cur {
                return;
            }
        }
        self.pos = StreamPos::After(id);
    }
}

impl GroupId {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ConsumerId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for StreamKey {
    type Err = StreamKeyErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamKey::new(s)
    }
}

impl FromStr for MessageId {
    type Err = StreamKeyErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((millis, seq)) = s.split_once('-') {
            if let (Ok(millis), Ok(seq)) = (millis.parse(), seq.parse()) {
                return Ok(MessageId::new(millis, seq));
            }
        }
        Err(StreamKeyErr::InvalidMessageId)
    }
}

pub fn is_valid_stream_key(s: &str) -> bool {
    !s.is_empty() && s.len() <= MAX_STREAM_KEY_LEN && s.chars().all(is_valid_stream_key_char)
}

/// Returns true if this character can be used in a stream key.
pub fn is_valid_stream_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}
