use std::str::Utf8Error;

use crate::{MessageId, StreamKey, Timestamp};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
/// The body of a message: an ordered field → value mapping.
/// Field order is preserved exactly as fetched.
pub struct Fields {
    entries: Vec<(String, Vec<u8>)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Metadata associated with a message.
pub struct MessageHeader {
    stream_key: StreamKey,
    id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One message fetched from the source. Immutable once constructed.
pub struct StreamMessage {
    header: MessageHeader,
    fields: Fields,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F: Into<String>, V: Into<Vec<u8>>>(mut self, field: F, value: V) -> Self {
        self.entries.push((field.into(), value.into()));
        self
    }

    /// The value of the first field with this name, if any.
    pub fn get(&self, field: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_slice())
    }

    pub fn get_str(&self, field: &str) -> Option<Result<&str, Utf8Error>> {
        self.get(field).map(std::str::from_utf8)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Vec<u8>)> for Fields {
    fn from_iter<I: IntoIterator<Item = (String, Vec<u8>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl MessageHeader {
    pub fn new(stream_key: StreamKey, id: MessageId) -> Self {
        Self { stream_key, id }
    }

    pub fn stream_key(&self) -> &StreamKey {
        &self.stream_key
    }

    pub fn id(&self) -> MessageId {
        self.id
    }
}

impl StreamMessage {
    pub fn new(header: MessageHeader, fields: Fields) -> Self {
        Self { header, fields }
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn stream_key(&self) -> &StreamKey {
        self.header.stream_key()
    }

    pub fn id(&self) -> MessageId {
        self.header.id()
    }

    /// The wall-clock instant the source assigned to this message, if the
    /// id encodes a representable one.
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.header.id().timestamp()
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn take(self) -> (MessageHeader, Fields) {
        let Self { header, fields } = self;
        (header, fields)
    }
}
