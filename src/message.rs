use redis::Value;
use streambus_types::{Fields, MessageHeader, MessageId, StreamKey, StreamMessage};

use crate::SourceErr;

/// Parse a source-assigned id of the form `millis-seq`.
pub fn parse_message_id(id: &str) -> Result<MessageId, SourceErr> {
    id.parse().map_err(|_| SourceErr::MessageId(id.to_owned()))
}

#[derive(Debug)]
/// The messages of one fetch round trip, tagged with their stream keys,
/// in fetched order.
pub struct StreamFetchReply {
    pub messages: Vec<StreamMessage>,
}

// bulk(bulk(string-data('"my_stream_1"'), bulk(bulk(string-data('"1678280595282-0"'), bulk(field, value, ...)), ...)))
impl StreamFetchReply {
    /// Like [`redis::FromRedisValue`], but taking ownership instead of copying.
    pub fn from_redis_value(value: Value) -> Result<Self, SourceErr> {
        let mut messages = Vec::new();

        // A Nil reply means no stream had anything new.
        if let Value::Nil = value {
            return Ok(StreamFetchReply { messages });
        }

        let Value::Bulk(streams) = value else {
            return Err(err("expected an array of streams"));
        };
        for stream in streams {
            let Value::Bulk(pair) = stream else {
                return Err(err("expected a [key, entries] pair"));
            };
            if pair.len() != 2 {
                return Err(err("expected a [key, entries] pair"));
            }
            let mut pair = pair.into_iter();
            let key = string_from_redis_value(pair.next().expect("len checked"))?;
            let stream_key =
                StreamKey::new(key).map_err(|_| err("stream key fails validation"))?;
            let Value::Bulk(entries) = pair.next().expect("len checked") else {
                return Err(err("expected an array of entries"));
            };
            for entry in entries {
                let Value::Bulk(pair) = entry else {
                    return Err(err("expected an [id, fields] pair"));
                };
                if pair.len() != 2 {
                    return Err(err("expected an [id, fields] pair"));
                }
                let mut pair = pair.into_iter();
                let id = string_from_redis_value(pair.next().expect("len checked"))?;
                let id = parse_message_id(&id)?;
                let Value::Bulk(values) = pair.next().expect("len checked") else {
                    return Err(err("expected a flat field-value array"));
                };
                if values.len() % 2 != 0 {
                    return Err(err("odd number of field-value items"));
                }
                let pairs = values.len() / 2;
                let mut values = values.into_iter();
                let mut fields = Vec::with_capacity(pairs);
                for _ in 0..pairs {
                    let field = string_from_redis_value(values.next().expect("len checked"))?;
                    let value = bytes_from_redis_value(values.next().expect("len checked"))?;
                    fields.push((field, value));
                }
                messages.push(StreamMessage::new(
                    MessageHeader::new(stream_key.clone(), id),
                    fields.into_iter().collect::<Fields>(),
                ));
            }
        }

        Ok(StreamFetchReply { messages })
    }
}

fn err(detail: &str) -> SourceErr {
    SourceErr::FetchReply(detail.to_owned())
}

pub(crate) fn string_from_redis_value(v: Value) -> Result<String, SourceErr> {
    match v {
        Value::Data(bytes) => {
            String::from_utf8(bytes).map_err(|e| SourceErr::TypeError(e.to_string()))
        }
        Value::Okay => Ok("OK".to_owned()),
        Value::Status(val) => Ok(val),
        _ => Err(SourceErr::TypeError("Value not String".to_owned())),
    }
}

pub(crate) fn bytes_from_redis_value(v: Value) -> Result<Vec<u8>, SourceErr> {
    match v {
        Value::Data(bytes) => Ok(bytes),
        _ => Err(SourceErr::TypeError("Value not Data".to_owned())),
    }
}
