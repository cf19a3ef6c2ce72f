//! Raw driver replies to application values.
//!
//! Used where the reply shape is not known up front: transaction and pipeline
//! results, and raw commands queued in a batch.

use redis::Value as Reply;
use rkv_common::{Codec, Value};
use serde_json::{Map, Number};

use crate::error::{ClientError, ClientResult};

/// Converts one reply, recursing into arrays, sets and maps.
///
/// Bulk strings go through the codec; integers, doubles and booleans map to
/// their JSON counterparts. A server error embedded in the reply is returned
/// as `ClientError::Command`.
pub fn decode_reply(codec: &Codec, reply: Reply) -> ClientResult<Value> {
    match reply {
        Reply::Nil => Ok(Value::Null),
        Reply::Int(n) => Ok(Value::from(n)),
        Reply::BulkString(bytes) => Ok(codec.decode(Some(bytes.as_slice()))),
        Reply::SimpleString(text) => Ok(Value::String(text)),
        Reply::Okay => Ok(Value::String("OK".to_string())),
        Reply::Double(n) => Ok(Number::from_f64(n).map_or(Value::Null, Value::Number)),
        Reply::Boolean(flag) => Ok(Value::Bool(flag)),
        Reply::VerbatimString { text, .. } => Ok(codec.decode_str(&text)),
        Reply::Array(items) | Reply::Set(items) => items
            .into_iter()
            .map(|item| decode_reply(codec, item))
            .collect::<ClientResult<Vec<_>>>()
            .map(Value::Array),
        Reply::Map(pairs) => {
            let mut object = Map::with_capacity(pairs.len());
            for (key, value) in pairs {
                object.insert(map_key(key), decode_reply(codec, value)?);
            }
            Ok(Value::Object(object))
        }
        Reply::ServerError(err) => Err(ClientError::Command(format!("{err:?}"))),
        _ => Ok(Value::Null),
    }
}

fn map_key(key: Reply) -> String {
    match key {
        Reply::BulkString(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Reply::SimpleString(text) => text,
        Reply::Int(n) => n.to_string(),
        other => format!("{other:?}"),
    }
}
