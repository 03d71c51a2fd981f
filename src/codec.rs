//! Per-format encoding of table values.

use log::error;
use serde_json::Value;

use crate::error::Result;

/// On-disk format of a table store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistFormat {
    /// Readable structured text (JSON).
    Json,
    /// Compact binary (MessagePack), for large snapshots rewritten often.
    MsgPack,
    /// Opaque interchange text produced by a caller-side transform.
    M3u,
}

impl PersistFormat {
    /// File extension used for table files in this format.
    pub fn extension(self) -> &'static str {
        match self {
            PersistFormat::Json => "json",
            PersistFormat::MsgPack => "msgpack",
            PersistFormat::M3u => "m3u",
        }
    }

    /// Codec implementing this format.
    pub fn codec(self) -> &'static dyn TableCodec {
        match self {
            PersistFormat::Json => &JsonCodec,
            PersistFormat::MsgPack => &MsgPackCodec,
            PersistFormat::M3u => &M3uTextCodec,
        }
    }
}

/// Converts table values to and from file payloads.
pub trait TableCodec: Send + Sync {
    fn encode(&self, value: &Value) -> Result<Vec<u8>>;
    /// Decodes a present payload. Empty payloads are valid and decode to the
    /// format's empty value, which is distinct from a missing file.
    fn decode(&self, bytes: &[u8]) -> Result<Value>;
}

pub struct JsonCodec;

impl TableCodec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}

pub struct MsgPackCodec;

impl TableCodec for MsgPackCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Byte-level passthrough for text a transform already rendered.
pub struct M3uTextCodec;

impl TableCodec for M3uTextCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        let text = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        Ok(text.into_bytes())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        Ok(Value::String(String::from_utf8(bytes.to_vec())?))
    }
}

/// Encodes for saving. Never fails: on codec failure the error is logged and
/// an empty payload is substituted.
pub fn encode_or_empty(format: PersistFormat, table: &str, value: &Value) -> Vec<u8> {
    match format.codec().encode(value) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(
                "Failed to encode table. table={} format={:?} error={}",
                table, format, err
            );
            Vec::new()
        }
    }
}
