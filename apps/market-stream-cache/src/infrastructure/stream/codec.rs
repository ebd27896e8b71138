//! Frame Codecs
//!
//! Exchanges send JSON text frames, except Huobi which gzips every frame
//! into a binary message. Both codecs treat an empty (or all-whitespace)
//! frame as an empty object so keep-alive noise never fails a session.

use std::io::Read;

use flate2::read::GzDecoder;
use serde_json::{Map, Value};

use crate::application::ports::DecodeError;

/// Plain JSON frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a raw frame.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Json`] if the frame is not valid JSON.
    pub fn decode(&self, raw: &[u8]) -> Result<Value, DecodeError> {
        let trimmed = raw.trim_ascii();
        if trimmed.is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        Ok(serde_json::from_slice(trimmed)?)
    }
}

/// Gzip-compressed JSON frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct GzipJsonCodec {
    json: JsonCodec,
}

impl GzipJsonCodec {
    /// Create a new gzip codec.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            json: JsonCodec::new(),
        }
    }

    /// Inflate and decode a raw frame.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Decompress`] for corrupt gzip data and
    /// [`DecodeError::Json`] if the inflated payload is not JSON.
    pub fn decode(&self, raw: &[u8]) -> Result<Value, DecodeError> {
        if raw.is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        let mut inflated = Vec::with_capacity(raw.len() * 4);
        GzDecoder::new(raw).read_to_end(&mut inflated)?;
        self.json.decode(&inflated)
    }
}
