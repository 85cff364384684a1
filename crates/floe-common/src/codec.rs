use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, ErrorCode, Result};

/// Codec for RPC payloads.
///
/// JSON is the default; the enum leaves room for other formats. The codec is
/// chosen at node construction and never changes for the lifetime of the
/// node. HTTP RPC ignores it and always speaks JSON, because the
/// request/response `Content-Type` pins the format.
#[derive(Debug, Clone)]
pub enum Codec {
    Json(JsonCodec),
}

impl Codec {
    pub fn json() -> Self {
        Codec::Json(JsonCodec)
    }

    pub fn marshal<T: Serialize + ?Sized>(&self, v: &T) -> Result<Vec<u8>> {
        match self {
            Codec::Json(_) => JsonCodec::marshal(v),
        }
    }

    pub fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self {
            Codec::Json(_) => JsonCodec::unmarshal(data),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Codec::Json(_) => "json",
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Codec::json()
    }
}

/// The JSON codec backing [`Codec::Json`].
#[derive(Debug, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn marshal<T: Serialize + ?Sized>(v: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(v).map_err(|e| Error::wrap(ErrorCode::Codec, "marshal", e))
    }

    pub fn unmarshal<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        serde_json::from_slice(data).map_err(|e| Error::wrap(ErrorCode::Codec, "unmarshal", e))
    }
}
