//! Payload codec: transport-safe text encoding for call arguments and
//! return values.
//!
//! Values are binary-serialized as JSON bytes and then base64-encoded, so
//! the result is a single printable-ASCII token that can sit verbatim
//! inside a fenced block of a generated script without terminating the
//! block early. The runner on the other side of the process boundary can
//! decode it with nothing but its standard library.
//!
//! Two markers distinguish the encodings:
//!
//! - `b64json:` is the value itself, JSON bytes, base64-encoded
//! - `b64ref:` is a locator record pointing into the local content store,
//!   used when a value is large enough to proxy (see [`store`])

use crate::error::{DispatchError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub mod store;
#[cfg(test)]
mod tests;

pub use store::{ContentStore, Locator};

/// Marker prefix for directly embedded payloads.
pub const MARKER_DIRECT: &str = "b64json:";

/// Marker prefix for content-store locator records.
pub const MARKER_LOCATOR: &str = "b64ref:";

/// Options controlling one encode call.
#[derive(Debug, Clone, Default)]
pub struct EncodeOptions {
    /// Maximum encoded size in bytes; exceeding it fails with
    /// `PayloadTooLarge` before any submission.
    pub size_limit: Option<usize>,

    /// When set, values whose direct encoding exceeds the threshold are
    /// written to the content store and replaced by a locator record.
    pub proxy: Option<ProxyPolicy>,
}

/// Policy for proxying large values through the content store.
#[derive(Debug, Clone)]
pub struct ProxyPolicy {
    pub store: ContentStore,
    /// Encoded-size threshold in bytes above which a value is proxied.
    pub threshold: usize,
}

/// Encode a value as a single transport-safe text token.
pub fn encode<T: Serialize>(value: &T) -> Result<String> {
    encode_with(value, &EncodeOptions::default())
}

/// Encode a value, applying a size limit and/or proxy policy.
pub fn encode_with<T: Serialize>(value: &T, options: &EncodeOptions) -> Result<String> {
    let raw = serde_json::to_vec(value)
        .map_err(|e| DispatchError::Serialization(format!("value cannot be encoded: {}", e)))?;
    let token = format!("{}{}", MARKER_DIRECT, BASE64.encode(&raw));

    if let Some(policy) = &options.proxy
        && token.len() > policy.threshold
    {
        let locator = policy.store.put(&raw)?;
        tracing::debug!(
            size = raw.len(),
            key = %locator.key,
            "payload proxied through content store"
        );
        return encode_locator(&locator);
    }

    if let Some(limit) = options.size_limit
        && token.len() > limit
    {
        return Err(DispatchError::PayloadTooLarge {
            size: token.len(),
            limit,
        });
    }

    Ok(token)
}

/// Decode a token produced by [`encode`], resolving locator records through
/// the content store on demand.
pub fn decode<T: DeserializeOwned>(token: &str) -> Result<T> {
    let token = token.trim();

    if let Some(body) = token.strip_prefix(MARKER_LOCATOR) {
        let raw = decode_base64(body)?;
        let locator: Locator = serde_json::from_slice(&raw).map_err(|e| {
            DispatchError::Serialization(format!("malformed locator record: {}", e))
        })?;
        let bytes = store::resolve(&locator)?;
        return serde_json::from_slice(&bytes).map_err(|e| {
            DispatchError::Serialization(format!("proxied value cannot be decoded: {}", e))
        });
    }

    let Some(body) = token.strip_prefix(MARKER_DIRECT) else {
        let head: String = token.chars().take(16).collect();
        return Err(DispatchError::Serialization(format!(
            "unrecognized payload marker in token starting with '{}'",
            head
        )));
    };
    let raw = decode_base64(body)?;
    serde_json::from_slice(&raw)
        .map_err(|e| DispatchError::Serialization(format!("value cannot be decoded: {}", e)))
}

fn encode_locator(locator: &Locator) -> Result<String> {
    let raw = serde_json::to_vec(locator)
        .map_err(|e| DispatchError::Serialization(format!("locator cannot be encoded: {}", e)))?;
    Ok(format!("{}{}", MARKER_LOCATOR, BASE64.encode(&raw)))
}

fn decode_base64(body: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(body.trim())
        .map_err(|e| DispatchError::Serialization(format!("invalid base64 payload: {}", e)))
}
