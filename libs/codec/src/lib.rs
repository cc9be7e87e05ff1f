//! # Hearth Wire Codec
//!
//! ## Purpose
//!
//! Serializes [`Value`]s for the proxy wire protocol. The text format is a
//! flat JSON array: element 0 is the root, containers refer to their children
//! by index, and negative indices stand for values JSON cannot express.
//!
//! ## Format
//!
//! | Node | Encoding |
//! |------|----------|
//! | `undefined` / NaN / +Inf / -Inf / -0 | `-1` / `-3` / `-4` / `-5` / `-6` |
//! | array | `[i, j, ...]` |
//! | object | `{"key": i, ...}` |
//! | Date / RegExp / BigInt | `["Date", iso]`, `["RegExp", source, flags]`, `["BigInt", digits]` |
//! | Map / Set | `["Map", k, v, ...]`, `["Set", i, ...]` |
//! | extension | `["Tag", payload]` |
//!
//! Extensions reduce a value to a plain payload and revive it again. The
//! built-in tags are `ArrayBuffer`, `Headers`, `Error` and `ReadableStream`;
//! `Native` is always consulted last and delegates to a side-specific
//! [`NativeRegistry`].
//!
//! ## Streams
//!
//! At most one live stream per payload travels out of band: it is pulled out
//! during encoding and sent after the text, whose byte length is announced
//! separately. Every other live stream must be buffered first, which
//! [`Codec::encode_buffered`] does.
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → [codec] → libs/proxy (bridge + dispatcher)
//! ```

pub mod date;
pub mod error;
pub mod extensions;
pub mod framing;
pub mod streams;

mod flatten;
mod unflatten;

pub use error::{CodecError, Result};
pub use extensions::{Extension, ReduceContext, ReviveContext};
pub use framing::{prefix_stream, read_prefix};
pub use streams::{collect_streams, scan_streams};

use hearth_types::{ByteStream, NativeTarget, Value};

/// Sentinel indices
pub const UNDEFINED: i64 = -1;
pub const HOLE: i64 = -2;
pub const NAN: i64 = -3;
pub const POSITIVE_INFINITY: i64 = -4;
pub const NEGATIVE_INFINITY: i64 = -5;
pub const NEGATIVE_ZERO: i64 = -6;

/// Deepest nesting accepted in either direction
pub const MAX_DEPTH: usize = 512;

/// Tag used for live object references
pub const NATIVE_TAG: &str = "Native";

/// Side-specific handling of live references
///
/// The host side turns references into proxy stubs; the sandbox side stores
/// objects on its heap and hands out addresses.
pub trait NativeRegistry: Send + Sync {
    /// Produce a target for a live value, or `None` if this side cannot
    /// reference it
    fn reduce(&self, value: &Value) -> Result<Option<NativeTarget>>;

    fn revive(&self, target: NativeTarget) -> Result<Value>;
}

/// Registry for payloads that must not contain live references
pub struct NoNatives;

impl NativeRegistry for NoNatives {
    fn reduce(&self, _value: &Value) -> Result<Option<NativeTarget>> {
        Ok(None)
    }

    fn revive(&self, target: NativeTarget) -> Result<Value> {
        Err(CodecError::native(format!(
            "unexpected reference to {} at address {}",
            target.type_name, target.address
        )))
    }
}

/// How live streams are treated while encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Any live stream fails with [`CodecError::RequiresBuffering`]
    Forbid,
    /// The first live stream travels out of band
    Unbuffered,
}

/// Encoded payload plus the stream pulled out of it, if any
pub struct Encoded {
    pub text: String,
    pub unbuffered_stream: Option<ByteStream>,
}

/// Value encoder/decoder with a fixed set of extensions
pub struct Codec {
    extensions: Vec<Box<dyn Extension>>,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec {
    /// Codec with the built-in extensions
    pub fn new() -> Self {
        Self {
            extensions: extensions::builtin(),
        }
    }

    /// Register an additional extension. Tags must be unique.
    pub fn with_extension(mut self, extension: impl Extension + 'static) -> Self {
        self.extensions.push(Box::new(extension));
        self
    }

    pub(crate) fn extensions(&self) -> &[Box<dyn Extension>] {
        &self.extensions
    }

    pub(crate) fn extension(&self, tag: &str) -> Option<&dyn Extension> {
        self.extensions
            .iter()
            .find(|e| e.tag() == tag)
            .map(|e| e.as_ref())
    }

    pub fn encode(
        &self,
        value: &Value,
        mode: StreamMode,
        natives: &dyn NativeRegistry,
    ) -> Result<Encoded> {
        flatten::Flattener::new(self, natives, mode).run(value)
    }

    /// Buffer every live stream that cannot travel out of band, then encode
    pub async fn encode_buffered(
        &self,
        value: &Value,
        mode: StreamMode,
        natives: &dyn NativeRegistry,
    ) -> Result<Encoded> {
        let keep = match mode {
            StreamMode::Unbuffered => 1,
            StreamMode::Forbid => 0,
        };
        for handle in collect_streams(value).into_iter().skip(keep) {
            handle.buffer().await?;
        }
        self.encode(value, mode, natives)
    }

    pub fn decode(
        &self,
        text: &str,
        unbuffered_stream: Option<ByteStream>,
        natives: &dyn NativeRegistry,
    ) -> Result<Value> {
        let (value, unused) = self.decode_with_rest(text, unbuffered_stream, natives)?;
        if unused.is_some() {
            tracing::debug!("decoded payload did not reference its unbuffered stream");
        }
        Ok(value)
    }

    /// Like [`Codec::decode`], but returns the unbuffered stream when the
    /// payload never referenced it so the caller can drain it
    pub fn decode_with_rest(
        &self,
        text: &str,
        unbuffered_stream: Option<ByteStream>,
        natives: &dyn NativeRegistry,
    ) -> Result<(Value, Option<ByteStream>)> {
        unflatten::Unflattener::new(self, natives, unbuffered_stream).run(text)
    }

    /// Encode a bare reference, as sent in the target header
    pub fn encode_target(&self, target: &NativeTarget) -> String {
        let nodes = serde_json::json!([
            [NATIVE_TAG, 1],
            {"address": 2, "type_name": 3, "is_function": 4},
            target.address,
            target.type_name,
            target.is_function,
        ]);
        nodes.to_string()
    }
}

pub(crate) fn target_to_value(target: &NativeTarget) -> Value {
    Value::object([
        ("address", Value::Number(target.address as f64)),
        ("type_name", Value::String(target.type_name.clone())),
        ("is_function", Value::Bool(target.is_function)),
    ])
}

pub(crate) fn value_to_target(value: &Value) -> Result<NativeTarget> {
    let address = value
        .get("address")
        .and_then(Value::as_f64)
        .filter(|a| *a >= 0.0 && a.fract() == 0.0)
        .ok_or_else(|| CodecError::malformed("native reference without address", None))?;
    let type_name = value
        .get("type_name")
        .and_then(Value::as_str)
        .ok_or_else(|| CodecError::malformed("native reference without type name", None))?;
    let is_function = value
        .get("is_function")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Ok(NativeTarget::new(address as u64, type_name, is_function))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl NativeRegistry for Echo {
        fn reduce(&self, _value: &Value) -> Result<Option<NativeTarget>> {
            Ok(None)
        }

        fn revive(&self, target: NativeTarget) -> Result<Value> {
            Ok(target_to_value(&target))
        }
    }

    #[test]
    fn encoded_targets_decode_through_the_registry() {
        let codec = Codec::new();
        let target = NativeTarget::new(42, "Fetcher", false);
        let text = codec.encode_target(&target);
        let revived = codec.decode(&text, None, &Echo).unwrap();
        assert_eq!(value_to_target(&revived).unwrap(), target);
    }

    #[test]
    fn plain_codec_refuses_references() {
        let codec = Codec::new();
        let text = codec.encode_target(&NativeTarget::new(2, "Object", false));
        let err = codec.decode(&text, None, &NoNatives).unwrap_err();
        assert!(matches!(err, CodecError::Native { .. }));
    }
}
