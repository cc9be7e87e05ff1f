//! Extension tags
//!
//! An [`Extension`] claims values of one kind, reduces them to a plain
//! payload and revives that payload on the other side. Payloads are encoded
//! like any other value, so they may nest further extensions.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use hearth_types::{ByteStream, ErrorValue, Headers, StreamHandle, Value};

use crate::{CodecError, Result, StreamMode};

pub trait Extension: Send + Sync {
    fn tag(&self) -> &'static str;

    /// Payload for `value`, or `None` when this extension does not handle it
    fn reduce(&self, value: &Value, cx: &mut ReduceContext) -> Result<Option<Value>>;

    fn revive(&self, payload: Value, cx: &mut ReviveContext) -> Result<Value>;
}

/// Encoding state shared by every extension during one encode
pub struct ReduceContext {
    mode: StreamMode,
    unbuffered: Option<ByteStream>,
}

impl ReduceContext {
    pub(crate) fn new(mode: StreamMode) -> Self {
        Self {
            mode,
            unbuffered: None,
        }
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Claim the single out-of-band slot for `handle`
    pub fn take_unbuffered(&mut self, handle: &StreamHandle) -> Result<()> {
        if self.mode == StreamMode::Forbid {
            return Err(CodecError::requires_buffering(
                "streams cannot be sent unbuffered on this path",
            ));
        }
        if self.unbuffered.is_some() {
            return Err(CodecError::requires_buffering(
                "only one stream may be sent unbuffered",
            ));
        }
        let stream = handle
            .take()
            .ok_or_else(|| CodecError::requires_buffering("stream has already been consumed"))?;
        self.unbuffered = Some(stream);
        Ok(())
    }

    pub(crate) fn into_unbuffered(self) -> Option<ByteStream> {
        self.unbuffered
    }
}

/// Decoding state shared by every extension during one decode
pub struct ReviveContext {
    unbuffered: Option<ByteStream>,
}

impl ReviveContext {
    pub(crate) fn new(unbuffered: Option<ByteStream>) -> Self {
        Self { unbuffered }
    }

    pub fn take_unbuffered(&mut self) -> Option<ByteStream> {
        self.unbuffered.take()
    }
}

pub(crate) fn builtin() -> Vec<Box<dyn Extension>> {
    vec![
        Box::new(ArrayBufferExtension),
        Box::new(HeadersExtension),
        Box::new(ErrorExtension),
        Box::new(ReadableStreamExtension),
    ]
}

/// Binary buffers as base64 text
pub struct ArrayBufferExtension;

impl Extension for ArrayBufferExtension {
    fn tag(&self) -> &'static str {
        "ArrayBuffer"
    }

    fn reduce(&self, value: &Value, _cx: &mut ReduceContext) -> Result<Option<Value>> {
        match value {
            Value::Bytes(bytes) => Ok(Some(Value::String(STANDARD.encode(bytes)))),
            _ => Ok(None),
        }
    }

    fn revive(&self, payload: Value, _cx: &mut ReviveContext) -> Result<Value> {
        let text = payload
            .as_str()
            .ok_or_else(|| CodecError::malformed("ArrayBuffer payload must be a string", None))?;
        let bytes = STANDARD
            .decode(text)
            .map_err(|e| CodecError::malformed(format!("invalid ArrayBuffer payload: {e}"), None))?;
        Ok(Value::Bytes(Bytes::from(bytes)))
    }
}

/// Header lists as `[name, value]` pairs, repeated names preserved
pub struct HeadersExtension;

impl Extension for HeadersExtension {
    fn tag(&self) -> &'static str {
        "Headers"
    }

    fn reduce(&self, value: &Value, _cx: &mut ReduceContext) -> Result<Option<Value>> {
        match value {
            Value::Headers(headers) => Ok(Some(Value::Array(
                headers
                    .entries()
                    .into_iter()
                    .map(|(name, value)| Value::Array(vec![Value::String(name), Value::String(value)]))
                    .collect(),
            ))),
            _ => Ok(None),
        }
    }

    fn revive(&self, payload: Value, _cx: &mut ReviveContext) -> Result<Value> {
        let entries = payload
            .as_array()
            .ok_or_else(|| CodecError::malformed("Headers payload must be an array", None))?;
        let headers = Headers::new();
        for entry in entries {
            match entry.as_array() {
                Some([Value::String(name), Value::String(value)]) => {
                    headers.append(name, value.clone())
                }
                _ => return Err(CodecError::malformed("Headers entry must be a pair", None)),
            }
        }
        Ok(Value::Headers(headers))
    }
}

/// Errors as `[name, message, stack, cause]`
pub struct ErrorExtension;

impl Extension for ErrorExtension {
    fn tag(&self) -> &'static str {
        "Error"
    }

    fn reduce(&self, value: &Value, _cx: &mut ReduceContext) -> Result<Option<Value>> {
        let Value::Error(error) = value else {
            return Ok(None);
        };
        Ok(Some(Value::Array(vec![
            Value::String(error.normalized_name().to_string()),
            Value::String(error.message.clone()),
            error
                .stack
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Undefined),
            error
                .cause
                .as_deref()
                .cloned()
                .unwrap_or(Value::Undefined),
        ])))
    }

    fn revive(&self, payload: Value, _cx: &mut ReviveContext) -> Result<Value> {
        let Value::Array(mut parts) = payload else {
            return Err(CodecError::malformed("Error payload must be an array", None));
        };
        parts.resize(4, Value::Undefined);
        let cause = parts.pop().unwrap_or(Value::Undefined);
        let stack = parts.pop().unwrap_or(Value::Undefined);
        let message = parts.pop().unwrap_or(Value::Undefined);
        let name = parts.pop().unwrap_or(Value::Undefined);

        let mut error = ErrorValue::new(
            name.as_str().unwrap_or("Error"),
            message.as_str().unwrap_or_default(),
        );
        error.name = error.normalized_name().to_string();
        if let Value::String(stack) = stack {
            error.stack = Some(stack);
        }
        if !cause.is_undefined() {
            error.cause = Some(Box::new(cause));
        }
        Ok(Value::Error(error))
    }
}

/// Streams as buffered bytes, or `true` when the bytes travel out of band
pub struct ReadableStreamExtension;

impl Extension for ReadableStreamExtension {
    fn tag(&self) -> &'static str {
        "ReadableStream"
    }

    fn reduce(&self, value: &Value, cx: &mut ReduceContext) -> Result<Option<Value>> {
        let Value::Stream(handle) = value else {
            return Ok(None);
        };
        if let Some(bytes) = handle.buffered() {
            return Ok(Some(Value::Bytes(bytes)));
        }
        cx.take_unbuffered(handle)?;
        Ok(Some(Value::Bool(true)))
    }

    fn revive(&self, payload: Value, cx: &mut ReviveContext) -> Result<Value> {
        match payload {
            Value::Bool(true) => {
                let stream = cx.take_unbuffered().ok_or_else(|| {
                    CodecError::malformed("unbuffered stream marker without a stream", None)
                })?;
                Ok(Value::Stream(StreamHandle::new(stream)))
            }
            Value::Bytes(bytes) => Ok(Value::Stream(StreamHandle::from_bytes(bytes))),
            _ => Err(CodecError::malformed("invalid ReadableStream payload", None)),
        }
    }
}
