//! Prefix framing
//!
//! An encoded payload with an out-of-band stream travels as
//! `text ++ stream`; the receiver splits it again using the announced text
//! length.

use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt};
use hearth_types::ByteStream;
use std::io;

/// Split `stream` into its first `size` bytes and the remaining tail
pub async fn read_prefix(mut stream: ByteStream, size: usize) -> io::Result<(Bytes, ByteStream)> {
    let mut buffer = BytesMut::with_capacity(size);
    while buffer.len() < size {
        match stream.next().await {
            Some(chunk) => buffer.extend_from_slice(&chunk?),
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("expected {size} prefix bytes, got {}", buffer.len()),
                ))
            }
        }
    }
    let rest = buffer.split_off(size).freeze();
    let prefix = buffer.freeze();
    Ok((prefix, prefix_stream(rest, stream)))
}

/// Emit `prefix` before everything `tail` yields
pub fn prefix_stream(prefix: Bytes, tail: ByteStream) -> ByteStream {
    if prefix.is_empty() {
        return tail;
    }
    Box::pin(stream::once(async move { Ok(prefix) }).chain(tail))
}
