//! One-shot byte streams
//!
//! A [`StreamHandle`] is either live (bytes still arriving), buffered (fully
//! read into memory) or taken (handed to a consumer). Live streams can be
//! read exactly once.

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

enum StreamState {
    Live(ByteStream),
    Buffered(Bytes),
    Taken,
}

#[derive(Clone)]
pub struct StreamHandle {
    state: Arc<Mutex<StreamState>>,
}

impl StreamHandle {
    pub fn new(stream: ByteStream) -> Self {
        Self {
            state: Arc::new(Mutex::new(StreamState::Live(stream))),
        }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StreamState::Buffered(bytes.into()))),
        }
    }

    /// Wrap in-memory chunks as a live stream
    pub fn from_chunks(chunks: Vec<Bytes>) -> Self {
        Self::new(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
    }

    pub fn is_live(&self) -> bool {
        matches!(*self.state.lock(), StreamState::Live(_))
    }

    pub fn is_taken(&self) -> bool {
        matches!(*self.state.lock(), StreamState::Taken)
    }

    pub fn buffered(&self) -> Option<Bytes> {
        match &*self.state.lock() {
            StreamState::Buffered(bytes) => Some(bytes.clone()),
            _ => None,
        }
    }

    /// Take the stream for reading. Buffered contents come back as a single
    /// chunk.
    pub fn take(&self) -> Option<ByteStream> {
        let state = std::mem::replace(&mut *self.state.lock(), StreamState::Taken);
        match state {
            StreamState::Live(stream) => Some(stream),
            StreamState::Buffered(bytes) => Some(Box::pin(stream::once(async move { Ok(bytes) }))),
            StreamState::Taken => None,
        }
    }

    /// Read a live stream fully into memory, keeping the bytes on the handle
    pub async fn buffer(&self) -> io::Result<Bytes> {
        let live = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, StreamState::Taken) {
                StreamState::Live(stream) => stream,
                StreamState::Buffered(bytes) => {
                    *state = StreamState::Buffered(bytes.clone());
                    return Ok(bytes);
                }
                StreamState::Taken => return Err(consumed()),
            }
        };
        let bytes = collect(live).await?;
        *self.state.lock() = StreamState::Buffered(bytes.clone());
        Ok(bytes)
    }

    /// Consume the stream and return everything it yields
    pub async fn read_all(&self) -> io::Result<Bytes> {
        match self.take() {
            Some(stream) => collect(stream).await,
            None => Err(consumed()),
        }
    }

    pub fn ptr_eq(&self, other: &StreamHandle) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.state.lock() {
            StreamState::Live(_) => "live".to_string(),
            StreamState::Buffered(bytes) => format!("buffered({} bytes)", bytes.len()),
            StreamState::Taken => "taken".to_string(),
        };
        write!(f, "StreamHandle({state})")
    }
}

async fn collect(mut stream: ByteStream) -> io::Result<Bytes> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(buffer.freeze())
}

fn consumed() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "stream has already been consumed")
}
