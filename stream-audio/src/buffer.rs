//! # Append-Only Stream Buffer
//!
//! Byte store fed by the network side while one or more readers replay it
//! from the start. Chunks are appended in arrival order and never mutated;
//! a `finished` flag marks the end of the download (success or failure).
//!
//! ## Design
//!
//! - **Writer**: single producer appending [`Bytes`] chunks
//! - **Readers**: any number of independent cursors over the same buffer
//! - **Locking**: chunk list and finished flag share one instance-owned
//!   `parking_lot::Mutex`; every operation holds it only briefly
//!
//! ## Read contract
//!
//! [`StreamBufferReader::read_exact`] distinguishes "no data yet" from "end
//! of stream": a short read while the download is live yields
//! [`ReadChunk::Retry`] without moving the cursor, so the identical call can
//! be reissued once more bytes arrive. Once the buffer is finished the
//! remaining tail is returned as one short read and every read after that is
//! [`ReadChunk::Eof`].

use crate::error::{Result, StreamAudioError};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::Arc;

/// Outcome of a single read call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadChunk {
    /// Bytes in stream order. Exactly the requested length, except for the
    /// final read of a finished buffer, which may be shorter.
    Data(Bytes),
    /// Not enough data buffered yet and the producer is still writing. The
    /// cursor did not move; retry the identical call later.
    Retry,
    /// The producer has finished and every byte has been consumed.
    Eof,
}

struct BufferState {
    chunks: Vec<Bytes>,
    total_bytes: usize,
    finished: bool,
}

/// Write-once-per-offset byte store with an explicit end-of-stream flag.
pub struct StreamBuffer {
    state: Mutex<BufferState>,
}

impl StreamBuffer {
    /// Create an empty, unfinished buffer.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BufferState {
                chunks: Vec::new(),
                total_bytes: 0,
                finished: false,
            }),
        })
    }

    /// Append a chunk of bytes at the tail.
    ///
    /// Empty chunks are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StreamAudioError::StreamClosed`] if [`StreamBuffer::finish`]
    /// has already been called.
    pub fn append(&self, bytes: Bytes) -> Result<()> {
        let mut state = self.state.lock();
        if state.finished {
            return Err(StreamAudioError::StreamClosed);
        }
        if bytes.is_empty() {
            return Ok(());
        }
        state.total_bytes += bytes.len();
        state.chunks.push(bytes);
        Ok(())
    }

    /// Mark the stream complete. Idempotent; later appends fail.
    pub fn finish(&self) {
        self.state.lock().finished = true;
    }

    /// Returns `true` once the producer has finished.
    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Total bytes written so far.
    pub fn total_bytes(&self) -> usize {
        self.state.lock().total_bytes
    }

    /// Number of chunks appended so far.
    pub fn chunk_count(&self) -> usize {
        self.state.lock().chunks.len()
    }

    /// Returns `true` if at least one byte has been written.
    pub fn has_data(&self) -> bool {
        self.state.lock().total_bytes > 0
    }

    /// A fresh reader positioned at the start of the stream.
    pub fn new_reader(self: &Arc<Self>) -> StreamBufferReader {
        StreamBufferReader {
            buffer: Arc::clone(self),
            chunk: 0,
            offset: 0,
            consumed: 0,
        }
    }
}

/// Cursor over a [`StreamBuffer`].
///
/// Position only advances when a read returns [`ReadChunk::Data`]; readers
/// are independent of each other.
pub struct StreamBufferReader {
    buffer: Arc<StreamBuffer>,
    chunk: usize,
    offset: usize,
    consumed: usize,
}

impl StreamBufferReader {
    /// Total bytes this reader has consumed.
    pub fn position(&self) -> usize {
        self.consumed
    }

    /// Read exactly `len` bytes, or the remaining tail of a finished stream.
    ///
    /// See the module docs for the full retry/EOF contract.
    pub fn read_exact(&mut self, len: usize) -> ReadChunk {
        self.read_inner(len, true)
    }

    /// Like [`StreamBufferReader::read_exact`], but a short read while the
    /// producer is live is returned as success instead of `Retry`. Useful for
    /// non-blocking drains.
    pub fn read_up_to(&mut self, len: usize) -> ReadChunk {
        self.read_inner(len, false)
    }

    fn read_inner(&mut self, len: usize, exact: bool) -> ReadChunk {
        let buffer = Arc::clone(&self.buffer);
        let state = buffer.state.lock();
        let available = state.total_bytes - self.consumed;

        if available == 0 {
            if state.finished {
                return ReadChunk::Eof;
            }
            return ReadChunk::Retry;
        }

        if exact && available < len && !state.finished {
            // Keep the cursor where it is so the caller can reissue the
            // identical read once more bytes have arrived.
            return ReadChunk::Retry;
        }

        let take = len.min(available);
        ReadChunk::Data(self.consume(&state, take))
    }

    fn consume(&mut self, state: &BufferState, mut remaining: usize) -> Bytes {
        // Fast path: the whole read falls inside the current chunk.
        let current = &state.chunks[self.chunk];
        if current.len() - self.offset >= remaining {
            let data = current.slice(self.offset..self.offset + remaining);
            self.advance(state, remaining);
            return data;
        }

        let mut out = BytesMut::with_capacity(remaining);
        while remaining > 0 {
            let chunk = &state.chunks[self.chunk];
            let take = remaining.min(chunk.len() - self.offset);
            out.extend_from_slice(&chunk[self.offset..self.offset + take]);
            self.advance(state, take);
            remaining -= take;
        }
        out.freeze()
    }

    fn advance(&mut self, state: &BufferState, len: usize) {
        self.consumed += len;
        self.offset += len;
        while self.chunk < state.chunks.len() && self.offset >= state.chunks[self.chunk].len() {
            self.offset -= state.chunks[self.chunk].len();
            self.chunk += 1;
        }
    }
}
