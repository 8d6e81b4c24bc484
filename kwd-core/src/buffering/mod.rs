//! Shared audio stream contract.
//!
//! The detector never owns the audio transport. It only needs a reader that
//! can drain words with a bounded wait, report its absolute position and jump
//! to the writer when it has fallen behind. These traits capture exactly that
//! surface; `SharedStream` is the in-process implementation used by the
//! harness and the tests.
//!
//! ```text
//! producer ──write──► SharedStream (ring of i16 words)
//!                         ├── reader A (detector tracker thread)
//!                         └── reader B (recognizer, …)
//! ```

pub mod format;
pub mod shared;

pub use format::{AudioFormat, Encoding, Endianness};
pub use shared::SharedStream;

use std::time::Duration;

use thiserror::Error;

use crate::error::Result;

/// Absolute position in the stream, one unit per sample word.
pub type StreamIndex = u64;

/// How a reader waits when no data is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderPolicy {
    /// `read` waits up to its timeout for the writer.
    Blocking,
    /// `read` returns `ReadError::TimedOut` immediately when empty.
    NonBlocking,
}

/// Origin used by `StreamReader::seek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    /// `offset` is an absolute stream index.
    Absolute,
    /// `offset` words after the reader's current position.
    AfterReader,
    /// `offset` words before the reader's current position.
    BeforeReader,
    /// `offset` words before the writer's next write position.
    BeforeWriter,
}

/// Non-data outcomes of `StreamReader::read`.
///
/// A closed stream is not an error: it is reported as `Ok(0)`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    /// The writer lapped the reader; the unread window is gone.
    #[error("reader overrun by writer")]
    Overrun,
    /// No data arrived within the timeout.
    #[error("read timed out")]
    TimedOut,
    #[error("stream read failed: {0}")]
    Other(String),
}

/// A ring-buffered, multi-reader audio transport.
pub trait AudioStream: Send + Sync + 'static {
    /// Create an independent reader positioned at the writer's current index.
    fn create_reader(&self, policy: ReaderPolicy) -> Result<Box<dyn StreamReader>>;
}

/// One consumer's cursor into an `AudioStream`.
pub trait StreamReader: Send + 'static {
    /// Copy up to `buf.len()` words into `buf`.
    ///
    /// Returns `Ok(n)` with `n > 0` on success and `Ok(0)` once the writer has
    /// closed and every remaining word has been consumed.
    fn read(&mut self, buf: &mut [i16], timeout: Duration) -> std::result::Result<usize, ReadError>;

    /// Move the cursor relative to `reference`.
    fn seek(&mut self, offset: u64, reference: Reference) -> Result<()>;

    /// Absolute index of the next word this reader will return.
    fn tell(&self) -> StreamIndex;

    /// Detach from the stream. Further reads report a closed stream.
    fn close(&mut self);
}
