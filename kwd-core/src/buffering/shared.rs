//! `SharedStream`: in-process ring buffer with independent readers.
//!
//! The writer never blocks: once the ring is full the oldest words are
//! overwritten. Every reader keeps its own absolute cursor; a reader whose
//! cursor has been lapped by the writer gets `ReadError::Overrun` and must
//! seek forward before it can read again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::{AudioStream, ReadError, ReaderPolicy, Reference, StreamIndex, StreamReader};
use crate::error::{KwdError, Result};

struct RingState {
    words: Box<[i16]>,
    /// Absolute index of the next word the writer will store.
    write_index: StreamIndex,
    closed: bool,
}

impl RingState {
    /// Oldest index still held by the ring.
    fn oldest(&self) -> StreamIndex {
        self.write_index.saturating_sub(self.words.len() as u64)
    }

    fn slot(&self, index: StreamIndex) -> usize {
        (index % self.words.len() as u64) as usize
    }
}

struct Inner {
    state: Mutex<RingState>,
    data_ready: Condvar,
}

/// Cloneable handle to a shared ring of `i16` words.
#[derive(Clone)]
pub struct SharedStream {
    inner: Arc<Inner>,
}

impl SharedStream {
    /// Create a stream holding at most `capacity` words (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        debug!(capacity, "creating shared stream");
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RingState {
                    words: vec![0i16; capacity].into_boxed_slice(),
                    write_index: 0,
                    closed: false,
                }),
                data_ready: Condvar::new(),
            }),
        }
    }

    /// Append `samples`, overwriting the oldest words when full.
    ///
    /// Returns the number of words accepted (0 once the stream is closed).
    pub fn write(&self, samples: &[i16]) -> usize {
        if samples.is_empty() {
            return 0;
        }

        let mut state = self.inner.state.lock();
        if state.closed {
            return 0;
        }

        let capacity = state.words.len();
        let skipped = samples.len().saturating_sub(capacity);
        let start = state.write_index + skipped as u64;
        for (i, &sample) in samples[skipped..].iter().enumerate() {
            let slot = state.slot(start + i as u64);
            state.words[slot] = sample;
        }
        state.write_index += samples.len() as u64;
        drop(state);

        self.inner.data_ready.notify_all();
        samples.len()
    }

    /// Close the writer side. Readers drain what is left and then see `Ok(0)`.
    pub fn close(&self) {
        self.inner.state.lock().closed = true;
        self.inner.data_ready.notify_all();
        debug!("shared stream closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Absolute index of the next word the writer will store.
    pub fn write_index(&self) -> StreamIndex {
        self.inner.state.lock().write_index
    }

    pub fn capacity(&self) -> usize {
        self.inner.state.lock().words.len()
    }

    /// Concrete reader constructor, for callers that do not need a trait object.
    pub fn reader(&self, policy: ReaderPolicy) -> SharedStreamReader {
        let position = self.write_index();
        SharedStreamReader {
            inner: Arc::clone(&self.inner),
            position,
            policy,
            detached: false,
        }
    }
}

impl std::fmt::Debug for SharedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SharedStream")
            .field("capacity", &state.words.len())
            .field("write_index", &state.write_index)
            .field("closed", &state.closed)
            .finish()
    }
}

impl AudioStream for SharedStream {
    fn create_reader(&self, policy: ReaderPolicy) -> Result<Box<dyn StreamReader>> {
        Ok(Box::new(self.reader(policy)))
    }
}

/// Cursor into a `SharedStream`.
pub struct SharedStreamReader {
    inner: Arc<Inner>,
    position: StreamIndex,
    policy: ReaderPolicy,
    detached: bool,
}

impl StreamReader for SharedStreamReader {
    fn read(&mut self, buf: &mut [i16], timeout: Duration) -> std::result::Result<usize, ReadError> {
        if self.detached {
            return Ok(0);
        }
        if buf.is_empty() {
            return Err(ReadError::Other("zero-length read buffer".into()));
        }

        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        let mut timed_out = false;

        let available = loop {
            if self.position < state.oldest() {
                return Err(ReadError::Overrun);
            }
            let available = state.write_index.saturating_sub(self.position);
            if available > 0 {
                break available;
            }
            if state.closed {
                return Ok(0);
            }
            if timed_out || self.policy == ReaderPolicy::NonBlocking {
                return Err(ReadError::TimedOut);
            }
            timed_out = self
                .inner
                .data_ready
                .wait_until(&mut state, deadline)
                .timed_out();
        };

        let n = buf.len().min(available as usize);
        for (i, out) in buf[..n].iter_mut().enumerate() {
            *out = state.words[state.slot(self.position + i as u64)];
        }
        self.position += n as u64;
        Ok(n)
    }

    fn seek(&mut self, offset: u64, reference: Reference) -> Result<()> {
        let state = self.inner.state.lock();
        let target = match reference {
            Reference::Absolute => Some(offset),
            Reference::AfterReader => self.position.checked_add(offset),
            Reference::BeforeReader => self.position.checked_sub(offset),
            Reference::BeforeWriter => state.write_index.checked_sub(offset),
        };

        match target {
            Some(t) if t >= state.oldest() && t <= state.write_index => {
                self.position = t;
                Ok(())
            }
            _ => Err(KwdError::Seek(format!(
                "offset {offset} from {reference:?} is outside [{}, {}]",
                state.oldest(),
                state.write_index
            ))),
        }
    }

    fn tell(&self) -> StreamIndex {
        self.position
    }

    fn close(&mut self) {
        self.detached = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(20);

    #[test]
    fn reader_starts_at_writer_position() {
        let stream = SharedStream::new(16);
        stream.write(&[1, 2, 3]);
        let mut reader = stream.reader(ReaderPolicy::Blocking);
        assert_eq!(reader.tell(), 3);

        stream.write(&[4, 5]);
        let mut buf = [0i16; 8];
        assert_eq!(reader.read(&mut buf, SHORT), Ok(2));
        assert_eq!(&buf[..2], &[4, 5]);
        assert_eq!(reader.tell(), 5);
    }

    #[test]
    fn empty_blocking_read_times_out() {
        let stream = SharedStream::new(16);
        let mut reader = stream.reader(ReaderPolicy::Blocking);
        let mut buf = [0i16; 4];
        let start = Instant::now();
        assert_eq!(reader.read(&mut buf, SHORT), Err(ReadError::TimedOut));
        assert!(start.elapsed() >= SHORT);
    }

    #[test]
    fn non_blocking_read_returns_immediately() {
        let stream = SharedStream::new(16);
        let mut reader = stream.reader(ReaderPolicy::NonBlocking);
        let mut buf = [0i16; 4];
        assert_eq!(
            reader.read(&mut buf, Duration::from_secs(5)),
            Err(ReadError::TimedOut)
        );
    }

    #[test]
    fn blocking_read_wakes_on_write() {
        let stream = SharedStream::new(64);
        let mut reader = stream.reader(ReaderPolicy::Blocking);
        let writer = stream.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            writer.write(&[7; 10]);
        });

        let mut buf = [0i16; 32];
        let n = reader
            .read(&mut buf, Duration::from_secs(2))
            .expect("read after write");
        assert_eq!(n, 10);
        handle.join().expect("writer thread panicked");
    }

    #[test]
    fn lapped_reader_reports_overrun_until_resynchronised() {
        let stream = SharedStream::new(8);
        let mut reader = stream.reader(ReaderPolicy::Blocking);
        stream.write(&[1; 20]);

        let mut buf = [0i16; 4];
        assert_eq!(reader.read(&mut buf, SHORT), Err(ReadError::Overrun));
        assert_eq!(reader.read(&mut buf, SHORT), Err(ReadError::Overrun));

        reader
            .seek(0, Reference::BeforeWriter)
            .expect("seek to writer");
        assert_eq!(reader.tell(), 20);
        assert_eq!(reader.read(&mut buf, SHORT), Err(ReadError::TimedOut));
    }

    #[test]
    fn oversized_write_keeps_newest_words() {
        let stream = SharedStream::new(4);
        let mut reader = stream.reader(ReaderPolicy::Blocking);
        let samples: Vec<i16> = (0..10).collect();
        assert_eq!(stream.write(&samples), 10);
        assert_eq!(stream.write_index(), 10);

        reader.seek(4, Reference::BeforeWriter).expect("seek");
        let mut buf = [0i16; 4];
        assert_eq!(reader.read(&mut buf, SHORT), Ok(4));
        assert_eq!(buf, [6, 7, 8, 9]);
    }

    #[test]
    fn closed_stream_drains_then_reports_zero() {
        let stream = SharedStream::new(16);
        let mut reader = stream.reader(ReaderPolicy::Blocking);
        stream.write(&[3, 4]);
        stream.close();
        assert_eq!(stream.write(&[5]), 0);

        let mut buf = [0i16; 8];
        assert_eq!(reader.read(&mut buf, SHORT), Ok(2));
        assert_eq!(reader.read(&mut buf, SHORT), Ok(0));
    }

    #[test]
    fn detached_reader_reports_closed() {
        let stream = SharedStream::new(16);
        let mut reader = stream.reader(ReaderPolicy::Blocking);
        stream.write(&[1, 2, 3]);
        reader.close();
        let mut buf = [0i16; 8];
        assert_eq!(reader.read(&mut buf, SHORT), Ok(0));
    }

    #[test]
    fn seek_outside_retained_window_fails() {
        let stream = SharedStream::new(4);
        let mut reader = stream.reader(ReaderPolicy::Blocking);
        stream.write(&[0; 10]);

        assert!(reader.seek(2, Reference::Absolute).is_err());
        assert!(reader.seek(11, Reference::Absolute).is_err());
        reader.seek(7, Reference::Absolute).expect("in window");
        reader.seek(2, Reference::AfterReader).expect("forward");
        assert_eq!(reader.tell(), 9);
        reader.seek(3, Reference::BeforeReader).expect("backward");
        assert_eq!(reader.tell(), 6);
    }
}
