//! Stream tracker loop.
//!
//! Drains the detector's private reader so its position tracks the writer,
//! publishing `tell()` after every successful read. The samples themselves
//! are discarded.

use std::sync::{atomic::Ordering, Arc};

use tracing::{error, info, warn};

use super::{DetectorDiagnostics, Shared};
use crate::{
    buffering::{ReadError, Reference, StreamReader},
    observer::DetectorState,
};

/// Run until shutdown, stream close or a fatal read error.
///
/// A terminal stream outcome is reported to state observers exactly once;
/// a shutdown-driven exit reports nothing.
pub(crate) fn run(shared: Arc<Shared>, mut reader: Box<dyn StreamReader>, chunk_words: usize) {
    let mut scratch = vec![0i16; chunk_words.max(1)];
    let timeout = shared.config.stream_read_timeout;
    let diag = &shared.diagnostics;

    info!(chunk_words, "stream tracker started");

    let outcome = loop {
        if shared.is_shutting_down() {
            break None;
        }

        match reader.read(&mut scratch, timeout) {
            Ok(0) => {
                info!(index = reader.tell(), "audio stream closed");
                break Some(DetectorState::StreamClosed);
            }
            Ok(n) => {
                diag.samples_drained.fetch_add(n as u64, Ordering::Relaxed);
                shared.stream_index.store(reader.tell(), Ordering::Release);
            }
            Err(ReadError::TimedOut) => {
                DetectorDiagnostics::bump(&diag.stream_timeouts);
            }
            Err(ReadError::Overrun) => {
                let behind = reader.tell();
                if let Err(e) = reader.seek(0, Reference::BeforeWriter) {
                    error!("failed to resync reader after overrun: {e}");
                    break Some(DetectorState::Error);
                }
                DetectorDiagnostics::bump(&diag.overruns);
                warn!(from = behind, to = reader.tell(), "reader overrun, skipped to writer");
            }
            Err(ReadError::Other(msg)) => {
                error!("audio stream read failed: {msg}");
                break Some(DetectorState::Error);
            }
        }
    };

    reader.close();

    if let Some(state) = outcome {
        shared.mark_stream_ended(state);
        shared.notify_state(state);
    }
    info!("stream tracker stopped");
}
