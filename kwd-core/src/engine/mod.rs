//! `Detector`: dual-thread keyword detection engine.
//!
//! ## Lifecycle
//!
//! ```text
//! Detector::create()     → validate, create reader, spawn both threads, status = Active
//!     tracker exits      → status = StreamClosed | Error (detection keeps running)
//!     shutdown() / drop  → flag set, both threads joined, status = Terminated
//! ```
//!
//! `create` either returns a fully running detector or an error; nothing is
//! left running on failure. `shutdown` is idempotent.
//!
//! ## Threading
//!
//! ```text
//! kwd-stream-tracker:  reader.read() ─► stream_index.store()
//!                                            │ (AtomicU64, the only shared datum)
//! kwd-detection:       controller.read() ─► stream_index.load() ─► correct ─► observers
//! ```
//!
//! The reader is moved into the tracker thread and never touched elsewhere.
//! Both loops check the shutdown flag once per iteration and every blocking
//! call is bounded by its timeout, which bounds `shutdown` latency.

pub mod detection;
pub mod tracker;

pub use detection::correct_indices;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{
    buffering::{AudioFormat, AudioStream, Encoding, ReaderPolicy, StreamIndex},
    controller::ControllerHandle,
    error::{KwdError, Result},
    observer::{DetectorState, DetectorStateObserver, KeywordObserver, ObserverSet},
};

/// Typical lag, in samples, between the hardware reporting a keyword and the
/// stream writer position at that moment. Empirically tuned for one DSP
/// board; re-calibrate for other hardware.
pub const DEFAULT_INDEX_CORRECTION: i64 = 9_000;

/// Configuration for `Detector`.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Upper bound on each `HardwareController::read`. Default: 250 ms.
    pub poll_timeout: Duration,
    /// Upper bound on each stream drain read. Default: 250 ms.
    pub stream_read_timeout: Duration,
    /// Audio drained per tracker iteration, in milliseconds. Default: 20.
    pub ms_per_push: u64,
    /// Samples subtracted from concrete detection offsets once the stream
    /// index is non-zero. Default: `DEFAULT_INDEX_CORRECTION`.
    pub index_correction: i64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(250),
            stream_read_timeout: Duration::from_millis(250),
            ms_per_push: 20,
            index_correction: DEFAULT_INDEX_CORRECTION,
        }
    }
}

impl DetectorConfig {
    pub fn with_poll_timeout(poll_timeout: Duration) -> Self {
        Self {
            poll_timeout,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_timeout.is_zero() {
            return Err(KwdError::InvalidConfig("poll timeout must be non-zero".into()));
        }
        if self.stream_read_timeout.is_zero() {
            return Err(KwdError::InvalidConfig(
                "stream read timeout must be non-zero".into(),
            ));
        }
        if self.index_correction < 0 {
            return Err(KwdError::InvalidConfig(format!(
                "index correction must be >= 0, got {}",
                self.index_correction
            )));
        }
        Ok(())
    }
}

/// Lifecycle state of a `Detector`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DetectorStatus {
    Initializing,
    /// Both loops running.
    Active,
    /// Stream closed; detection continues on the last known index.
    StreamClosed,
    /// Stream failed; detection continues on the last known index.
    Error,
    /// Shut down. Never restarted.
    Terminated,
}

#[derive(Default)]
pub struct DetectorDiagnostics {
    pub samples_drained: AtomicU64,
    pub overruns: AtomicU64,
    pub stream_timeouts: AtomicU64,
    pub controller_reads: AtomicU64,
    pub controller_timeouts: AtomicU64,
    pub controller_errors: AtomicU64,
    pub detections: AtomicU64,
}

impl DetectorDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            samples_drained: self.samples_drained.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            stream_timeouts: self.stream_timeouts.load(Ordering::Relaxed),
            controller_reads: self.controller_reads.load(Ordering::Relaxed),
            controller_timeouts: self.controller_timeouts.load(Ordering::Relaxed),
            controller_errors: self.controller_errors.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub samples_drained: u64,
    pub overruns: u64,
    pub stream_timeouts: u64,
    pub controller_reads: u64,
    pub controller_timeouts: u64,
    pub controller_errors: u64,
    pub detections: u64,
}

/// State shared between the `Detector` handle and its two threads.
pub(crate) struct Shared {
    pub(crate) config: DetectorConfig,
    pub(crate) stream: Arc<dyn AudioStream>,
    pub(crate) controller: ControllerHandle,
    pub(crate) keyword_observers: ObserverSet<dyn KeywordObserver>,
    pub(crate) state_observers: ObserverSet<dyn DetectorStateObserver>,
    /// Latest reader position seen by the tracker.
    pub(crate) stream_index: AtomicU64,
    pub(crate) shutting_down: AtomicBool,
    pub(crate) status: Mutex<DetectorStatus>,
    pub(crate) diagnostics: DetectorDiagnostics,
}

impl Shared {
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub(crate) fn notify_state(&self, state: DetectorState) {
        self.state_observers
            .notify(|o| o.on_detector_state_changed(state));
    }

    /// Record a terminal tracker outcome unless shutdown already won.
    pub(crate) fn mark_stream_ended(&self, state: DetectorState) {
        let mut status = self.status.lock();
        if *status != DetectorStatus::Terminated {
            *status = match state {
                DetectorState::StreamClosed => DetectorStatus::StreamClosed,
                _ => DetectorStatus::Error,
            };
        }
    }
}

/// Handle to a running keyword detector.
///
/// Dropping the handle shuts the detector down.
pub struct Detector {
    shared: Arc<Shared>,
    detection_thread: Mutex<Option<JoinHandle<()>>>,
    tracker_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Detector {
    /// Validate inputs, create the stream reader and start both loops.
    ///
    /// Observers are held weakly: keep the `Arc`s alive for as long as they
    /// should receive callbacks.
    ///
    /// # Errors
    /// - `KwdError::UnsupportedFormat` if the stream would need byte swapping
    ///   or is not 16-bit LPCM.
    /// - `KwdError::InvalidConfig` for zero timeouts.
    /// - `KwdError::StreamReader` / `KwdError::ThreadSpawn` on resource failure.
    pub fn create(
        stream: Arc<dyn AudioStream>,
        audio_format: AudioFormat,
        controller: ControllerHandle,
        keyword_observers: impl IntoIterator<Item = Arc<dyn KeywordObserver>>,
        state_observers: impl IntoIterator<Item = Arc<dyn DetectorStateObserver>>,
        config: DetectorConfig,
    ) -> Result<Self> {
        validate_format(&audio_format)?;
        config.validate()?;

        let chunk_words = audio_format.words_for_ms(config.ms_per_push);
        let reader = stream
            .create_reader(ReaderPolicy::Blocking)
            .map_err(|e| KwdError::StreamReader(e.to_string()))?;

        let shared = Arc::new(Shared {
            config,
            stream,
            controller,
            keyword_observers: ObserverSet::new(),
            state_observers: ObserverSet::new(),
            stream_index: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            status: Mutex::new(DetectorStatus::Initializing),
            diagnostics: DetectorDiagnostics::default(),
        });
        for observer in keyword_observers {
            shared.keyword_observers.add(&observer);
        }
        for observer in state_observers {
            shared.state_observers.add(&observer);
        }

        let detection_shared = Arc::clone(&shared);
        let detection_thread = thread::Builder::new()
            .name("kwd-detection".into())
            .spawn(move || detection::run(detection_shared))
            .map_err(|source| KwdError::ThreadSpawn {
                name: "detection",
                source,
            })?;

        let tracker_shared = Arc::clone(&shared);
        let tracker_thread = match thread::Builder::new()
            .name("kwd-stream-tracker".into())
            .spawn(move || tracker::run(tracker_shared, reader, chunk_words))
        {
            Ok(handle) => handle,
            Err(source) => {
                shared.shutting_down.store(true, Ordering::Release);
                if detection_thread.join().is_err() {
                    error!("detection thread panicked during aborted start");
                }
                return Err(KwdError::ThreadSpawn {
                    name: "stream tracker",
                    source,
                });
            }
        };

        {
            // The tracker may already have recorded a stream outcome.
            let mut status = shared.status.lock();
            if *status == DetectorStatus::Initializing {
                *status = DetectorStatus::Active;
            }
        }
        info!(
            controller = shared.controller.name(),
            chunk_words,
            poll_timeout_ms = shared.config.poll_timeout.as_millis() as u64,
            "keyword detector started"
        );

        Ok(Self {
            shared,
            detection_thread: Mutex::new(Some(detection_thread)),
            tracker_thread: Mutex::new(Some(tracker_thread)),
        })
    }

    /// Stop both loops and wait for them to exit. Safe to call repeatedly.
    pub fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::Release);

        let handles = [
            ("detection", self.detection_thread.lock().take()),
            ("stream tracker", self.tracker_thread.lock().take()),
        ];
        for (name, handle) in handles {
            let Some(handle) = handle else { continue };
            if handle.thread().id() == thread::current().id() {
                // Called from an observer callback on this very thread; the
                // loop exits on its own once the callback returns.
                continue;
            }
            if handle.join().is_err() {
                error!("{name} thread panicked");
            }
        }

        let mut status = self.shared.status.lock();
        if *status != DetectorStatus::Terminated {
            *status = DetectorStatus::Terminated;
            info!("keyword detector stopped");
        }
    }

    /// Current lifecycle state (snapshot).
    pub fn status(&self) -> DetectorStatus {
        *self.shared.status.lock()
    }

    /// Whether the detection thread is still running.
    pub fn is_detecting(&self) -> bool {
        self.detection_thread
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Last reader position published by the stream tracker.
    pub fn stream_index(&self) -> StreamIndex {
        self.shared.stream_index.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.shared.config
    }

    pub fn controller(&self) -> &ControllerHandle {
        &self.shared.controller
    }

    pub fn stream(&self) -> &Arc<dyn AudioStream> {
        &self.shared.stream
    }

    pub fn add_keyword_observer(&self, observer: &Arc<dyn KeywordObserver>) -> bool {
        self.shared.keyword_observers.add(observer)
    }

    pub fn remove_keyword_observer(&self, observer: &Arc<dyn KeywordObserver>) -> bool {
        self.shared.keyword_observers.remove(observer)
    }

    pub fn add_state_observer(&self, observer: &Arc<dyn DetectorStateObserver>) -> bool {
        self.shared.state_observers.add(observer)
    }

    pub fn remove_state_observer(&self, observer: &Arc<dyn DetectorStateObserver>) -> bool {
        self.shared.state_observers.remove(observer)
    }

    /// Snapshot of loop counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.shared.diagnostics.snapshot()
    }
}

impl Drop for Detector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("status", &self.status())
            .field("stream_index", &self.stream_index())
            .finish_non_exhaustive()
    }
}

fn validate_format(format: &AudioFormat) -> Result<()> {
    if format.encoding != Encoding::Lpcm {
        return Err(KwdError::UnsupportedFormat(format!(
            "expected LPCM, got {:?}",
            format.encoding
        )));
    }
    if format.sample_size_bits != 16 {
        return Err(KwdError::UnsupportedFormat(format!(
            "expected 16-bit samples, got {}",
            format.sample_size_bits
        )));
    }
    if format.requires_byteswap() {
        return Err(KwdError::UnsupportedFormat(format!(
            "{:?}-endian samples would need byte swapping",
            format.endianness
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::Endianness;

    #[test]
    fn default_config_is_valid() {
        DetectorConfig::default().validate().expect("valid");
        assert_eq!(
            DetectorConfig::with_poll_timeout(Duration::from_millis(40)).poll_timeout,
            Duration::from_millis(40)
        );
    }

    #[test]
    fn zero_timeouts_and_negative_correction_are_rejected() {
        let zero_poll = DetectorConfig::with_poll_timeout(Duration::ZERO);
        assert!(matches!(zero_poll.validate(), Err(KwdError::InvalidConfig(_))));

        let zero_read = DetectorConfig {
            stream_read_timeout: Duration::ZERO,
            ..DetectorConfig::default()
        };
        assert!(zero_read.validate().is_err());

        let negative = DetectorConfig {
            index_correction: -1,
            ..DetectorConfig::default()
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn format_validation() {
        validate_format(&AudioFormat::default()).expect("native 16-bit LPCM");

        let opus = AudioFormat {
            encoding: Encoding::Opus,
            ..AudioFormat::default()
        };
        assert!(matches!(
            validate_format(&opus),
            Err(KwdError::UnsupportedFormat(_))
        ));

        let eight_bit = AudioFormat {
            sample_size_bits: 8,
            ..AudioFormat::default()
        };
        assert!(validate_format(&eight_bit).is_err());

        let swapped = AudioFormat {
            endianness: match Endianness::native() {
                Endianness::Little => Endianness::Big,
                Endianness::Big => Endianness::Little,
            },
            ..AudioFormat::default()
        };
        assert!(validate_format(&swapped).is_err());
    }

    #[test]
    fn diagnostics_snapshot_reflects_counters() {
        let diag = DetectorDiagnostics::default();
        DetectorDiagnostics::bump(&diag.detections);
        DetectorDiagnostics::bump(&diag.detections);
        diag.samples_drained.fetch_add(320, Ordering::Relaxed);
        let snap = diag.snapshot();
        assert_eq!(snap.detections, 2);
        assert_eq!(snap.samples_drained, 320);
        assert_eq!(snap.overruns, 0);
    }
}
