//! # kwd-core
//!
//! Hardware keyword detector SDK.
//!
//! ## Architecture
//!
//! ```text
//! producer → SharedStream ──reader──► stream tracker thread ──► stream_index (AtomicU64)
//!                                                                     │
//! DSP / socket / simulated ──► HardwareController::read ──► detection thread
//!                                                                     │
//!                                                  correct_indices(stream_index, offsets)
//!                                                                     │
//!                                            KeywordObserver / DetectorStateObserver
//! ```
//!
//! The only datum shared between the two threads is the stream index.
//! Observers are held weakly and called on the detector's threads.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod buffering;
pub mod controller;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod observer;

// Convenience re-exports for downstream crates
pub use buffering::{AudioFormat, AudioStream, SharedStream, StreamReader};
pub use controller::{
    build_controller, ControllerConfig, ControllerHandle, HardwareController, KeywordDetection,
    RecognizerState,
};
pub use engine::{Detector, DetectorConfig, DetectorStatus, DiagnosticsSnapshot};
pub use error::{KwdError, Result};
pub use ipc::events::{BroadcastObserver, DetectorStateEvent, KeywordEvent};
pub use observer::{DetectorState, DetectorStateObserver, KeywordObserver};
