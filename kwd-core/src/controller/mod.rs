//! Hardware keyword-detection controllers.
//!
//! The `HardwareController` trait decouples the detector from how a given
//! device reports wake-word events (ALSA-style control channel, TCP socket,
//! simulated trigger, …).
//!
//! `read` takes `&self`: a controller is shared between the detection thread
//! and whatever subsystem forwards recognizer state changes to it, so every
//! implementation keeps its mutable transport state behind its own lock.

pub mod control;
pub mod detection;
pub mod simulated;
pub mod socket;

pub use control::{CaptureMode, ControlDeviceConfig, ControlDeviceController, ControlTransport};
pub use detection::KeywordDetection;
pub use simulated::{SimulatedController, MAX_PENDING_TRIGGERS};
pub use socket::SocketController;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Recognition / dialog state forwarded to controllers.
///
/// Controllers use it only to switch hardware modes or re-arm triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecognizerState {
    Idle,
    ExpectingSpeech,
    Recognizing,
    Busy,
    Finished,
}

/// Contract for hardware keyword-detection backends.
pub trait HardwareController: Send + Sync + 'static {
    /// Wait up to `timeout` for the hardware to report a detection.
    ///
    /// # Returns
    /// - `Ok(Some(_))`: a keyword was detected.
    /// - `Ok(None)`: the timeout elapsed with no event.
    ///
    /// # Errors
    /// - `KwdError::Transport` on an I/O failure mid-read.
    /// - `KwdError::Decode` when the device payload is malformed.
    fn read(&self, timeout: Duration) -> Result<Option<KeywordDetection>>;

    /// Best-effort reaction to a recognizer state change. Never fails.
    fn on_state_changed(&self, _state: RecognizerState) {}

    /// Short backend name used in logs.
    fn name(&self) -> &str;
}

/// Shared handle to any `HardwareController` implementor.
pub type ControllerHandle = Arc<dyn HardwareController>;

/// Selects and parameterises a transport-backed controller.
///
/// The control-device variant is not listed: it needs a concrete
/// `ControlTransport` type and is built with `ControlDeviceController::open`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ControllerConfig {
    #[serde(rename_all = "camelCase")]
    Socket {
        host: String,
        port: u16,
        #[serde(default = "default_connect_timeout_ms")]
        connect_timeout_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    Simulated {
        #[serde(default = "default_interval_ms")]
        interval_ms: u64,
        #[serde(default = "default_keyword")]
        keyword: String,
    },
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_interval_ms() -> u64 {
    200
}

fn default_keyword() -> String {
    "alexa".into()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig::Simulated {
            interval_ms: default_interval_ms(),
            keyword: default_keyword(),
        }
    }
}

/// Build a controller from configuration.
///
/// # Errors
/// `KwdError::ControllerInit` when the transport cannot be opened.
pub fn build_controller(config: &ControllerConfig) -> Result<ControllerHandle> {
    match config {
        ControllerConfig::Socket {
            host,
            port,
            connect_timeout_ms,
        } => {
            let ctrl = SocketController::connect(
                host,
                *port,
                Duration::from_millis(*connect_timeout_ms),
            )?;
            Ok(Arc::new(ctrl))
        }
        ControllerConfig::Simulated {
            interval_ms,
            keyword,
        } => Ok(Arc::new(SimulatedController::new(
            Duration::from_millis(*interval_ms),
            keyword.clone(),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_config_deserializes_tagged_camel_case() {
        let raw = r#"{"kind":"socket","host":"127.0.0.1","port":3000}"#;
        let cfg: ControllerConfig = serde_json::from_str(raw).expect("parse socket config");
        assert_eq!(
            cfg,
            ControllerConfig::Socket {
                host: "127.0.0.1".into(),
                port: 3000,
                connect_timeout_ms: 2_000,
            }
        );

        let raw = r#"{"kind":"simulated","intervalMs":50}"#;
        let cfg: ControllerConfig = serde_json::from_str(raw).expect("parse simulated config");
        assert_eq!(
            cfg,
            ControllerConfig::Simulated {
                interval_ms: 50,
                keyword: "alexa".into(),
            }
        );
    }

    #[test]
    fn unknown_controller_kind_is_rejected() {
        let raw = r#"{"kind":"bluetooth"}"#;
        assert!(serde_json::from_str::<ControllerConfig>(raw).is_err());
    }

    #[test]
    fn build_simulated_controller_from_default_config() {
        let ctrl = build_controller(&ControllerConfig::default()).expect("build simulated");
        assert_eq!(ctrl.name(), "simulated");
        let read = ctrl
            .read(Duration::from_millis(10))
            .expect("read never fails");
        assert!(read.is_none());
    }

    #[test]
    fn recognizer_state_serializes_camel_case() {
        let json = serde_json::to_value(RecognizerState::ExpectingSpeech).expect("serialize");
        assert_eq!(json, "expectingSpeech");
    }
}
