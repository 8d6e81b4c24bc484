//! `ControlDeviceController`: detections delivered through a sound-card
//! control channel (ALSA `snd_ctl`-style).
//!
//! ## Device contract
//!
//! | Element | Use |
//! |---------|-----|
//! | `"KP Detect Control"` | 32-bit value: low 16 bits = begin, high 16 bits = end |
//! | `"Capture Stream mode"` | 0 = wake-on-voice, 1 = capture streaming |
//! | `"DSP Load Topology Control"` | 0 = unload, 1 = load |
//!
//! The raw channel is abstracted by `ControlTransport` so the controller
//! logic (init sequence, payload decoding, mode tracking) is independent of
//! the library that talks to the card.
//!
//! A detection read spends most of its time in `poll`. Mode switches arrive
//! from the recognizer on other threads and must not wait for that poll, so
//! the transport is shared by `&self` and only the event read that follows a
//! successful poll is serialised.

use std::io;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{HardwareController, KeywordDetection, RecognizerState};
use crate::error::{KwdError, Result};

pub const DETECT_ELEMENT: &str = "KP Detect Control";
pub const CAPTURE_MODE_ELEMENT: &str = "Capture Stream mode";
pub const DSP_TOPOLOGY_ELEMENT: &str = "DSP Load Topology Control";

const DSP_UNLOAD: i64 = 0;
const DSP_LOAD: i64 = 1;

/// Raw access to a named control channel.
///
/// Implementations release the channel in `Drop`. `poll` may run
/// concurrently with `write_integer` on another thread; snd_ctl handles allow
/// this, mocks keep their state behind their own lock.
pub trait ControlTransport: Send + Sync + 'static {
    /// Open the named channel read-only.
    fn open(name: &str) -> io::Result<Self>
    where
        Self: Sized;

    /// Subscribe to the channel's event stream.
    fn subscribe_events(&self) -> io::Result<()>;

    fn write_integer(&self, element: &str, value: i64) -> io::Result<()>;

    fn read_integer(&self, element: &str) -> io::Result<i64>;

    /// Wait for the channel to become readable. `Ok(0)` means the timeout
    /// elapsed; a positive count means at least one event is pending.
    fn poll(&self, timeout: Duration) -> io::Result<usize>;

    /// Consume one pending event.
    fn read_event(&self) -> io::Result<()>;
}

/// Hardware capture mode selected through `CAPTURE_MODE_ELEMENT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptureMode {
    /// Low-power listening for the wake word only.
    WakeOnVoice,
    /// Full capture while the recognizer expects speech.
    CaptureStreaming,
}

impl CaptureMode {
    fn value(self) -> i64 {
        match self {
            CaptureMode::WakeOnVoice => 0,
            CaptureMode::CaptureStreaming => 1,
        }
    }

    fn for_state(state: RecognizerState) -> Self {
        if state == RecognizerState::ExpectingSpeech {
            CaptureMode::CaptureStreaming
        } else {
            CaptureMode::WakeOnVoice
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct ControlDeviceConfig {
    /// Control channel name, e.g. `"hw:0"`.
    pub device_name: String,
    /// Keyword reported with every detection (the device does not name it).
    pub keyword: String,
    /// Unload and reload the DSP topology during initialization.
    pub reload_topology: bool,
}

impl Default for ControlDeviceConfig {
    fn default() -> Self {
        Self {
            device_name: "hw:0".into(),
            keyword: "alexa".into(),
            reload_topology: true,
        }
    }
}

pub struct ControlDeviceController<T: ControlTransport> {
    device_name: String,
    keyword: String,
    transport: T,
    /// Held across `read_event` + `read_integer` so concurrent readers
    /// cannot split an event from its value.
    event_lock: Mutex<()>,
    mode: Mutex<CaptureMode>,
}

impl<T: ControlTransport> ControlDeviceController<T> {
    /// Open `config.device_name` and run the initialization sequence.
    ///
    /// # Errors
    /// `KwdError::ControllerInit` if any step fails. The channel is closed
    /// before returning.
    pub fn open(config: &ControlDeviceConfig) -> Result<Self> {
        let transport = T::open(&config.device_name)
            .map_err(|e| init_failed(&config.device_name, "open control channel", e))?;
        Self::with_transport(transport, config)
    }

    /// Run the initialization sequence on an already-open channel.
    ///
    /// Steps run in order (subscribe, unload topology, load topology) and
    /// the first failure aborts the whole sequence.
    pub fn with_transport(transport: T, config: &ControlDeviceConfig) -> Result<Self> {
        let name = config.device_name.as_str();

        transport
            .subscribe_events()
            .map_err(|e| init_failed(name, "subscribe to events", e))?;

        if config.reload_topology {
            transport
                .write_integer(DSP_TOPOLOGY_ELEMENT, DSP_UNLOAD)
                .map_err(|e| init_failed(name, "unload DSP topology", e))?;
            transport
                .write_integer(DSP_TOPOLOGY_ELEMENT, DSP_LOAD)
                .map_err(|e| init_failed(name, "load DSP topology", e))?;
        }

        info!(device = name, reload = config.reload_topology, "control device ready");

        Ok(Self {
            device_name: config.device_name.clone(),
            keyword: config.keyword.clone(),
            transport,
            event_lock: Mutex::new(()),
            mode: Mutex::new(CaptureMode::WakeOnVoice),
        })
    }

    pub fn capture_mode(&self) -> CaptureMode {
        *self.mode.lock()
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl<T: ControlTransport> HardwareController for ControlDeviceController<T> {
    fn read(&self, timeout: Duration) -> Result<Option<KeywordDetection>> {
        let ready = self
            .transport
            .poll(timeout)
            .map_err(|e| KwdError::Transport(format!("poll {}: {e}", self.device_name)))?;
        if ready == 0 {
            return Ok(None);
        }

        let raw = {
            let _event = self.event_lock.lock();
            self.transport
                .read_event()
                .map_err(|e| KwdError::Transport(format!("read event: {e}")))?;
            self.transport
                .read_integer(DETECT_ELEMENT)
                .map_err(|e| KwdError::Transport(format!("read {DETECT_ELEMENT}: {e}")))?
        };

        let (begin, end) = decode_offsets(raw)?;
        debug!(begin, end, "control device detection");
        Ok(Some(KeywordDetection::new(begin, end, self.keyword.clone())))
    }

    fn on_state_changed(&self, state: RecognizerState) {
        let target = CaptureMode::for_state(state);
        let mut mode = self.mode.lock();
        if *mode == target {
            return;
        }

        match self
            .transport
            .write_integer(CAPTURE_MODE_ELEMENT, target.value())
        {
            Ok(()) => {
                debug!(?state, mode = ?target, "switched capture mode");
                *mode = target;
            }
            Err(e) => warn!(?state, mode = ?target, "failed to switch capture mode: {e}"),
        }
    }

    fn name(&self) -> &str {
        "control-device"
    }
}

fn init_failed(device: &str, step: &str, e: io::Error) -> KwdError {
    KwdError::ControllerInit(format!("{device}: {step}: {e}"))
}

/// Split the combined detect value into `(begin, end)` hardware offsets.
fn decode_offsets(raw: i64) -> Result<(i64, i64)> {
    let value = u32::try_from(raw)
        .map_err(|_| KwdError::Decode(format!("detect value {raw} is not a 32-bit word")))?;
    let begin = i64::from(value & 0xFFFF);
    let end = i64::from(value >> 16);
    Ok((begin, end))
}
