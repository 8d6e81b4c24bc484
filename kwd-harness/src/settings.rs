//! Persistent harness settings (JSON file in the user data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kwd_core::{ControllerConfig, DetectorConfig};
use serde::{Deserialize, Serialize};

/// Environment variable overriding the settings file location.
pub const SETTINGS_ENV: &str = "KWD_SETTINGS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct HarnessSettings {
    pub controller: ControllerConfig,
    /// `silence`, `microphone` or `wav:<path>`.
    pub source: String,
    pub preferred_input_device: Option<String>,
    pub sample_rate_hz: u32,
    pub stream_capacity_secs: u32,
    pub poll_timeout_ms: u64,
    pub stream_read_timeout_ms: u64,
    pub ms_per_push: u64,
    pub index_correction: i64,
    /// Stop after this many seconds; `0` runs until Ctrl-C.
    pub run_secs: u64,
    pub event_capacity: usize,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            source: "silence".into(),
            preferred_input_device: None,
            sample_rate_hz: 16_000,
            stream_capacity_secs: 10,
            poll_timeout_ms: 250,
            stream_read_timeout_ms: 250,
            ms_per_push: 20,
            index_correction: kwd_core::engine::DEFAULT_INDEX_CORRECTION,
            run_secs: 0,
            event_capacity: 64,
        }
    }
}

/// Where audio for the shared stream comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Silence,
    Microphone,
    Wav(PathBuf),
}

impl HarnessSettings {
    pub fn normalize(&mut self) {
        self.source = normalize_source(&self.source);
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self.sample_rate_hz = self.sample_rate_hz.clamp(8_000, 48_000);
        self.stream_capacity_secs = self.stream_capacity_secs.clamp(1, 300);
        self.poll_timeout_ms = self.poll_timeout_ms.clamp(10, 5_000);
        self.stream_read_timeout_ms = self.stream_read_timeout_ms.clamp(10, 5_000);
        self.ms_per_push = self.ms_per_push.clamp(5, 1_000);
        self.index_correction = self.index_correction.max(0);
        self.event_capacity = self.event_capacity.clamp(1, 4_096);
    }

    pub fn source_kind(&self) -> SourceKind {
        match self.source.split_once(':') {
            Some(("wav", path)) => SourceKind::Wav(PathBuf::from(path)),
            _ if self.source == "microphone" => SourceKind::Microphone,
            _ => SourceKind::Silence,
        }
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            stream_read_timeout: Duration::from_millis(self.stream_read_timeout_ms),
            ms_per_push: self.ms_per_push,
            index_correction: self.index_correction,
        }
    }

    /// Ring capacity in words for the given capture rate.
    pub fn stream_capacity(&self, sample_rate_hz: u32) -> usize {
        self.stream_capacity_secs as usize * sample_rate_hz as usize
    }

    pub fn run_duration(&self) -> Option<Duration> {
        (self.run_secs > 0).then(|| Duration::from_secs(self.run_secs))
    }
}

pub fn normalize_source(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.split_once(':') {
        Some((kind, path)) if kind.eq_ignore_ascii_case("wav") && !path.trim().is_empty() => {
            format!("wav:{}", path.trim())
        }
        _ => {
            let lowered = trimmed.to_ascii_lowercase();
            match lowered.as_str() {
                "microphone" | "mic" => "microphone".into(),
                _ => "silence".into(),
            }
        }
    }
}

/// `$KWD_SETTINGS` if set, otherwise `default_settings_path()`.
pub fn settings_path() -> PathBuf {
    std::env::var_os(SETTINGS_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(default_settings_path)
}

pub fn default_settings_path() -> PathBuf {
    std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        })
        .join("kwd-harness")
        .join("settings.json")
}

pub fn load_settings(path: &Path) -> HarnessSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<HarnessSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &HarnessSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
