//! Microphone source via cpal.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread and must not block or
//! allocate in steady state. It only downmixes to mono `i16` and pushes into
//! a lock-free SPSC ring (`ringbuf`). A pump thread moves samples from the
//! ring into the `SharedStream`, whose writer side takes a mutex.
//!
//! ```text
//! cpal callback ──push_slice──► HeapRb<i16> ──pop_slice──► pump thread ──► SharedStream
//! ```
//!
//! `cpal::Stream` is `!Send` on some platforms; create and drop
//! `MicrophoneCapture` on the same thread.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;

use anyhow::Result;
use kwd_core::SharedStream;

/// Handle to an active microphone capture and its pump thread.
#[cfg_attr(not(feature = "audio-cpal"), allow(dead_code))]
pub struct MicrophoneCapture {
    #[cfg(feature = "audio-cpal")]
    _stream: cpal::Stream,
    #[cfg(feature = "audio-cpal")]
    consumer: Option<ringbuf::HeapCons<i16>>,
    running: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
    /// Capture rate reported by the device (Hz).
    pub sample_rate: u32,
}

#[cfg(feature = "audio-cpal")]
mod imp {
    use std::thread;
    use std::time::Duration;

    use anyhow::{anyhow, Context};
    use cpal::{
        traits::{DeviceTrait, HostTrait, StreamTrait},
        SampleFormat, SampleRate, StreamConfig,
    };
    use ringbuf::{
        traits::{Consumer, Producer, Split},
        HeapRb,
    };
    use tracing::{debug, error, info, warn};

    use super::*;

    /// One second of ring at the device rate.
    const RING_SECS: usize = 1;
    const PUMP_IDLE: Duration = Duration::from_millis(5);

    impl MicrophoneCapture {
        /// Open an input device by preferred name, otherwise the default input.
        pub fn open(preferred_device_name: Option<&str>) -> Result<Self> {
            let host = cpal::default_host();

            let preferred = preferred_device_name.and_then(|wanted| {
                let found = host.input_devices().ok().and_then(|mut devices| {
                    devices.find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                });
                if found.is_none() {
                    warn!("preferred input device '{wanted}' not found, falling back");
                }
                found
            });
            let device = match preferred {
                Some(device) => device,
                None => host
                    .default_input_device()
                    .ok_or_else(|| anyhow!("no default input device"))?,
            };

            info!(
                device = device.name().unwrap_or_default().as_str(),
                "opening input device"
            );

            let supported = device
                .default_input_config()
                .context("query default input config")?;
            let sample_rate = supported.sample_rate().0;
            let channels = (supported.channels() as usize).max(1);
            info!(sample_rate, channels, "audio config selected");

            let config = StreamConfig {
                channels: supported.channels(),
                sample_rate: SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let (mut producer, consumer) =
                HeapRb::<i16>::new(sample_rate as usize * RING_SECS).split();
            let running = Arc::new(AtomicBool::new(true));
            let flag = Arc::clone(&running);
            let mut mono: Vec<i16> = Vec::new();

            let mut push = move |frames: &mut dyn Iterator<Item = i16>| {
                if !flag.load(Ordering::Relaxed) {
                    return;
                }
                mono.clear();
                mono.extend(frames);
                let written = producer.push_slice(&mono);
                if written < mono.len() {
                    warn!("ring buffer full: dropped {} frames", mono.len() - written);
                }
            };

            let on_error = |err: cpal::StreamError| error!("audio stream error: {err}");
            let stream = match supported.sample_format() {
                SampleFormat::F32 => device.build_input_stream(
                    &config,
                    move |data: &[f32], _info| {
                        push(&mut data.chunks_exact(channels).map(|frame| {
                            let avg = frame.iter().sum::<f32>() / channels as f32;
                            (avg.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
                        }))
                    },
                    on_error,
                    None,
                ),
                SampleFormat::I16 => device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| {
                        push(&mut data.chunks_exact(channels).map(|frame| {
                            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                            (sum / channels as i32) as i16
                        }))
                    },
                    on_error,
                    None,
                ),
                SampleFormat::U8 => device.build_input_stream(
                    &config,
                    move |data: &[u8], _info| {
                        push(&mut data.chunks_exact(channels).map(|frame| {
                            let sum: i32 = frame.iter().map(|&s| s as i32 - 128).sum();
                            ((sum / channels as i32) << 8) as i16
                        }))
                    },
                    on_error,
                    None,
                ),
                fmt => return Err(anyhow!("unsupported sample format: {fmt:?}")),
            }
            .context("build input stream")?;

            stream.play().context("start input stream")?;

            Ok(Self {
                _stream: stream,
                consumer: Some(consumer),
                running,
                pump: None,
                sample_rate,
            })
        }

        /// Start moving captured audio into `stream`.
        pub fn start_pump(&mut self, stream: SharedStream) -> Result<()> {
            let mut consumer = self
                .consumer
                .take()
                .ok_or_else(|| anyhow!("pump already started"))?;
            let running = Arc::clone(&self.running);
            let chunk = (self.sample_rate as usize / 50).max(1);

            let handle = thread::Builder::new()
                .name("kwd-mic-pump".into())
                .spawn(move || {
                    let mut buf = vec![0i16; chunk];
                    while running.load(Ordering::Acquire) {
                        let n = consumer.pop_slice(&mut buf);
                        if n == 0 {
                            thread::sleep(PUMP_IDLE);
                            continue;
                        }
                        if stream.write(&buf[..n]) == 0 {
                            debug!("stream closed, microphone pump exiting");
                            break;
                        }
                    }
                })
                .context("spawn microphone pump")?;
            self.pump = Some(handle);
            Ok(())
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
impl MicrophoneCapture {
    pub fn open(_preferred_device_name: Option<&str>) -> Result<Self> {
        anyhow::bail!("compiled without audio-cpal feature")
    }

    pub fn start_pump(&mut self, _stream: SharedStream) -> Result<()> {
        anyhow::bail!("compiled without audio-cpal feature")
    }
}

impl MicrophoneCapture {
    /// Signal the callback to no-op and join the pump.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.pump.take() {
            if handle.join().is_err() {
                tracing::warn!("microphone pump panicked");
            }
        }
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
