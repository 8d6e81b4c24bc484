//! Real-time paced producers feeding the shared stream.
//!
//! Each producer runs on its own named thread and writes one push of
//! `ms_per_push` audio per period, so the stream index advances at the
//! nominal sample rate regardless of where the samples come from.

use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader};
use kwd_core::{AudioFormat, SharedStream};
use tracing::{debug, info, warn};

/// Mono 16-bit samples decoded from a WAV file.
pub struct Clip {
    pub samples: Vec<i16>,
    pub sample_rate_hz: u32,
}

/// Decode a 16-bit integer WAV, averaging channels down to mono.
pub fn load_wav(path: &Path) -> Result<Clip> {
    let mut reader =
        WavReader::open(path).with_context(|| format!("open wav {}", path.display()))?;
    let spec = reader.spec();
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        bail!(
            "{}: expected 16-bit integer PCM, got {}-bit {:?}",
            path.display(),
            spec.bits_per_sample,
            spec.sample_format
        );
    }

    let interleaved = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("decode wav {}", path.display()))?;
    let samples = downmix(&interleaved, spec.channels as usize);
    if samples.is_empty() {
        bail!("{}: no samples", path.display());
    }

    info!(
        path = %path.display(),
        sample_rate = spec.sample_rate,
        channels = spec.channels,
        frames = samples.len(),
        "wav clip loaded"
    );
    Ok(Clip {
        samples,
        sample_rate_hz: spec.sample_rate,
    })
}

/// Average interleaved frames to mono.
pub fn downmix(interleaved: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Handle to a running producer thread. Dropping it stops the thread.
pub struct PacedProducer {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PacedProducer {
    /// Loop `clip` into `stream` forever, one push per `ms_per_push`.
    pub fn spawn(
        stream: SharedStream,
        clip: Vec<i16>,
        format: AudioFormat,
        ms_per_push: u64,
    ) -> Result<Self> {
        if clip.is_empty() {
            bail!("producer clip is empty");
        }
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let chunk = format.words_for_ms(ms_per_push);
        let period = Duration::from_millis(ms_per_push.max(1));

        let thread = thread::Builder::new()
            .name("kwd-producer".into())
            .spawn(move || pace(stream, clip, chunk, period, flag))
            .context("spawn producer thread")?;

        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    /// Zero-valued audio at the nominal rate.
    pub fn silence(stream: SharedStream, format: AudioFormat, ms_per_push: u64) -> Result<Self> {
        let chunk = format.words_for_ms(ms_per_push);
        Self::spawn(stream, vec![0i16; chunk], format, ms_per_push)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("producer thread panicked");
            }
        }
    }
}

impl Drop for PacedProducer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pace(
    stream: SharedStream,
    clip: Vec<i16>,
    chunk: usize,
    period: Duration,
    running: Arc<AtomicBool>,
) {
    let mut buf = Vec::with_capacity(chunk);
    let mut cursor = 0usize;
    let mut next = Instant::now();

    debug!(chunk, period_ms = period.as_millis() as u64, "producer started");
    while running.load(Ordering::Acquire) {
        buf.clear();
        while buf.len() < chunk {
            let take = (chunk - buf.len()).min(clip.len() - cursor);
            buf.extend_from_slice(&clip[cursor..cursor + take]);
            cursor = (cursor + take) % clip.len();
        }
        if stream.write(&buf) == 0 {
            debug!("stream closed, producer exiting");
            break;
        }

        next += period;
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else {
            // Fell behind (suspended, overloaded); restart the schedule.
            next = now;
        }
    }
    debug!("producer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use kwd_core::buffering::{ReaderPolicy, StreamReader};

    #[test]
    fn downmix_averages_frames() {
        assert_eq!(downmix(&[100, 300, -50, 50], 2), vec![200, 0]);
        assert_eq!(downmix(&[1, 2, 3], 1), vec![1, 2, 3]);
    }

    #[test]
    fn producer_loops_clip_into_stream() {
        let stream = SharedStream::new(4_096);
        let mut reader = stream.reader(ReaderPolicy::Blocking);
        let format = AudioFormat::with_sample_rate(1_000);
        // 10 ms at 1 kHz = 10 words per push; clip of 4 wraps mid-chunk.
        let mut producer =
            PacedProducer::spawn(stream.clone(), vec![1, 2, 3, 4], format, 10).expect("spawn");

        let mut buf = [0i16; 10];
        let n = reader
            .read(&mut buf, Duration::from_secs(1))
            .expect("first push");
        assert_eq!(n, 10);
        assert_eq!(buf, [1, 2, 3, 4, 1, 2, 3, 4, 1, 2]);

        producer.stop();
        let written = stream.write_index();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(stream.write_index(), written);
    }

    #[test]
    fn producer_exits_when_stream_closes() {
        let stream = SharedStream::new(1_024);
        let mut producer =
            PacedProducer::silence(stream.clone(), AudioFormat::default(), 5).expect("spawn");
        stream.close();
        thread::sleep(Duration::from_millis(50));
        assert!(producer.thread.as_ref().is_some_and(|h| h.is_finished()));
        producer.stop();
    }

    #[test]
    fn missing_wav_is_an_error() {
        assert!(load_wav(Path::new("/nonexistent/clip.wav")).is_err());
    }
}
