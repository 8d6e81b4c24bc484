//! kwd-harness: drives a keyword detector against a live or synthetic stream.
//!
//! Prints every detector event as one JSON line on stdout; logs go to stderr.
//! With the simulated controller the harness re-arms the trigger after each
//! detection, which turns it into a soak test of the detection loop.

mod capture;
mod producer;
mod settings;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use kwd_core::{
    build_controller, AudioFormat, AudioStream, BroadcastObserver, ControllerConfig,
    ControllerHandle, Detector, DetectorStateObserver, KeywordObserver, RecognizerState,
    SharedStream,
};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use capture::MicrophoneCapture;
use producer::{load_wav, PacedProducer};
use settings::{load_settings, save_settings, settings_path, HarnessSettings, SourceKind};

/// One line of harness output.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutputLine<'a, T: Serialize> {
    timestamp: DateTime<Utc>,
    kind: &'a str,
    #[serde(flatten)]
    event: &'a T,
}

fn emit<T: Serialize>(kind: &str, event: &T) {
    let line = OutputLine {
        timestamp: Utc::now(),
        kind,
        event,
    };
    match serde_json::to_string(&line) {
        Ok(json) => println!("{json}"),
        Err(e) => warn!("failed to serialize {kind} event: {e}"),
    }
}

/// Feeds `Finished` back to the controller after every detection so a
/// simulated controller fires again one interval later.
struct Rearm {
    controller: ControllerHandle,
}

impl KeywordObserver for Rearm {
    fn on_keyword_detected(
        &self,
        _stream: &Arc<dyn AudioStream>,
        _keyword: &str,
        _begin: Option<i64>,
        _end: Option<i64>,
    ) {
        self.controller.on_state_changed(RecognizerState::Finished);
    }
}

enum Source {
    Paced(PacedProducer),
    Microphone(MicrophoneCapture),
}

impl Source {
    fn stop(&mut self) {
        match self {
            Source::Paced(p) => p.stop(),
            Source::Microphone(m) => m.stop(),
        }
    }
}

/// Open the configured source and the shared stream it writes into.
fn open_source(settings: &HarnessSettings) -> Result<(Source, SharedStream, AudioFormat)> {
    match settings.source_kind() {
        SourceKind::Silence => {
            let format = AudioFormat::with_sample_rate(settings.sample_rate_hz);
            let stream = SharedStream::new(settings.stream_capacity(format.sample_rate_hz));
            let producer = PacedProducer::silence(stream.clone(), format, settings.ms_per_push)?;
            Ok((Source::Paced(producer), stream, format))
        }
        SourceKind::Wav(path) => {
            let clip = load_wav(&path)?;
            let format = AudioFormat::with_sample_rate(clip.sample_rate_hz);
            let stream = SharedStream::new(settings.stream_capacity(format.sample_rate_hz));
            let producer =
                PacedProducer::spawn(stream.clone(), clip.samples, format, settings.ms_per_push)?;
            Ok((Source::Paced(producer), stream, format))
        }
        SourceKind::Microphone => {
            let mut capture = MicrophoneCapture::open(settings.preferred_input_device.as_deref())?;
            let format = AudioFormat::with_sample_rate(capture.sample_rate);
            let stream = SharedStream::new(settings.stream_capacity(format.sample_rate_hz));
            capture.start_pump(stream.clone())?;
            Ok((Source::Microphone(capture), stream, format))
        }
    }
}

fn spawn_printer<T>(kind: &'static str, mut rx: broadcast::Receiver<T>) -> tokio::task::JoinHandle<()>
where
    T: Serialize + Clone + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => emit(kind, &event),
                Err(RecvError::Lagged(n)) => warn!(kind, "output lagged, {n} events dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kwd_core=info,kwd_harness=info".into()),
        )
        .init();

    // ── Settings ──────────────────────────────────────────────────────────
    let path = settings_path();
    let settings = load_settings(&path);
    if !path.exists() {
        if let Err(e) = save_settings(&path, &settings) {
            warn!(settings_path = ?path, "could not write default settings: {e}");
        }
    }
    info!(
        settings_path = ?path,
        source = %settings.source,
        controller = ?settings.controller,
        run_secs = settings.run_secs,
        "harness settings loaded"
    );

    // ── Stream + producer ─────────────────────────────────────────────────
    let (mut source, stream, format) = open_source(&settings).context("open audio source")?;
    info!(
        sample_rate = format.sample_rate_hz,
        capacity = stream.capacity(),
        "shared stream ready"
    );

    // ── Controller + detector ─────────────────────────────────────────────
    let controller = build_controller(&settings.controller).context("build controller")?;
    let broadcast = BroadcastObserver::new(settings.event_capacity);
    let keyword_printer = spawn_printer("keyword", broadcast.subscribe_keywords());
    let state_printer = spawn_printer("state", broadcast.subscribe_states());

    let simulated = matches!(settings.controller, ControllerConfig::Simulated { .. });
    let rearm: Arc<dyn KeywordObserver> = Arc::new(Rearm {
        controller: Arc::clone(&controller),
    });
    let mut keyword_observers: Vec<Arc<dyn KeywordObserver>> =
        vec![broadcast.clone() as Arc<dyn KeywordObserver>];
    if simulated {
        keyword_observers.push(Arc::clone(&rearm));
    }
    let state_observers: Vec<Arc<dyn DetectorStateObserver>> =
        vec![broadcast.clone() as Arc<dyn DetectorStateObserver>];

    let detector = Detector::create(
        Arc::new(stream.clone()),
        format,
        Arc::clone(&controller),
        keyword_observers,
        state_observers,
        settings.detector_config(),
    )
    .context("start detector")?;

    if simulated {
        // Kick off the first trigger; `Rearm` keeps the loop going.
        controller.on_state_changed(RecognizerState::Idle);
    }

    // ── Run ───────────────────────────────────────────────────────────────
    let run_duration = settings.run_duration();
    let deadline = async {
        match run_duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!("ctrl-c handler failed: {e}");
            }
            info!("interrupted, shutting down");
        }
        _ = deadline => info!("run time elapsed, shutting down"),
    }

    // ── Shutdown ──────────────────────────────────────────────────────────
    let snapshot = tokio::task::spawn_blocking(move || {
        detector.shutdown();
        detector.diagnostics_snapshot()
    })
    .await
    .context("join detector shutdown")?;

    source.stop();
    stream.close();
    drop(rearm);
    drop(broadcast);
    let _ = tokio::join!(keyword_printer, state_printer);

    emit("diagnostics", &snapshot);
    info!(?snapshot, "harness finished");
    Ok(())
}
