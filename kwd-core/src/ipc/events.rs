//! Serializable detector events and a broadcast fan-out observer.
//!
//! `BroadcastObserver` bridges the detector's synchronous callbacks onto
//! `tokio::sync::broadcast` channels so async consumers (and the harness)
//! can subscribe without implementing the observer traits themselves.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{
    buffering::AudioStream,
    observer::{DetectorState, DetectorStateObserver, KeywordObserver},
};

// ---------------------------------------------------------------------------
// Keyword events
// ---------------------------------------------------------------------------

/// One keyword detection in absolute stream coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    pub keyword: String,
    /// Absent when the controller could not locate the keyword start.
    pub begin: Option<i64>,
    pub end: Option<i64>,
}

// ---------------------------------------------------------------------------
// Detector state events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorStateEvent {
    pub seq: u64,
    pub state: DetectorState,
}

// ---------------------------------------------------------------------------
// Broadcast observer
// ---------------------------------------------------------------------------

/// Implements both observer traits by publishing events on broadcast
/// channels. Sends with no subscribers are dropped silently.
pub struct BroadcastObserver {
    seq: AtomicU64,
    keyword_tx: broadcast::Sender<KeywordEvent>,
    state_tx: broadcast::Sender<DetectorStateEvent>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (keyword_tx, _) = broadcast::channel(capacity.max(1));
        let (state_tx, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self {
            seq: AtomicU64::new(0),
            keyword_tx,
            state_tx,
        })
    }

    pub fn subscribe_keywords(&self) -> broadcast::Receiver<KeywordEvent> {
        self.keyword_tx.subscribe()
    }

    pub fn subscribe_states(&self) -> broadcast::Receiver<DetectorStateEvent> {
        self.state_tx.subscribe()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}

impl KeywordObserver for BroadcastObserver {
    fn on_keyword_detected(
        &self,
        _stream: &Arc<dyn AudioStream>,
        keyword: &str,
        begin: Option<i64>,
        end: Option<i64>,
    ) {
        let _ = self.keyword_tx.send(KeywordEvent {
            seq: self.next_seq(),
            keyword: keyword.to_string(),
            begin,
            end,
        });
    }
}

impl DetectorStateObserver for BroadcastObserver {
    fn on_detector_state_changed(&self, state: DetectorState) {
        let _ = self.state_tx.send(DetectorStateEvent {
            seq: self.next_seq(),
            state,
        });
    }
}
