//! `SimulatedController`: trigger-driven controller for load and soak runs.
//!
//! Every `trigger()` arms one detection that becomes readable `interval`
//! later. The trigger slot holds a single token: a second trigger fired before
//! the first detection has been read waits until the slot frees up, so each
//! trigger yields exactly one detection and triggers never collapse or stack.
//!
//! Each controller owns its own slot; two instances never observe each
//! other's triggers.
//!
//! Every armed trigger is a sleeping thread until its token is read. At most
//! `MAX_PENDING_TRIGGERS` may be outstanding; further triggers are dropped
//! with a warning until the detection loop catches up.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, trace, warn};

use super::{HardwareController, KeywordDetection, RecognizerState};
use crate::error::{KwdError, Result};

/// Upper bound on triggers armed but not yet delivered to the slot.
pub const MAX_PENDING_TRIGGERS: usize = 8;

pub struct SimulatedController {
    interval: Duration,
    keyword: String,
    slot_tx: Sender<()>,
    slot_rx: Receiver<()>,
    pending: Arc<AtomicUsize>,
}

impl SimulatedController {
    pub fn new(interval: Duration, keyword: impl Into<String>) -> Self {
        let (slot_tx, slot_rx) = bounded(1);
        Self {
            interval,
            keyword: keyword.into(),
            slot_tx,
            slot_rx,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Triggers armed whose token has not reached the slot yet.
    pub fn pending_triggers(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Arm one detection `interval` from now.
    ///
    /// Dropped with a warning when `MAX_PENDING_TRIGGERS` are already
    /// outstanding.
    pub fn trigger(&self) {
        if self.pending.fetch_add(1, Ordering::AcqRel) >= MAX_PENDING_TRIGGERS {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            warn!(
                max = MAX_PENDING_TRIGGERS,
                "too many pending simulated triggers, dropping trigger"
            );
            return;
        }

        let tx = self.slot_tx.clone();
        let pending = Arc::clone(&self.pending);
        let interval = self.interval;
        let spawned = thread::Builder::new()
            .name("kwd-sim-trigger".into())
            .spawn(move || {
                thread::sleep(interval);
                // Blocks while an earlier token is unread; fails only once
                // the controller (and its receiver) is gone.
                if tx.send(()).is_err() {
                    trace!("simulated controller dropped before trigger fired");
                }
                pending.fetch_sub(1, Ordering::AcqRel);
            });
        if let Err(e) = spawned {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            warn!("failed to spawn simulated trigger thread: {e}");
        }
    }
}

impl HardwareController for SimulatedController {
    fn read(&self, timeout: Duration) -> Result<Option<KeywordDetection>> {
        match self.slot_rx.recv_timeout(timeout) {
            Ok(()) => {
                debug!(keyword = %self.keyword, "simulated detection");
                Ok(Some(KeywordDetection::unspecified(self.keyword.clone())))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            // Unreachable while `self` holds a sender; reported for completeness.
            Err(RecvTimeoutError::Disconnected) => {
                Err(KwdError::Transport("simulated trigger slot disconnected".into()))
            }
        }
    }

    fn on_state_changed(&self, state: RecognizerState) {
        if matches!(state, RecognizerState::Idle | RecognizerState::Finished) {
            debug!(?state, "dialog turn over, re-arming simulated trigger");
            self.trigger();
        }
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn read_times_out_without_trigger() {
        let ctrl = SimulatedController::new(Duration::from_millis(10), "alexa");
        let start = Instant::now();
        let read = ctrl.read(Duration::from_millis(50)).expect("read");
        assert!(read.is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn trigger_produces_one_unspecified_detection_after_interval() {
        let ctrl = SimulatedController::new(Duration::from_millis(40), "computer");
        let start = Instant::now();
        ctrl.trigger();

        let detection = ctrl
            .read(Duration::from_secs(2))
            .expect("read")
            .expect("detection after trigger");
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert_eq!(detection, KeywordDetection::unspecified("computer"));

        assert!(ctrl.read(Duration::from_millis(100)).expect("read").is_none());
    }

    #[test]
    fn timeout_shorter_than_interval_returns_none_first() {
        let ctrl = SimulatedController::new(Duration::from_millis(150), "alexa");
        ctrl.trigger();
        assert!(ctrl.read(Duration::from_millis(20)).expect("read").is_none());
        assert!(ctrl.read(Duration::from_secs(2)).expect("read").is_some());
    }

    #[test]
    fn back_to_back_triggers_do_not_collapse() {
        let ctrl = SimulatedController::new(Duration::from_millis(20), "alexa");
        ctrl.trigger();
        ctrl.trigger();

        // Give both trigger threads time to fire; only one fits in the slot.
        thread::sleep(Duration::from_millis(80));
        assert!(ctrl.read(Duration::from_millis(10)).expect("read").is_some());
        assert!(ctrl.read(Duration::from_millis(500)).expect("read").is_some());
        assert!(ctrl.read(Duration::from_millis(60)).expect("read").is_none());
    }

    #[test]
    fn finished_and_idle_states_rearm_but_others_do_not() {
        let ctrl = SimulatedController::new(Duration::from_millis(10), "alexa");
        ctrl.on_state_changed(RecognizerState::Recognizing);
        assert!(ctrl.read(Duration::from_millis(60)).expect("read").is_none());

        ctrl.on_state_changed(RecognizerState::Finished);
        assert!(ctrl.read(Duration::from_secs(1)).expect("read").is_some());

        ctrl.on_state_changed(RecognizerState::Idle);
        assert!(ctrl.read(Duration::from_secs(1)).expect("read").is_some());
    }

    #[test]
    fn instances_do_not_share_triggers() {
        let a = SimulatedController::new(Duration::from_millis(10), "a");
        let b = SimulatedController::new(Duration::from_millis(10), "b");
        a.trigger();
        assert!(b.read(Duration::from_millis(60)).expect("read").is_none());
        let got = a.read(Duration::from_secs(1)).expect("read").expect("detection");
        assert_eq!(got.keyword(), "a");
    }

    #[test]
    fn triggers_beyond_the_pending_limit_are_dropped() {
        let ctrl = SimulatedController::new(Duration::from_millis(20), "alexa");
        for _ in 0..MAX_PENDING_TRIGGERS * 2 + 4 {
            ctrl.trigger();
        }
        assert!(ctrl.pending_triggers() <= MAX_PENDING_TRIGGERS);

        thread::sleep(Duration::from_millis(60));
        let mut delivered = 0;
        while ctrl.read(Duration::from_millis(150)).expect("read").is_some() {
            delivered += 1;
        }
        assert_eq!(delivered, MAX_PENDING_TRIGGERS);
        assert_eq!(ctrl.pending_triggers(), 0);
    }
}
