//! Observer contracts and the weak-reference registry the detector uses.
//!
//! The detector never keeps an observer alive: registrations are `Weak`, so
//! dropping the last `Arc` on the caller's side is an implicit unregister.
//! Dead entries are pruned the next time the set is notified.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::buffering::AudioStream;

/// State reported to `DetectorStateObserver`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DetectorState {
    /// The detection loop is running.
    Active,
    /// The audio stream closed; the stream index no longer advances.
    StreamClosed,
    /// The audio stream failed; the stream index no longer advances.
    Error,
}

/// Receives keyword detections translated into stream coordinates.
pub trait KeywordObserver: Send + Sync + 'static {
    /// `begin`/`end` are absolute stream indices. `begin == None` means the
    /// keyword start is unknown and `end` is the reader position when the
    /// detection arrived.
    fn on_keyword_detected(
        &self,
        stream: &Arc<dyn AudioStream>,
        keyword: &str,
        begin: Option<i64>,
        end: Option<i64>,
    );
}

/// Receives detector state transitions.
pub trait DetectorStateObserver: Send + Sync + 'static {
    fn on_detector_state_changed(&self, state: DetectorState);
}

/// Set of weakly-held observers. Membership is by pointer identity.
pub struct ObserverSet<T: ?Sized> {
    entries: Mutex<Vec<Weak<T>>>,
}

impl<T: ?Sized> Default for ObserverSet<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<T: ?Sized> ObserverSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `observer`. Returns `false` if it was already a member.
    pub fn add(&self, observer: &Arc<T>) -> bool {
        let mut entries = self.entries.lock();
        entries.retain(|w| w.strong_count() > 0);
        if entries.iter().any(|w| same(w, observer)) {
            return false;
        }
        entries.push(Arc::downgrade(observer));
        true
    }

    /// Unregister `observer`. Returns `false` if it was not a member.
    pub fn remove(&self, observer: &Arc<T>) -> bool {
        let mut entries = self.entries.lock();
        let mut found = false;
        entries.retain(|w| {
            if same(w, observer) {
                found = true;
                return false;
            }
            w.strong_count() > 0
        });
        found
    }

    /// Number of live observers.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call `f` on every live observer.
    ///
    /// The registry lock is released before any callback runs, so observers
    /// may add or remove registrations from inside `f`.
    pub fn notify(&self, mut f: impl FnMut(&T)) {
        let live: Vec<Arc<T>> = {
            let mut entries = self.entries.lock();
            entries.retain(|w| w.strong_count() > 0);
            entries.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in &live {
            f(observer.as_ref());
        }
    }
}

fn same<T: ?Sized>(weak: &Weak<T>, strong: &Arc<T>) -> bool {
    std::ptr::addr_eq(weak.as_ptr(), Arc::as_ptr(strong))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        states: AtomicUsize,
    }

    impl DetectorStateObserver for Counter {
        fn on_detector_state_changed(&self, _state: DetectorState) {
            self.states.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn as_dyn(c: &Arc<Counter>) -> Arc<dyn DetectorStateObserver> {
        Arc::clone(c) as Arc<dyn DetectorStateObserver>
    }

    #[test]
    fn same_observer_is_registered_once() {
        let set: ObserverSet<dyn DetectorStateObserver> = ObserverSet::new();
        let counter = Arc::new(Counter::default());
        let obs = as_dyn(&counter);

        assert!(set.add(&obs));
        assert!(!set.add(&obs));
        assert_eq!(set.len(), 1);

        set.notify(|o| o.on_detector_state_changed(DetectorState::Active));
        assert_eq!(counter.states.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_reports_membership() {
        let set: ObserverSet<dyn DetectorStateObserver> = ObserverSet::new();
        let obs = as_dyn(&Arc::new(Counter::default()));
        assert!(!set.remove(&obs));
        set.add(&obs);
        assert!(set.remove(&obs));
        assert!(set.is_empty());
    }

    #[test]
    fn dropped_observers_are_pruned_and_never_called() {
        let set: ObserverSet<dyn DetectorStateObserver> = ObserverSet::new();
        let kept = Arc::new(Counter::default());
        let kept_dyn = as_dyn(&kept);
        set.add(&kept_dyn);
        {
            let transient = as_dyn(&Arc::new(Counter::default()));
            set.add(&transient);
            assert_eq!(set.len(), 2);
        }
        assert_eq!(set.len(), 1);

        let mut calls = 0;
        set.notify(|o| {
            calls += 1;
            o.on_detector_state_changed(DetectorState::StreamClosed);
        });
        assert_eq!(calls, 1);
        assert_eq!(kept.states.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn observers_may_mutate_the_set_while_notified() {
        let set: Arc<ObserverSet<dyn DetectorStateObserver>> = Arc::new(ObserverSet::new());
        let obs = as_dyn(&Arc::new(Counter::default()));
        set.add(&obs);
        set.notify(|_| {
            set.remove(&obs);
        });
        assert!(set.is_empty());
    }
}
