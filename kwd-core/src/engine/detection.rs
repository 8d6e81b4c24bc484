//! Detection loop and stream-index correction.

use std::sync::{atomic::Ordering, Arc};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{DetectorDiagnostics, Shared};
use crate::{controller::KeywordDetection, observer::DetectorState};

/// Pause after a transport error so a dead controller cannot spin the loop.
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Translate controller-relative offsets into absolute stream indices.
///
/// With both offsets present the result is
/// `(index + begin - offset, index + end - offset)` where `offset` is
/// `correction` once the tracker has published a position and `0` before.
/// Otherwise the keyword start is unknown: `(None, Some(index))`.
///
/// Results are not clamped and may be negative.
pub fn correct_indices(
    stream_index: u64,
    detection: &KeywordDetection,
    correction: i64,
) -> (Option<i64>, Option<i64>) {
    let index = i64::try_from(stream_index).unwrap_or(i64::MAX);
    match (detection.begin(), detection.end()) {
        (Some(begin), Some(end)) => {
            let offset = if stream_index == 0 { 0 } else { correction };
            (
                Some(index.saturating_add(begin).saturating_sub(offset)),
                Some(index.saturating_add(end).saturating_sub(offset)),
            )
        }
        _ => (None, Some(index)),
    }
}

/// Poll the controller until shutdown, fanning detections out to observers.
///
/// Keeps running after the stream tracker has exited; detections then carry
/// the last published index.
pub(crate) fn run(shared: Arc<Shared>) {
    let diag = &shared.diagnostics;
    let poll_timeout = shared.config.poll_timeout;
    let correction = shared.config.index_correction;

    info!(controller = shared.controller.name(), "detection loop started");
    shared.notify_state(DetectorState::Active);

    while !shared.is_shutting_down() {
        DetectorDiagnostics::bump(&diag.controller_reads);

        match shared.controller.read(poll_timeout) {
            Ok(None) => DetectorDiagnostics::bump(&diag.controller_timeouts),
            Ok(Some(detection)) => {
                let index = shared.stream_index.load(Ordering::Acquire);
                let (begin, end) = correct_indices(index, &detection, correction);
                DetectorDiagnostics::bump(&diag.detections);
                debug!(
                    keyword = detection.keyword(),
                    index,
                    ?begin,
                    ?end,
                    "keyword detected"
                );
                shared.keyword_observers.notify(|o| {
                    o.on_keyword_detected(&shared.stream, detection.keyword(), begin, end)
                });
            }
            Err(e) if e.is_decode() => {
                DetectorDiagnostics::bump(&diag.controller_errors);
                debug!("discarding malformed detection: {e}");
            }
            Err(e) => {
                DetectorDiagnostics::bump(&diag.controller_errors);
                warn!(controller = shared.controller.name(), "controller read failed: {e}");
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }

    info!("detection loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concrete_offsets_are_corrected_after_first_read() {
        let d = KeywordDetection::new(100, 500, "alexa");
        assert_eq!(correct_indices(20_000, &d, 9_000), (Some(11_100), Some(11_500)));
    }

    #[test]
    fn no_correction_before_tracker_publishes() {
        let d = KeywordDetection::new(100, 500, "alexa");
        assert_eq!(correct_indices(0, &d, 9_000), (Some(100), Some(500)));
    }

    #[test]
    fn unspecified_offsets_anchor_at_stream_index() {
        let d = KeywordDetection::unspecified("alexa");
        assert_eq!(correct_indices(48_000, &d, 9_000), (None, Some(48_000)));
        assert_eq!(correct_indices(0, &d, 9_000), (None, Some(0)));
    }

    #[test]
    fn one_missing_offset_counts_as_unspecified() {
        let d = KeywordDetection::from_raw(-1, 500, "alexa");
        assert_eq!(correct_indices(1_000, &d, 9_000), (None, Some(1_000)));
    }

    #[test]
    fn early_detections_may_go_negative() {
        let d = KeywordDetection::new(0, 10, "alexa");
        assert_eq!(correct_indices(320, &d, 9_000), (Some(-8_680), Some(-8_670)));
    }

    #[test]
    fn custom_correction_is_applied() {
        let d = KeywordDetection::new(10, 20, "alexa");
        assert_eq!(correct_indices(1_000, &d, 0), (Some(1_010), Some(1_020)));
    }
}
