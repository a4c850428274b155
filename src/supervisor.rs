//! Retry helpers shared by the background loops.
//!
//! Backoff policy and log-noise suppression for repeated failures.

use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Consecutive identical errors logged at WARN before dropping to DEBUG.
pub(crate) const MAX_CONSECUTIVE_SAME_ERROR: u32 = 3;

/// Error categories tracked for log suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ErrorKey {
    Dial,
    OpenStream,
    Rotation,
    BundleSync,
}

/// Counts consecutive occurrences of the same error kind.
///
/// The first [`MAX_CONSECUTIVE_SAME_ERROR`] occurrences of a kind are reported as
/// warnings; later ones should be logged at DEBUG. A different kind restarts the count.
#[derive(Debug)]
pub(crate) struct ErrorTracker {
    last_error_kind: Option<ErrorKey>,
    consecutive_same_error: u32,
    max_consecutive: u32,
}

impl ErrorTracker {
    pub(crate) fn new(max_consecutive: u32) -> Self {
        Self {
            last_error_kind: None,
            consecutive_same_error: 0,
            max_consecutive,
        }
    }

    /// Records one error and returns whether it should be logged at WARN.
    pub(crate) fn record_error(&mut self, error_kind: ErrorKey) -> bool {
        let should_warn = self.last_error_kind != Some(error_kind)
            || self.consecutive_same_error < self.max_consecutive;

        if self.last_error_kind == Some(error_kind) {
            self.consecutive_same_error += 1;
        } else {
            self.consecutive_same_error = 1;
            self.last_error_kind = Some(error_kind);
        }

        should_warn
    }

    pub(crate) fn reset(&mut self) {
        self.consecutive_same_error = 0;
        self.last_error_kind = None;
    }

    pub(crate) fn consecutive_count(&self) -> u32 {
        self.consecutive_same_error
    }

    pub(crate) fn last_error_kind(&self) -> Option<ErrorKey> {
        self.last_error_kind
    }
}

impl Default for ErrorTracker {
    fn default() -> Self {
        Self::new(MAX_CONSECUTIVE_SAME_ERROR)
    }
}

/// Sleeps for `dur`. Returns `true` if `token` was cancelled first.
pub(crate) async fn sleep_or_cancel(token: &CancellationToken, dur: Duration) -> bool {
    tokio::select! {
        () = token.cancelled() => true,
        () = sleep(dur) => false,
    }
}

/// Exponential backoff with small jitter.
///
/// Doubles `current`, clamps to `max`, then adds 0-10% jitter (still clamped to `max`).
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn next_backoff(current: Duration, max: Duration) -> Duration {
    let cur = current.as_millis().min(u128::from(u64::MAX)) as u64;
    let max = max.as_millis().min(u128::from(u64::MAX)) as u64;

    let base = cur.saturating_mul(2).min(max);
    if base == 0 {
        return Duration::ZERO;
    }

    let jitter = base / 10;
    let add = if jitter > 0 {
        fastrand::u64(0..=jitter)
    } else {
        0
    };

    Duration::from_millis(base.saturating_add(add).min(max))
}
