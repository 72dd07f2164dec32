//! The memory-resident timing reference used for anomaly detection.
//!
//! This clock exists solely to notice peers that report day proofs faster
//! than sequential work permits. It is anchored at process start, lives
//! only in memory, implements no serialization, and is cleared on drop.
//! Nothing safety-relevant may be derived from it: wall-clock time is
//! assumed adversarial, and a restart simply re-anchors the reference.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Minimum calibration samples before the detector renders verdicts.
const MIN_CALIBRATION_SAMPLES: usize = 8;

/// Process-scoped monotonic reference for VDF anomaly detection.
pub struct TimingReference {
    anchor: Instant,
    inner: Mutex<TimingState>,
}

#[derive(Default)]
struct TimingState {
    /// Offset (since anchor) at which each day's window opened.
    day_started: HashMap<u64, Duration>,
    /// Observed completion durations, in seconds, feeding the percentile.
    calibration: Vec<f64>,
}

impl TimingReference {
    /// Anchor a new reference at the current instant.
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
            inner: Mutex::new(TimingState::default()),
        }
    }

    /// Monotonic offset since the anchor.
    pub fn now_offset(&self) -> Duration {
        self.anchor.elapsed()
    }

    /// Mark the opening of a day's computation window (the previous day
    /// finalized, everyone starts the next chain).
    pub fn observe_day_start(&self, day: u64) {
        let offset = self.now_offset();
        self.inner.lock().day_started.insert(day, offset);
    }

    /// Elapsed time since the day's window opened, if it was observed.
    pub fn elapsed_in_day(&self, day: u64) -> Option<Duration> {
        let started = *self.inner.lock().day_started.get(&day)?;
        Some(self.now_offset().saturating_sub(started))
    }

    /// Feed a completion duration into the calibration window.
    pub fn record_completion_sample(&self, duration: Duration) {
        let secs = duration.as_secs_f64();
        if secs.is_finite() && secs > 0.0 {
            self.inner.lock().calibration.push(secs);
        }
    }

    /// The 5th percentile of the calibration window, once enough samples
    /// have accumulated.
    pub fn fifth_percentile(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        if inner.calibration.len() < MIN_CALIBRATION_SAMPLES {
            return None;
        }
        let mut sorted = inner.calibration.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("samples are finite"));
        let index = (sorted.len() as f64 * 0.05).floor() as usize;
        Some(Duration::from_secs_f64(sorted[index.min(sorted.len() - 1)]))
    }

    /// Whether a peer's proof arrived implausibly fast.
    ///
    /// Conservative until calibrated: with fewer than the minimum samples,
    /// nothing is flagged.
    pub fn is_anomalously_fast(&self, delta: Duration) -> bool {
        match self.fifth_percentile() {
            Some(p5) => delta < p5,
            None => false,
        }
    }

    /// Drop state for days at or below the watermark.
    pub fn forget_before(&self, day: u64) {
        self.inner.lock().day_started.retain(|&d, _| d >= day);
    }
}

impl Default for TimingReference {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimingReference {
    fn drop(&mut self) {
        // Zeroize on the shutdown path: observations must not outlive the
        // process in any form.
        let mut inner = self.inner.lock();
        inner.day_started.clear();
        inner.calibration.clear();
        inner.calibration.shrink_to_fit();
    }
}

impl std::fmt::Debug for TimingReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Deliberately opaque: offsets must not leak into logs wholesale.
        f.debug_struct("TimingReference").finish_non_exhaustive()
    }
}
