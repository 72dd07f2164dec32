//! Difficulty retargeting.
//!
//! The default difficulty aims at roughly 24 hours of sequential work on
//! reference hardware. Every `adjustment_interval_days`, the controller
//! takes the median completion time reported across known validators over
//! the interval; if it diverges from the target by more than 10%, the
//! difficulty is rescaled by `target / median`, bounded per adjustment to
//! the range [÷2, ×2]. Only the median is used, so outliers cannot steer
//! the adjustment.

use std::collections::BTreeMap;
use tracing::{debug, info};

/// Target sequential-work duration per day, in seconds.
pub const TARGET_SECONDS_PER_DAY: f64 = 86_400.0;

/// Relative divergence below which no adjustment is made.
const ADJUSTMENT_DEADBAND: f64 = 0.10;

/// Per-adjustment scale bounds.
const MAX_SCALE_UP: f64 = 2.0;
const MAX_SCALE_DOWN: f64 = 0.5;

/// Median of a sample set; `None` when empty.
pub fn median(mut samples: Vec<f64>) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_by(|a, b| a.partial_cmp(b).expect("completion times are finite"));
    Some(samples[samples.len() / 2])
}

/// Compute the next difficulty from the median completion time.
///
/// Returns the current difficulty unchanged when the median is within 10%
/// of the target.
pub fn adjusted_difficulty(current: u64, target_seconds: f64, median_seconds: f64) -> u64 {
    if median_seconds <= 0.0 {
        return current;
    }

    let divergence = (median_seconds - target_seconds).abs() / target_seconds;
    if divergence <= ADJUSTMENT_DEADBAND {
        return current;
    }

    let factor = (target_seconds / median_seconds).clamp(MAX_SCALE_DOWN, MAX_SCALE_UP);
    ((current as f64 * factor) as u64).max(1)
}

/// Tracks per-day completion observations and retargets on schedule.
///
/// Observations are durations in seconds, reported alongside day-proof
/// gossip. They are memory-resident working data for the policy, never
/// persisted.
#[derive(Debug)]
pub struct DifficultyController {
    difficulty: u64,
    adjustment_interval_days: u32,
    target_seconds: f64,
    /// Completion observations per day, across known validators.
    observations: BTreeMap<u64, Vec<f64>>,
}

impl DifficultyController {
    /// Create a controller at the given initial difficulty.
    pub fn new(initial_difficulty: u64, adjustment_interval_days: u32) -> Self {
        Self {
            difficulty: initial_difficulty,
            adjustment_interval_days: adjustment_interval_days.max(1),
            target_seconds: TARGET_SECONDS_PER_DAY,
            observations: BTreeMap::new(),
        }
    }

    /// Override the target duration (test scale).
    pub fn with_target_seconds(mut self, target_seconds: f64) -> Self {
        self.target_seconds = target_seconds;
        self
    }

    /// Current difficulty.
    pub fn difficulty(&self) -> u64 {
        self.difficulty
    }

    /// Record one validator's completion time for a day.
    pub fn record_completion(&mut self, day: u64, seconds: f64) {
        if seconds.is_finite() && seconds > 0.0 {
            self.observations.entry(day).or_default().push(seconds);
        }
    }

    /// Called when a day finalizes. On interval boundaries, retargets from
    /// the median of all observations in the closed interval and returns
    /// the new difficulty; otherwise returns `None`.
    pub fn on_day_finalized(&mut self, day: u64) -> Option<u64> {
        if day == 0 || day % u64::from(self.adjustment_interval_days) != 0 {
            return None;
        }

        let window_start = day.saturating_sub(u64::from(self.adjustment_interval_days));
        let samples: Vec<f64> = self
            .observations
            .range(window_start..=day)
            .flat_map(|(_, v)| v.iter().copied())
            .collect();

        let Some(median_seconds) = median(samples) else {
            debug!(day, "no completion observations in interval, keeping difficulty");
            return None;
        };

        let previous = self.difficulty;
        self.difficulty = adjusted_difficulty(previous, self.target_seconds, median_seconds);

        // Observations older than the closed window are no longer needed.
        self.observations = self.observations.split_off(&day);

        if self.difficulty != previous {
            info!(
                day,
                previous,
                next = self.difficulty,
                median_seconds,
                "difficulty adjusted"
            );
            Some(self.difficulty)
        } else {
            debug!(day, median_seconds, "median within deadband, difficulty unchanged");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_is_order_independent() {
        assert_eq!(median(vec![3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(vec![2.0, 3.0, 1.0]), Some(2.0));
        assert_eq!(median(vec![]), None);
    }

    #[test]
    fn test_no_adjustment_within_deadband() {
        // 5% fast: inside the 10% deadband.
        assert_eq!(adjusted_difficulty(1000, 100.0, 95.0), 1000);
        assert_eq!(adjusted_difficulty(1000, 100.0, 105.0), 1000);
    }

    #[test]
    fn test_adjustment_scales_by_target_over_median() {
        // Median at half the target: work finished too fast, difficulty up.
        assert_eq!(adjusted_difficulty(1000, 100.0, 50.0), 2000);
        // Median at double the target: difficulty down.
        assert_eq!(adjusted_difficulty(1000, 100.0, 200.0), 500);
    }

    #[test]
    fn test_adjustment_is_clamped() {
        // 10x too fast still only doubles.
        assert_eq!(adjusted_difficulty(1000, 100.0, 10.0), 2000);
        // 10x too slow still only halves.
        assert_eq!(adjusted_difficulty(1000, 100.0, 1000.0), 500);
    }

    #[test]
    fn test_outliers_cannot_steer_the_median() {
        let mut controller = DifficultyController::new(1000, 10).with_target_seconds(100.0);
        // Nine honest observations at target, one absurd outlier.
        for day in 1..=10 {
            controller.record_completion(day, 100.0);
        }
        controller.record_completion(10, 0.001);

        assert_eq!(controller.on_day_finalized(10), None);
        assert_eq!(controller.difficulty(), 1000);
    }

    #[test]
    fn test_adjustment_only_on_interval_boundary() {
        let mut controller = DifficultyController::new(1000, 10).with_target_seconds(100.0);
        controller.record_completion(3, 50.0);
        assert_eq!(controller.on_day_finalized(3), None);
        assert_eq!(controller.difficulty(), 1000);
    }

    #[test]
    fn test_interval_adjustment_applies() {
        let mut controller = DifficultyController::new(1000, 10).with_target_seconds(100.0);
        for day in 1..=10 {
            controller.record_completion(day, 50.0);
        }
        assert_eq!(controller.on_day_finalized(10), Some(2000));
        assert_eq!(controller.difficulty(), 2000);
    }
}
