//! Tuning constants for the locking engine.
//!
//! Organised into sub-configs per component. The defaults are the values
//! the system runs with in the lab; tests shrink the wall-clock bounds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Scanning
// ─────────────────────────────────────────────────────────────────────────────

/// Voltage scan parameters for the locator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// First offset of the wide (initial-acquisition) scan, volts.
    pub start: f64,
    /// Last offset of the wide scan, volts.
    pub stop: f64,
    /// Number of evenly spaced points in the wide scan.
    pub points: usize,
    /// Half-width of the narrow relock scan around the last known
    /// position, volts.
    pub relock_halfwidth: f64,
    /// Number of points in the narrow relock scan.
    pub relock_points: usize,
    /// Minimum matched fraction for a scan point to win `select_best`.
    pub min_fraction: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            start: 0.05,
            stop: 1.75,
            points: 40,
            relock_halfwidth: 0.12,
            relock_points: 7,
            min_fraction: 0.5,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Centering
// ─────────────────────────────────────────────────────────────────────────────

/// Feedback-loop parameters for the centering controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CenteringConfig {
    /// Minimum correlation coefficient for a sample to count as "inside".
    pub inside_min_coefficient: f64,
    /// Minimum matched fraction for a sample to count as "inside".
    pub inside_min_fraction: f64,
    /// Shift estimates must settle below this standard deviation (volts)
    /// before the position counts as stable.
    pub jitter_threshold: f64,
    /// Consecutive inside samples required before the stability check runs.
    pub stable_count: u32,
    /// Length of the sliding outside-sample window.
    pub outside_window: usize,
    /// Outside samples within the window that trigger an offset retry.
    pub outside_trigger: usize,
    /// Minimum wait between offset retries.
    pub retry_wait: Duration,
    /// Step size of the retry ladder, volts.
    pub retry_jump: f64,
    /// Nudge applied per centering correction, volts.
    pub nudge_step: f64,
    /// Fraction of the sweep's free space each margin must exceed before
    /// the feature counts as centered.
    pub margin_fraction: f64,
}

impl Default for CenteringConfig {
    fn default() -> Self {
        Self {
            inside_min_coefficient: 0.5,
            inside_min_fraction: 0.5,
            jitter_threshold: 0.05,
            stable_count: 5,
            outside_window: 6,
            outside_trigger: 4,
            retry_wait: Duration::from_secs(30),
            retry_jump: 0.04,
            nudge_step: 0.01,
            margin_fraction: 1.0 / 3.0,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unlock detection
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters of the control-history spike detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Gaussian smoothing width, in samples.
    pub smoothing_sigma: f64,
    /// Derivative height threshold for the fast control channel, V/s.
    pub fast_threshold: f64,
    /// Derivative height threshold for the slow control channel, V/s.
    pub slow_threshold: f64,
    /// Seconds between the detected spike and the end of the drift window.
    pub drift_gap: f64,
    /// Length of the drift-averaging window, seconds.
    pub drift_window: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            smoothing_sigma: 5.0,
            fast_threshold: 0.1,
            slow_threshold: 0.1,
            drift_gap: 1.0,
            drift_window: 5.0,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Monitoring
// ─────────────────────────────────────────────────────────────────────────────

/// Supervisor cadence and hardware wait bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interval between unlock-detector polls while monitoring.
    pub period: Duration,
    /// Bound on waiting for the board to report a lock after handoff.
    pub lock_wait_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(2),
            lock_wait_timeout: Duration::from_secs(50),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Top level
// ─────────────────────────────────────────────────────────────────────────────

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockConfig {
    pub scan: ScanConfig,
    pub centering: CenteringConfig,
    pub detector: DetectorConfig,
    pub monitor: MonitorConfig,
}
