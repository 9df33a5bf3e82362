//! Loss-of-lock detection from the board's control-signal history.
//!
//! While the lock holds, the feedback outputs drift slowly; losing the line
//! makes the integrator slew, which shows up as an abrupt spike in the time
//! derivative. The detector smooths each channel, differentiates, and runs
//! a thresholded peak pick over the recent half of the window — older
//! samples cannot trigger a "new" event.

use serde::{Deserialize, Serialize};

use crate::config::DetectorConfig;
use crate::data::Trace;
use crate::hardware::ControlHistory;

/// Which feedback output tripped the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlChannel {
    Fast,
    Slow,
}

/// A detected loss of lock.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UnlockEvent {
    pub channel: ControlChannel,
    /// Timestamp of the derivative spike, on the history's own time axis.
    pub detected_at: f64,
    /// Mean of the slow control output shortly before the spike; biases the
    /// next centering attempt's starting offset to follow the drift that
    /// caused the unlock.
    pub drift_estimate: f64,
}

/// Gaussian smoothing over samples, reflecting at the boundaries.
pub(crate) fn gaussian_smooth(y: &[f64], sigma: f64) -> Vec<f64> {
    if y.is_empty() || sigma <= 0.0 {
        return y.to_vec();
    }
    let radius = (4.0 * sigma).ceil() as isize;
    let mut kernel = Vec::with_capacity((2 * radius + 1) as usize);
    let mut norm = 0.0;
    for k in -radius..=radius {
        let w = (-(k as f64 * k as f64) / (2.0 * sigma * sigma)).exp();
        kernel.push(w);
        norm += w;
    }
    let n = y.len() as isize;
    let reflect = |i: isize| -> usize {
        // mirror indexing: -1 -> 0, -2 -> 1, n -> n-1, ...
        let mut i = i;
        loop {
            if i < 0 {
                i = -i - 1;
            } else if i >= n {
                i = 2 * n - i - 1;
            } else {
                return i as usize;
            }
        }
    };
    (0..n)
        .map(|i| {
            let mut acc = 0.0;
            for (j, w) in kernel.iter().enumerate() {
                acc += w * y[reflect(i + j as isize - radius)];
            }
            acc / norm
        })
        .collect()
}

/// Detector over both control channels.
#[derive(Debug, Clone)]
pub struct UnlockDetector {
    cfg: DetectorConfig,
}

impl UnlockDetector {
    pub fn new(cfg: DetectorConfig) -> Self {
        Self { cfg }
    }

    /// Check both channels independently; either firing is an unlock. When
    /// both fire, the earlier spike wins.
    pub fn check(&self, history: &ControlHistory) -> Option<UnlockEvent> {
        let fast = self.check_channel(
            &history.fast_control,
            &history.slow_control,
            ControlChannel::Fast,
            self.cfg.fast_threshold,
        );
        let slow = self.check_channel(
            &history.slow_control,
            &history.slow_control,
            ControlChannel::Slow,
            self.cfg.slow_threshold,
        );
        match (fast, slow) {
            (Some(a), Some(b)) => Some(if a.detected_at <= b.detected_at { a } else { b }),
            (a, b) => a.or(b),
        }
    }

    fn check_channel(
        &self,
        signal: &Trace,
        slow: &Trace,
        channel: ControlChannel,
        threshold: f64,
    ) -> Option<UnlockEvent> {
        if signal.len() < 4 {
            return None;
        }
        let dt = signal.step();
        if dt <= 0.0 {
            return None;
        }
        let smoothed = gaussian_smooth(&signal.y, self.cfg.smoothing_sigma);
        let deriv: Vec<f64> = smoothed.windows(2).map(|w| (w[1] - w[0]) / dt).collect();

        // Peaks in |d| above threshold, newest half of the window only.
        let half = deriv.len() / 2;
        let mut hit: Option<usize> = None;
        for i in half.max(1)..deriv.len().saturating_sub(1) {
            let d = deriv[i].abs();
            if d > threshold && d >= deriv[i - 1].abs() && d > deriv[i + 1].abs() {
                hit = Some(i);
                break;
            }
        }
        let i = hit?;
        let detected_at = signal.x[i];
        log::info!(
            "unlock spike on {:?} channel at t={detected_at:.3}s (|d|={:.3})",
            channel,
            deriv[i].abs()
        );
        Some(UnlockEvent {
            channel,
            detected_at,
            drift_estimate: self.drift_before(slow, detected_at),
        })
    }

    /// Mean of the slow control output over a short window ending just
    /// before `t_unlock`; the feedback was still following the drift there.
    fn drift_before(&self, slow: &Trace, t_unlock: f64) -> f64 {
        let hi = t_unlock - self.cfg.drift_gap;
        let lo = hi - self.cfg.drift_window;
        let mut sum = 0.0;
        let mut count = 0usize;
        for (&t, &v) in slow.x.iter().zip(slow.y.iter()) {
            if t >= lo && t <= hi {
                sum += v;
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }
}
