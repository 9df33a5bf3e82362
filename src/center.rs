//! Search-and-center feedback loop.
//!
//! Starting from a locator candidate, the controller nudges the scan offset
//! until the reference feature sits well inside the sweep with a stable
//! shift estimate, then hands the lock region over to the board-side
//! autolock. One [`step`](CenteringController::step) is one bounded unit of
//! work (a single sweep acquisition plus scoring), so the supervisor can
//! interleave it with its other duties.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::align;
use crate::catalog::ReferenceLine;
use crate::config::CenteringConfig;
use crate::data::Trace;
use crate::error::LockError;
use crate::hardware::{to_raw_counts, HardwareError, HardwareLink};
use crate::locate::LockCandidate;

/// Offset perturbations tried, in units of the retry jump, when the line
/// refuses to show up at the expected position. The leading zero is the
/// starting offset itself.
const RETRY_LADDER: [f64; 7] = [0.0, 1.0, -1.0, 2.0, -2.0, 3.0, -3.0];

/// Outcome of an autolock handoff.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LockIssued {
    /// Final centered scan offset, volts.
    pub offset: f64,
    /// Whether the board confirmed the lock before the wait bound. A failed
    /// confirmation still terminates the attempt; it is reported, not
    /// retried here.
    pub locked: bool,
}

/// Result of one controller step.
#[derive(Debug, Clone, Copy)]
pub enum CenterStep {
    /// The attempt continues; call `step` again next tick.
    Pending,
    /// Autolock was issued and the attempt is over.
    Locked(LockIssued),
    /// The offset-retry ladder ran out without finding the line.
    Exhausted,
}

/// Feedback loop state for one centering attempt against one snapshotted
/// reference line.
pub struct CenteringController {
    line: ReferenceLine,
    cfg: CenteringConfig,
    lock_wait_timeout: Duration,

    offset: f64,
    start_offset: f64,
    vertical_bias: f64,
    primed: bool,

    consecutive_inside: u32,
    was_outside: bool,
    outside_window: VecDeque<bool>,
    shifts: VecDeque<f64>,
    retry_index: usize,
    last_retry: Instant,
}

impl CenteringController {
    /// Set up an attempt starting from the locator's candidate. The first
    /// step programs the hardware offsets before any sampling.
    pub fn new(
        line: ReferenceLine,
        candidate: &LockCandidate,
        cfg: CenteringConfig,
        lock_wait_timeout: Duration,
    ) -> Self {
        let window = cfg.outside_window;
        Self {
            line,
            cfg,
            lock_wait_timeout,
            offset: candidate.offset_volts,
            start_offset: candidate.offset_volts,
            vertical_bias: -candidate.vertical_offset,
            primed: false,
            consecutive_inside: 0,
            was_outside: true,
            outside_window: VecDeque::with_capacity(window),
            shifts: VecDeque::with_capacity(8),
            retry_index: 0,
            last_retry: Instant::now(),
        }
    }

    /// Current search offset, volts.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Run one iteration of the loop.
    pub fn step<H: HardwareLink>(&mut self, hw: &mut H) -> Result<CenterStep, LockError> {
        if !self.primed {
            // Counter the vertical offset found during the scan so the
            // feature's zero crossing sits at the board's zero.
            log::debug!(
                "centering {}: start offset {:.3} V, vertical bias {:.4} V",
                self.line.key,
                self.offset,
                self.vertical_bias
            );
            hw.set_offset(self.offset)?;
            hw.set_vertical_bias(self.vertical_bias)?;
            self.primed = true;
            return Ok(CenterStep::Pending);
        }

        let sweep = hw.acquire_sweep()?;
        let shift = align::find_shift(&sweep, &self.line.trace);
        let score = align::correlate(&sweep, &self.line);

        self.shifts.push_back(shift);
        if self.shifts.len() > 8 {
            self.shifts.pop_front();
        }

        let outside = score.coefficient < self.cfg.inside_min_coefficient
            || score.matched_fraction < self.cfg.inside_min_fraction;
        if outside && !self.was_outside {
            log::debug!("{}: line escaped the sweep window", self.line.key);
        } else if !outside && self.was_outside {
            log::debug!("{}: line is back inside", self.line.key);
        }
        self.was_outside = outside;
        self.consecutive_inside = if outside {
            0
        } else {
            self.consecutive_inside + 1
        };

        self.outside_window.push_back(outside);
        if self.outside_window.len() > self.cfg.outside_window {
            self.outside_window.pop_front();
        }

        // Line keeps vanishing: walk the retry ladder around the start
        // offset instead of nudging blind.
        let outside_count = self.outside_window.iter().filter(|&&o| o).count();
        if outside_count >= self.cfg.outside_trigger
            && self.last_retry.elapsed() >= self.cfg.retry_wait
        {
            if self.retry_index + 1 >= RETRY_LADDER.len() {
                log::warn!(
                    "{}: no usable offset found around {:.3} V",
                    self.line.key,
                    self.start_offset
                );
                return Ok(CenterStep::Exhausted);
            }
            self.retry_index += 1;
            self.offset = self.start_offset + RETRY_LADDER[self.retry_index] * self.cfg.retry_jump;
            self.last_retry = Instant::now();
            log::debug!("{}: retrying at offset {:.3} V", self.line.key, self.offset);
            hw.set_offset(self.offset)?;
            return Ok(CenterStep::Pending);
        }

        if self.consecutive_inside <= self.cfg.stable_count {
            return Ok(CenterStep::Pending);
        }

        // Enough consecutive sightings: is the shift estimate still moving?
        let recent: Vec<f64> = self
            .shifts
            .iter()
            .rev()
            .take(self.cfg.stable_count as usize - 1)
            .copied()
            .collect();
        let mean = recent.iter().sum::<f64>() / recent.len() as f64;
        let var = recent.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / recent.len() as f64;
        if var.sqrt() >= self.cfg.jitter_threshold {
            log::debug!("{}: shift jitter {:.4} V, not stable yet", self.line.key, var.sqrt());
            return Ok(CenterStep::Pending);
        }

        // Stable. Centered enough to hand off?
        let left = (self.line.trace.start() + shift) - sweep.start();
        let right = sweep.end() - (self.line.trace.end() + shift);
        let free_space = sweep.span() - self.line.linewidth();
        let margin = free_space * self.cfg.margin_fraction;
        if left > margin && right > margin {
            return Ok(CenterStep::Locked(self.issue_lock(hw, &sweep, shift)?));
        }

        // Nudge toward the deficient side and re-settle.
        if left < right {
            self.offset -= self.cfg.nudge_step;
        } else {
            self.offset += self.cfg.nudge_step;
        }
        log::debug!(
            "{}: margins {:.3}/{:.3} V, nudging to {:.3} V",
            self.line.key,
            left,
            right,
            self.offset
        );
        hw.set_offset(self.offset)?;
        self.consecutive_inside = 0;
        self.was_outside = true;
        Ok(CenterStep::Pending)
    }

    fn issue_lock<H: HardwareLink>(
        &self,
        hw: &mut H,
        sweep: &Trace,
        shift: f64,
    ) -> Result<LockIssued, LockError> {
        let lock_start = sweep.nearest_index(self.line.lock_start + shift);
        let lock_end = sweep.nearest_index(self.line.lock_end + shift);
        let raw = to_raw_counts(&sweep.y);
        log::info!(
            "{} centered at {:.3} V, engaging autolock over samples {}..{}",
            self.line.key,
            self.offset,
            lock_start,
            lock_end
        );
        hw.start_autolock(lock_start, lock_end, &raw)?;

        let locked = match hw.wait_for_lock_status(true, self.lock_wait_timeout) {
            Ok(()) => true,
            Err(HardwareError::Timeout { .. }) => {
                log::warn!("{}: board did not confirm the lock, releasing", self.line.key);
                hw.start_sweep_mode()?;
                false
            }
            Err(e) => return Err(e.into()),
        };
        Ok(LockIssued {
            offset: self.offset,
            locked,
        })
    }

    /// Drive the loop to completion. Convenience for hosts without a tick;
    /// the exhausted ladder maps to [`LockError::SearchExhausted`].
    pub fn center<H: HardwareLink>(mut self, hw: &mut H) -> Result<LockIssued, LockError> {
        loop {
            match self.step(hw)? {
                CenterStep::Pending => continue,
                CenterStep::Locked(issued) => return Ok(issued),
                CenterStep::Exhausted => return Err(LockError::SearchExhausted),
            }
        }
    }
}
