//! Interface to the feedback-controlled board.
//!
//! The board lives behind a remote parameter/RPC service; everything here
//! is the seam the engine talks through. Implementations are expected to
//! bound every call with a timeout and surface [`HardwareError::Timeout`]
//! instead of hanging — acquisitions are the only operations allowed to
//! block a supervisor tick.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::Trace;

/// Full-scale count of the board's signal path; sweep samples are
/// normalized volts = counts / `RAW_FULL_SCALE`, and the autolock payload
/// takes the counts back.
pub const RAW_FULL_SCALE: f64 = 8191.0;

/// Failures at the hardware seam.
#[derive(Debug, Error)]
pub enum HardwareError {
    /// An acquisition or lock-status wait exceeded its bound.
    #[error("{op} timed out after {timeout:?}")]
    Timeout {
        op: &'static str,
        timeout: Duration,
    },

    /// The connection to the board itself is gone. Not retried by the
    /// engine; delegated upward.
    #[error("hardware connection lost: {0}")]
    ConnectionLost(String),
}

/// Control-signal history returned by the board: the fast and slow feedback
/// outputs plus the optional monitor channel, each as a time/value trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlHistory {
    pub fast_control: Trace,
    pub slow_control: Trace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<Trace>,
}

/// Capabilities the engine needs from the board.
///
/// `set_offset`/`offset` and `set_vertical_bias`/`vertical_bias` are the
/// write/read pairs for the scan offset DAC and the analog error-signal
/// bias.
pub trait HardwareLink {
    /// Trigger one sweep and return its trace.
    fn acquire_sweep(&mut self) -> Result<Trace, HardwareError>;

    /// Fetch the recent control-signal history.
    fn acquire_history(&mut self) -> Result<ControlHistory, HardwareError>;

    /// Program the horizontal scan offset, in volts.
    fn set_offset(&mut self, volts: f64) -> Result<(), HardwareError>;

    /// Currently programmed scan offset.
    fn offset(&self) -> f64;

    /// Program the analog vertical bias applied to the error signal.
    fn set_vertical_bias(&mut self, volts: f64) -> Result<(), HardwareError>;

    /// Currently programmed vertical bias.
    fn vertical_bias(&self) -> f64;

    /// Hand the lock region and the raw sweep over to the board-side
    /// autolock algorithm.
    fn start_autolock(
        &mut self,
        lock_start: usize,
        lock_end: usize,
        raw_signal: &[i16],
    ) -> Result<(), HardwareError>;

    /// Block until the board reports the expected lock state, or time out.
    fn wait_for_lock_status(
        &mut self,
        expect_locked: bool,
        timeout: Duration,
    ) -> Result<(), HardwareError>;

    /// Release the board into free-running sweep mode (the safe state).
    fn start_sweep_mode(&mut self) -> Result<(), HardwareError>;
}

/// Convert normalized sweep volts back into the board's raw counts for the
/// autolock payload.
pub fn to_raw_counts(y: &[f64]) -> Vec<i16> {
    y.iter()
        .map(|&v| {
            (v * RAW_FULL_SCALE)
                .round()
                .clamp(i16::MIN as f64, i16::MAX as f64) as i16
        })
        .collect()
}
