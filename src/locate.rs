//! Sweep a voltage range and find where each catalog line sits.
//!
//! The scan is an incremental job: every [`LineScan::step`] programs one
//! offset, acquires one trace, and scores it against every snapshotted
//! reference line, so the supervisor can spread a scan over its ticks. The
//! blocking [`locate`] wrapper drives the job to completion for hosts that
//! just want the answer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::align;
use crate::catalog::ReferenceLine;
use crate::data::Trace;
use crate::error::LockError;
use crate::hardware::HardwareLink;

/// Where the locator believes a line is, and what vertical bias would
/// center its level. Input to the centering controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockCandidate {
    pub line_key: String,
    /// Scan offset at which the line scored best.
    pub offset_volts: f64,
    /// Vertical offset of the found line relative to its reference,
    /// including the bias the hardware already applies.
    pub vertical_offset: f64,
}

/// Pick the best scan point for one line from its per-point coefficients
/// and matched fractions.
///
/// Walks the points from highest coefficient down and returns the first
/// whose matched fraction clears `min_fraction`; when none qualifies, the
/// last index examined is returned as a fallback. The globally
/// lowest-coefficient point is never examined at all.
// TODO: confirm with the lab whether the lowest-coefficient point should be
// eligible and what the fallback ought to return; both are kept exactly as
// the deployed behavior for now.
pub(crate) fn select_best(coefficients: &[f64], fractions: &[f64], min_fraction: f64) -> usize {
    if coefficients.is_empty() {
        return 0;
    }
    let mut order: Vec<usize> = (0..coefficients.len()).collect();
    order.sort_by(|&a, &b| {
        coefficients[a]
            .partial_cmp(&coefficients[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut ind = 0;
    for i in 0..order.len().saturating_sub(1) {
        ind = order[order.len() - 1 - i];
        if fractions[ind] > min_fraction {
            break;
        }
    }
    ind
}

/// One acquired scan point, handed back for live republishing.
#[derive(Debug, Clone)]
pub struct ScanPoint {
    pub index: usize,
    pub total: usize,
    pub offset: f64,
    pub trace: Trace,
}

/// In-progress scan over a voltage range against a snapshot of the catalog.
pub struct LineScan {
    offsets: Vec<f64>,
    next: usize,
    lines: Vec<ReferenceLine>,
    min_fraction: f64,
    // one row per line, one column per scan point
    coefficients: Vec<Vec<f64>>,
    fractions: Vec<Vec<f64>>,
    vertical_offsets: Vec<Vec<f64>>,
}

impl LineScan {
    /// Plan a scan of `points` evenly spaced offsets across `range`.
    pub fn new(range: (f64, f64), points: usize, lines: Vec<ReferenceLine>, min_fraction: f64) -> Self {
        let points = points.max(1);
        let (start, stop) = range;
        let step = if points > 1 {
            (stop - start) / (points - 1) as f64
        } else {
            0.0
        };
        let offsets: Vec<f64> = (0..points).map(|i| start + i as f64 * step).collect();
        let n_lines = lines.len();
        Self {
            offsets,
            next: 0,
            lines,
            min_fraction,
            coefficients: vec![Vec::with_capacity(points); n_lines],
            fractions: vec![Vec::with_capacity(points); n_lines],
            vertical_offsets: vec![Vec::with_capacity(points); n_lines],
        }
    }

    pub fn is_done(&self) -> bool {
        self.next >= self.offsets.len()
    }

    /// Acquire and score the next scan point. Returns `None` once all
    /// points are done.
    pub fn step<H: HardwareLink>(&mut self, hw: &mut H) -> Result<Option<ScanPoint>, LockError> {
        if self.is_done() {
            return Ok(None);
        }
        let index = self.next;
        let offset = self.offsets[index];
        log::debug!(
            "scan point {}/{} at offset {offset:.3} V",
            index + 1,
            self.offsets.len()
        );
        hw.set_offset(offset)?;
        let trace = hw.acquire_sweep()?;
        for (row, line) in self.lines.iter().enumerate() {
            let result = align::correlate(&trace, line);
            log::debug!(
                "  {}: coefficient {:.3}, fraction {:.2}, offset {:.4} V",
                line.key,
                result.coefficient,
                result.matched_fraction,
                result.offset
            );
            self.coefficients[row].push(result.coefficient);
            self.fractions[row].push(result.matched_fraction);
            self.vertical_offsets[row].push(result.offset);
        }
        self.next += 1;
        Ok(Some(ScanPoint {
            index,
            total: self.offsets.len(),
            offset,
            trace,
        }))
    }

    /// Select the best scan point per line and build the candidates.
    /// `vertical_bias` is the bias the hardware currently applies, folded
    /// into each candidate's vertical offset.
    pub fn finish(self, vertical_bias: f64) -> HashMap<String, LockCandidate> {
        let mut candidates = HashMap::new();
        for (row, line) in self.lines.iter().enumerate() {
            if self.coefficients[row].is_empty() {
                continue;
            }
            let best = select_best(
                &self.coefficients[row],
                &self.fractions[row],
                self.min_fraction,
            );
            let candidate = LockCandidate {
                line_key: line.key.clone(),
                offset_volts: self.offsets[best],
                vertical_offset: self.vertical_offsets[row][best] + vertical_bias,
            };
            log::info!(
                "line {} located at {:.3} V (coefficient {:.3})",
                line.key,
                candidate.offset_volts,
                self.coefficients[row][best]
            );
            candidates.insert(line.key.clone(), candidate);
        }
        candidates
    }
}

/// Run a whole scan to completion and return the candidates.
pub fn locate<H: HardwareLink>(
    hw: &mut H,
    lines: Vec<ReferenceLine>,
    range: (f64, f64),
    points: usize,
    min_fraction: f64,
) -> Result<HashMap<String, LockCandidate>, LockError> {
    let mut scan = LineScan::new(range, points, lines, min_fraction);
    while scan.step(hw)?.is_some() {}
    Ok(scan.finish(hw.vertical_bias()))
}
