//! Signal alignment and correlation scoring between a fresh sweep trace and
//! a stored reference line.
//!
//! The pipeline is: resample both traces onto a common grid, locate the
//! voltage shift that best aligns them via a full cross-correlation, crop
//! both to the overlapping window, fit the reference's amplitude and level
//! to the sweep, and score the match with a Pearson coefficient plus a
//! matched-fraction that penalizes coincidental short overlaps.

use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::catalog::ReferenceLine;
use crate::data::Trace;

/// Samples dropped from each end of a sweep before shift estimation; the
/// ramp turnaround leaves artifacts there.
const EDGE_TRIM: usize = 10;

/// Score of one (sweep, reference) comparison.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CorrelationResult {
    /// Pearson coefficient of the amplitude-matched overlap window, in
    /// `[-1, 1]`. Zero when the traces do not overlap.
    pub coefficient: f64,
    /// Overlap x-span divided by the reference's total x-span. A high
    /// coefficient over a sliver of the reference is not a match.
    pub matched_fraction: f64,
    /// Vertical offset from the affine fit: how far the sweep sits above
    /// the scaled reference.
    pub offset: f64,
}

impl CorrelationResult {
    fn no_match() -> Self {
        Self::default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resampling
// ─────────────────────────────────────────────────────────────────────────────

/// Linear interpolation of `(xs, ys)` at `x`, extrapolating from the end
/// segments outside the sampled range.
fn interp(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    debug_assert!(xs.len() == ys.len() && xs.len() >= 2);
    let n = xs.len();
    // Segment index: clamp so margins extrapolate from the outermost pair.
    let seg = match xs.partition_point(|&xi| xi <= x) {
        0 => 0,
        p if p >= n => n - 2,
        p => p - 1,
    };
    let (x0, x1) = (xs[seg], xs[seg + 1]);
    let (y0, y1) = (ys[seg], ys[seg + 1]);
    if (x1 - x0).abs() < f64::EPSILON {
        return y0;
    }
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

/// Resample a trace onto a uniform grid `start, start+dx, …` covering its
/// original x-range.
fn resample_onto(trace: &Trace, dx: f64) -> Trace {
    let start = trace.start();
    let end = trace.end();
    let mut x = Vec::new();
    let mut y = Vec::new();
    let mut k = 0usize;
    loop {
        let xi = start + k as f64 * dx;
        if xi >= end {
            break;
        }
        x.push(xi);
        y.push(interp(&trace.x, &trace.y, xi));
        k += 1;
    }
    Trace::new(x, y)
}

/// Bring two traces onto one step size by interpolating the finer onto the
/// coarser grid. Traces that already share a step pass through unchanged.
pub fn resample_to_common_grid(a: &Trace, b: &Trace) -> (Trace, Trace) {
    if a.len() < 2 || b.len() < 2 {
        return (a.clone(), b.clone());
    }
    let dx_a = a.step();
    let dx_b = b.step();
    if dx_a <= 0.0 || dx_b <= 0.0 {
        return (a.clone(), b.clone());
    }
    if dx_b < dx_a {
        (a.clone(), resample_onto(b, dx_a))
    } else if dx_a < dx_b {
        (resample_onto(a, dx_b), b.clone())
    } else {
        (a.clone(), b.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cross-correlation
// ─────────────────────────────────────────────────────────────────────────────

/// Full linear cross-correlation of `a` against `b` (output length
/// `a.len() + b.len() - 1`, index `k` ↔ lag `k - (b.len() - 1)`), computed
/// through zero-padded FFTs.
fn cross_correlate_full(a: &[f64], b: &[f64]) -> Vec<f64> {
    let n = a.len();
    let m = b.len();
    if n == 0 || m == 0 {
        return Vec::new();
    }
    let full = n + m - 1;
    let size = full.next_power_of_two();

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(size);
    let ifft = planner.plan_fft_inverse(size);

    let mut fa: Vec<Complex<f64>> = a
        .iter()
        .map(|&v| Complex::new(v, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(size)
        .collect();
    let mut fb: Vec<Complex<f64>> = b
        .iter()
        .map(|&v| Complex::new(v, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(size)
        .collect();
    fft.process(&mut fa);
    fft.process(&mut fb);

    for (va, vb) in fa.iter_mut().zip(fb.iter()) {
        *va *= vb.conj();
    }
    ifft.process(&mut fa);

    // fa[l mod size] now holds the correlation at lag l; unwrap the negative
    // lags from the tail of the buffer.
    let scale = 1.0 / size as f64;
    (0..full)
        .map(|k| {
            let lag = k as isize - (m as isize - 1);
            let idx = lag.rem_euclid(size as isize) as usize;
            fa[idx].re * scale
        })
        .collect()
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    let mut best_val = f64::NEG_INFINITY;
    for (i, &v) in values.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best = i;
        }
    }
    best
}

/// Voltage by which `reference` must be translated to best align with
/// `sweep`.
///
/// The sweep is trimmed by [`EDGE_TRIM`] samples per side before the
/// correlation. The winning lag is converted to volts from the common grid:
/// `shift = (sweep_start + lag·dx) − reference_start`, extrapolating the
/// grid for negative lags.
pub fn find_shift(sweep: &Trace, reference: &Trace) -> f64 {
    let trimmed = if sweep.len() > 2 * EDGE_TRIM + 2 {
        sweep.crop(EDGE_TRIM, sweep.len() - EDGE_TRIM)
    } else {
        sweep.clone()
    };
    let (s, r) = resample_to_common_grid(&trimmed, reference);
    if s.len() < 2 || r.is_empty() {
        return 0.0;
    }
    let dx = s.step();
    let corr = cross_correlate_full(&s.y, &r.y);
    if corr.is_empty() {
        return 0.0;
    }
    let lag = argmax(&corr) as isize - (r.len() as isize - 1);
    (s.start() + lag as f64 * dx) - r.start()
}

// ─────────────────────────────────────────────────────────────────────────────
// Overlap window and amplitude matching
// ─────────────────────────────────────────────────────────────────────────────

/// Crop `sweep` and the `shift`-translated `reference` to their common
/// x-range. Both returned traces have equal length; both are empty when the
/// ranges do not intersect.
pub fn overlap_window(sweep: &Trace, reference: &Trace, shift: f64) -> (Trace, Trace) {
    let (s, r) = resample_to_common_grid(sweep, reference);
    if s.is_empty() || r.is_empty() {
        return (Trace::empty(), Trace::empty());
    }
    let x_min = s.start().max(r.start() + shift);
    let x_max = s.end().min(r.end() + shift);
    if x_min >= x_max {
        return (Trace::empty(), Trace::empty());
    }
    let s_start = s.x.partition_point(|&xi| xi < x_min);
    let s_end = s.x.partition_point(|&xi| xi <= x_max);
    let r_start = r.x.partition_point(|&xi| xi + shift < x_min);
    let len = (s_end - s_start).min(r.len() - r_start);
    if len == 0 {
        return (Trace::empty(), Trace::empty());
    }
    (s.crop(s_start, s_start + len), r.crop(r_start, r_start + len))
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Least-squares `(scale, offset)` such that `scale·reference + offset`
/// matches the sweep's amplitude and vertical level without altering its
/// shape.
pub fn affine_match(sweep_y: &[f64], reference_y: &[f64]) -> (f64, f64) {
    let n = sweep_y.len().min(reference_y.len());
    let sweep_y = &sweep_y[..n];
    let reference_y = &reference_y[..n];
    let m_s = mean(sweep_y);
    let m_r = mean(reference_y);
    let mut num = 0.0;
    let mut den = 0.0;
    for (&s, &r) in sweep_y.iter().zip(reference_y.iter()) {
        num += (r - m_r) * (s - m_s);
        den += (r - m_r) * (r - m_r);
    }
    let scale = if den > f64::EPSILON { num / den } else { 0.0 };
    (scale, m_s - scale * m_r)
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let m_a = mean(a);
    let m_b = mean(b);
    let mut num = 0.0;
    let mut den_a = 0.0;
    let mut den_b = 0.0;
    for (&va, &vb) in a.iter().zip(b.iter()) {
        num += (va - m_a) * (vb - m_b);
        den_a += (va - m_a) * (va - m_a);
        den_b += (vb - m_b) * (vb - m_b);
    }
    let den = (den_a * den_b).sqrt();
    if den > f64::EPSILON {
        num / den
    } else {
        0.0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Composite score
// ─────────────────────────────────────────────────────────────────────────────

/// Score how well `reference` is present in `sweep`.
///
/// A shift beyond the sweep's own span, or an empty overlap window, scores
/// as no match (coefficient 0) rather than an error.
pub fn correlate(sweep: &Trace, reference: &ReferenceLine) -> CorrelationResult {
    let (s, r) = resample_to_common_grid(sweep, &reference.trace);
    if s.len() < 2 || r.len() < 2 {
        return CorrelationResult::no_match();
    }
    let shift = find_shift(&s, &r);
    if shift.abs() > s.span() {
        return CorrelationResult::no_match();
    }
    let (s_win, r_win) = overlap_window(&s, &r, shift);
    if s_win.is_empty() || r_win.is_empty() {
        return CorrelationResult::no_match();
    }
    let matched_fraction = s_win.span() / r.span();
    let (scale, offset) = affine_match(&s_win.y, &r_win.y);
    let matched_reference: Vec<f64> = r_win.y.iter().map(|&v| scale * v + offset).collect();
    CorrelationResult {
        coefficient: pearson(&s_win.y, &matched_reference),
        matched_fraction,
        offset,
    }
}
