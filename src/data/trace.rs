//! The sampled voltage trace produced by every sweep acquisition.

use serde::{Deserialize, Serialize};

/// One acquired signal trace: `y\[i\]` sampled at monotonically increasing
/// voltage `x\[i\]`, with near-uniform spacing. An optional `strength`
/// channel carries the demodulated signal magnitude when the acquisition
/// provides it.
///
/// Traces are treated as immutable captures: all operations on them return
/// new traces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trace {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Signal-strength channel, parallel to `y` (dual-demodulation setups).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<Vec<f64>>,
}

impl Trace {
    /// Build a trace from parallel sample vectors. The vectors are truncated
    /// to the shorter length so the pair is always consistent.
    pub fn new(mut x: Vec<f64>, mut y: Vec<f64>) -> Self {
        let n = x.len().min(y.len());
        x.truncate(n);
        y.truncate(n);
        Self {
            x,
            y,
            strength: None,
        }
    }

    /// Attach a strength channel (truncated/padded semantics are the
    /// caller's problem; acquisitions deliver equal lengths).
    pub fn with_strength(mut self, strength: Vec<f64>) -> Self {
        self.strength = Some(strength);
        self
    }

    /// An empty trace; what overlap extraction returns when two x-ranges do
    /// not intersect.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Grid spacing, taken from the first two samples (the grid is
    /// near-uniform by contract). Zero for traces shorter than two samples.
    pub fn step(&self) -> f64 {
        if self.x.len() < 2 {
            0.0
        } else {
            self.x[1] - self.x[0]
        }
    }

    /// First grid point, or 0.0 for an empty trace.
    pub fn start(&self) -> f64 {
        self.x.first().copied().unwrap_or(0.0)
    }

    /// Last grid point, or 0.0 for an empty trace.
    pub fn end(&self) -> f64 {
        self.x.last().copied().unwrap_or(0.0)
    }

    /// Total x extent covered by the trace.
    pub fn span(&self) -> f64 {
        self.end() - self.start()
    }

    /// Index of the sample whose x is closest to `target`.
    pub fn nearest_index(&self, target: f64) -> usize {
        let mut best = 0;
        let mut best_dist = f64::INFINITY;
        for (i, &xi) in self.x.iter().enumerate() {
            let d = (xi - target).abs();
            if d < best_dist {
                best_dist = d;
                best = i;
            }
        }
        best
    }

    /// Sub-trace over the half-open index range `start..end` (clamped).
    pub fn crop(&self, start: usize, end: usize) -> Trace {
        let end = end.min(self.len());
        let start = start.min(end);
        Trace {
            x: self.x[start..end].to_vec(),
            y: self.y[start..end].to_vec(),
            strength: self.strength.as_ref().map(|s| {
                let e = end.min(s.len());
                s[start.min(e)..e].to_vec()
            }),
        }
    }

    /// Whether the grid is strictly increasing (reference-line invariant).
    pub fn is_monotonic(&self) -> bool {
        self.x.windows(2).all(|w| w[0] < w[1])
    }
}
