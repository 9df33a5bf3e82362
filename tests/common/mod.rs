#![allow(dead_code)] // each integration test binary uses a subset of the rig

//! Shared synthetic hardware rig for the integration tests.
//!
//! The rig simulates a board sweeping ±0.5 V around a programmable offset
//! over a spectrum containing one Gaussian feature at a fixed absolute
//! voltage. Tests keep a clone of the rig to move the feature or inject
//! control-signal history while the supervisor owns the other clone.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use linelock::catalog::{ReferenceLine, ReferenceLineCatalog};
use linelock::config::LockConfig;
use linelock::data::Trace;
use linelock::hardware::{ControlHistory, HardwareError, HardwareLink};

pub const FEATURE_WIDTH: f64 = 0.03;
pub const SWEEP_SAMPLES: usize = 512;

pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn feature_profile(d: f64) -> f64 {
    (-(d * d) / (2.0 * FEATURE_WIDTH * FEATURE_WIDTH)).exp()
}

struct RigState {
    line_volts: f64,
    offset: f64,
    bias: f64,
    locked: bool,
    history: ControlHistory,
    autolock_count: usize,
    sweep_mode_count: usize,
}

#[derive(Clone)]
pub struct SyntheticRig {
    shared: Arc<Mutex<RigState>>,
}

impl SyntheticRig {
    pub fn new(line_volts: f64) -> Self {
        Self {
            shared: Arc::new(Mutex::new(RigState {
                line_volts,
                offset: 0.0,
                bias: 0.0,
                locked: false,
                history: flat_history(),
                autolock_count: 0,
                sweep_mode_count: 0,
            })),
        }
    }

    pub fn move_line(&self, line_volts: f64) {
        self.shared.lock().unwrap().line_volts = line_volts;
    }

    pub fn inject_history(&self, history: ControlHistory) {
        self.shared.lock().unwrap().history = history;
    }

    pub fn autolock_count(&self) -> usize {
        self.shared.lock().unwrap().autolock_count
    }

    pub fn sweep_mode_count(&self) -> usize {
        self.shared.lock().unwrap().sweep_mode_count
    }

    pub fn current_offset(&self) -> f64 {
        self.shared.lock().unwrap().offset
    }
}

impl HardwareLink for SyntheticRig {
    fn acquire_sweep(&mut self) -> Result<Trace, HardwareError> {
        let state = self.shared.lock().unwrap();
        let n = SWEEP_SAMPLES;
        let x: Vec<f64> = (0..n).map(|i| -0.5 + i as f64 / (n - 1) as f64).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|&xi| feature_profile(xi + state.offset - state.line_volts))
            .collect();
        Ok(Trace::new(x, y))
    }

    fn acquire_history(&mut self) -> Result<ControlHistory, HardwareError> {
        Ok(self.shared.lock().unwrap().history.clone())
    }

    fn set_offset(&mut self, volts: f64) -> Result<(), HardwareError> {
        self.shared.lock().unwrap().offset = volts;
        Ok(())
    }

    fn offset(&self) -> f64 {
        self.shared.lock().unwrap().offset
    }

    fn set_vertical_bias(&mut self, volts: f64) -> Result<(), HardwareError> {
        self.shared.lock().unwrap().bias = volts;
        Ok(())
    }

    fn vertical_bias(&self) -> f64 {
        self.shared.lock().unwrap().bias
    }

    fn start_autolock(
        &mut self,
        _lock_start: usize,
        _lock_end: usize,
        _raw_signal: &[i16],
    ) -> Result<(), HardwareError> {
        let mut state = self.shared.lock().unwrap();
        state.autolock_count += 1;
        state.locked = true;
        Ok(())
    }

    fn wait_for_lock_status(
        &mut self,
        expect_locked: bool,
        timeout: Duration,
    ) -> Result<(), HardwareError> {
        if self.shared.lock().unwrap().locked == expect_locked {
            Ok(())
        } else {
            Err(HardwareError::Timeout {
                op: "wait_for_lock_status",
                timeout,
            })
        }
    }

    fn start_sweep_mode(&mut self) -> Result<(), HardwareError> {
        let mut state = self.shared.lock().unwrap();
        state.sweep_mode_count += 1;
        state.locked = false;
        Ok(())
    }
}

/// A reference line as captured with the board parked right on the feature.
pub fn reference_line(key: &str) -> ReferenceLine {
    let n = 256;
    let x: Vec<f64> = (0..n)
        .map(|i| -0.2 + 0.4 * i as f64 / (n - 1) as f64)
        .collect();
    let y: Vec<f64> = x.iter().map(|&xi| feature_profile(xi)).collect();
    ReferenceLine::new(key, Trace::new(x, y), -0.05, 0.05).unwrap()
}

pub fn catalog_with(keys: &[&str]) -> Arc<Mutex<ReferenceLineCatalog>> {
    let mut catalog = ReferenceLineCatalog::new();
    for key in keys {
        catalog.insert(reference_line(key));
    }
    Arc::new(Mutex::new(catalog))
}

/// Config tuned for tests: a narrow scan around 1 V, no wall-clock waits.
pub fn test_config() -> LockConfig {
    let mut cfg = LockConfig::default();
    cfg.scan.start = 0.8;
    cfg.scan.stop = 1.2;
    cfg.scan.points = 9;
    cfg.centering.retry_wait = Duration::ZERO;
    cfg.monitor.period = Duration::ZERO;
    cfg.monitor.lock_wait_timeout = Duration::from_millis(10);
    cfg
}

/// 60 s of flat control history at 10 Hz.
pub fn flat_history() -> ControlHistory {
    history_with_step(None, 0.0)
}

/// Control history with an optional fast-channel step at `step_at` seconds,
/// and the slow channel parked at `slow_level`.
pub fn history_with_step(step_at: Option<f64>, slow_level: f64) -> ControlHistory {
    let dt = 0.1;
    let n = 600;
    let times: Vec<f64> = (0..n).map(|i| i as f64 * dt).collect();
    let fast: Vec<f64> = times
        .iter()
        .map(|&t| match step_at {
            Some(t_step) if t >= t_step => 0.5,
            _ => 0.0,
        })
        .collect();
    let slow = vec![slow_level; n];
    ControlHistory {
        fast_control: Trace::new(times.clone(), fast),
        slow_control: Trace::new(times, slow),
        monitor: None,
    }
}
