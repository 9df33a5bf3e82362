//! Tick-driven supervisor sequencing scan → locate → center → monitor →
//! relock.
//!
//! The supervisor is a single logical worker: the host drives it with a
//! periodic `tick()`, and every tick performs exactly one bounded unit of
//! work (one sweep, one scan point, one centering iteration, or one
//! monitoring check). Hardware acquisitions are the only blocking calls and
//! carry their own timeouts. Stop requests are observed at the start of
//! every tick, so any state aborts within one tick's latency.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::catalog::ReferenceLineCatalog;
use crate::center::{CenterStep, CenteringController, LockIssued};
use crate::config::LockConfig;
use crate::error::LockError;
use crate::hardware::HardwareLink;
use crate::locate::{self, LineScan, LockCandidate};
use crate::sink::{EventHub, LockPacket};
use crate::unlock::{UnlockDetector, UnlockEvent};

/// Supervisor mode. Relocking is not a state of its own: it is the
/// `Scanning → Centering → Monitoring` cycle repeating while relock stays
/// enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockState {
    /// No hardware activity.
    Idle,
    /// Free-running sweeps republished for live display.
    Sweeping,
    /// A locator scan is in progress, one point per tick.
    Scanning,
    /// The centering feedback loop is running, one iteration per tick.
    Centering,
    /// Locked; the control history is polled for unlock spikes.
    Monitoring,
}

/// Cloneable handle that requests a stop from another thread; the
/// supervisor honors it at the start of its next tick.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

struct AutoLockJob {
    line_key: String,
    relock: bool,
}

/// The lock supervisor. Owns the hardware link for the duration of a
/// session and shares the catalog with external editors.
pub struct LockSupervisor<H: HardwareLink> {
    hw: H,
    catalog: Arc<Mutex<ReferenceLineCatalog>>,
    cfg: LockConfig,
    state: LockState,
    stop_flag: Arc<AtomicBool>,
    packets: EventHub<LockPacket>,
    unlocks: EventHub<UnlockEvent>,
    detector: UnlockDetector,
    /// Last known scan offset per line, updated by every successful locate
    /// or centering pass and biased by detected drift.
    positions: HashMap<String, f64>,
    candidates: HashMap<String, LockCandidate>,
    scan: Option<LineScan>,
    centering: Option<CenteringController>,
    job: Option<AutoLockJob>,
    last_monitor: Option<Instant>,
}

impl<H: HardwareLink> LockSupervisor<H> {
    pub fn new(hw: H, catalog: Arc<Mutex<ReferenceLineCatalog>>, cfg: LockConfig) -> Self {
        let detector = UnlockDetector::new(cfg.detector.clone());
        Self {
            hw,
            catalog,
            cfg,
            state: LockState::Idle,
            stop_flag: Arc::new(AtomicBool::new(false)),
            packets: EventHub::new(),
            unlocks: EventHub::new(),
            detector,
            positions: HashMap::new(),
            candidates: HashMap::new(),
            scan: None,
            centering: None,
            job: None,
            last_monitor: None,
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    /// Last known scan offset of a line, if it has ever been located.
    pub fn line_position(&self, key: &str) -> Option<f64> {
        self.positions.get(key).copied()
    }

    /// Subscribe to the live-display packet stream.
    pub fn subscribe_packets(&self) -> std::sync::mpsc::Receiver<LockPacket> {
        self.packets.subscribe()
    }

    /// Subscribe to unlock events.
    pub fn subscribe_unlock_events(&self) -> std::sync::mpsc::Receiver<UnlockEvent> {
        self.unlocks.subscribe()
    }

    /// Handle for requesting a stop from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: self.stop_flag.clone(),
        }
    }

    // ── Host commands ────────────────────────────────────────────────────

    /// Switch to free-running sweep republishing.
    pub fn start_sweeping(&mut self) -> Result<(), LockError> {
        self.hw.start_sweep_mode()?;
        self.scan = None;
        self.centering = None;
        self.job = None;
        self.state = LockState::Sweeping;
        self.emit_status("sweeping");
        Ok(())
    }

    /// Begin the automatic lock (and, when `relock` is set, relock) cycle
    /// for one line: a wide scan, then centering, then monitoring.
    pub fn run_auto_relock(&mut self, line_key: &str, relock: bool) -> Result<(), LockError> {
        let lines = {
            let catalog = self.catalog.lock().unwrap();
            if !catalog.contains(line_key) {
                return Err(LockError::CatalogMiss(line_key.to_string()));
            }
            catalog.snapshot_all()
        };
        log::info!("auto lock for {line_key:?} (relock {})", relock);
        self.job = Some(AutoLockJob {
            line_key: line_key.to_string(),
            relock,
        });
        self.centering = None;
        self.scan = Some(LineScan::new(
            (self.cfg.scan.start, self.cfg.scan.stop),
            self.cfg.scan.points,
            lines,
            self.cfg.scan.min_fraction,
        ));
        self.state = LockState::Scanning;
        self.emit_status("scanning for reference lines");
        Ok(())
    }

    /// Blocking convenience: scan `points` offsets across `range` and
    /// return a candidate per catalog line.
    pub fn locate_lines(
        &mut self,
        range: (f64, f64),
        points: usize,
    ) -> Result<HashMap<String, LockCandidate>, LockError> {
        let lines = self.catalog.lock().unwrap().snapshot_all();
        let candidates = locate::locate(&mut self.hw, lines, range, points, self.cfg.scan.min_fraction)?;
        for (key, candidate) in &candidates {
            self.positions.insert(key.clone(), candidate.offset_volts);
        }
        self.candidates.extend(candidates.clone());
        Ok(candidates)
    }

    /// Blocking convenience: center the given line and hand off to the
    /// board-side autolock, locating first when no candidate is known yet.
    pub fn center_and_lock(&mut self, line_key: &str) -> Result<LockIssued, LockError> {
        let line = self.catalog.lock().unwrap().snapshot(line_key)?;
        if !self.candidates.contains_key(line_key) {
            self.locate_lines((self.cfg.scan.start, self.cfg.scan.stop), self.cfg.scan.points)?;
        }
        let candidate = self
            .candidates
            .get(line_key)
            .cloned()
            .ok_or_else(|| LockError::CatalogMiss(line_key.to_string()))?;
        let controller = CenteringController::new(
            line,
            &candidate,
            self.cfg.centering.clone(),
            self.cfg.monitor.lock_wait_timeout,
        );
        let issued = controller.center(&mut self.hw)?;
        self.positions.insert(line_key.to_string(), issued.offset);
        Ok(issued)
    }

    /// Force the supervisor to `Idle` and release the hardware into its
    /// safe sweeping mode.
    pub fn stop(&mut self) {
        self.stop_flag.store(false, Ordering::SeqCst);
        self.enter_idle("stopped");
    }

    // ── Tick ─────────────────────────────────────────────────────────────

    /// Perform one bounded unit of work and return the (possibly changed)
    /// state. A hardware failure aborts the current attempt and falls back
    /// to `Idle` after releasing the board.
    pub fn tick(&mut self) -> Result<LockState, LockError> {
        if self.stop_flag.swap(false, Ordering::SeqCst) {
            self.enter_idle("stopped");
            return Ok(self.state);
        }
        let step = match self.state {
            LockState::Idle => Ok(()),
            LockState::Sweeping => self.tick_sweep(),
            LockState::Scanning => self.tick_scan(),
            LockState::Centering => self.tick_center(),
            LockState::Monitoring => self.tick_monitor(),
        };
        if let Err(e) = step {
            log::warn!("tick failed in {:?}: {e}", self.state);
            self.enter_idle("attempt aborted");
            return Err(e);
        }
        Ok(self.state)
    }

    fn tick_sweep(&mut self) -> Result<(), LockError> {
        let trace = self.hw.acquire_sweep()?;
        self.packets.emit(LockPacket::Sweep { trace });
        Ok(())
    }

    fn tick_scan(&mut self) -> Result<(), LockError> {
        let Some(scan) = self.scan.as_mut() else {
            self.state = LockState::Idle;
            return Ok(());
        };
        if let Some(point) = scan.step(&mut self.hw)? {
            self.packets.emit(LockPacket::Scan {
                index: point.index,
                total: point.total,
                offset: point.offset,
                trace: point.trace,
            });
            return Ok(());
        }
        let Some(scan) = self.scan.take() else {
            return Ok(());
        };
        let candidates = scan.finish(self.hw.vertical_bias());
        for (key, candidate) in &candidates {
            self.positions.insert(key.clone(), candidate.offset_volts);
        }
        self.candidates.extend(candidates);

        match self.job.as_ref().map(|j| j.line_key.clone()) {
            Some(key) => self.begin_centering(&key)?,
            None => {
                self.state = LockState::Idle;
                self.emit_status("scan finished");
            }
        }
        Ok(())
    }

    fn begin_centering(&mut self, key: &str) -> Result<(), LockError> {
        let line = self.catalog.lock().unwrap().snapshot(key)?;
        let candidate = self
            .candidates
            .get(key)
            .cloned()
            .ok_or_else(|| LockError::CatalogMiss(key.to_string()))?;
        self.centering = Some(CenteringController::new(
            line,
            &candidate,
            self.cfg.centering.clone(),
            self.cfg.monitor.lock_wait_timeout,
        ));
        self.state = LockState::Centering;
        self.emit_status("centering");
        Ok(())
    }

    fn tick_center(&mut self) -> Result<(), LockError> {
        let Some(controller) = self.centering.as_mut() else {
            self.state = LockState::Idle;
            return Ok(());
        };
        match controller.step(&mut self.hw)? {
            CenterStep::Pending => {}
            CenterStep::Locked(issued) => {
                self.centering = None;
                if let Some(job) = &self.job {
                    self.positions.insert(job.line_key.clone(), issued.offset);
                }
                if issued.locked {
                    self.last_monitor = None;
                    self.state = LockState::Monitoring;
                    self.emit_status("locked, monitoring");
                } else {
                    self.job = None;
                    self.state = LockState::Idle;
                    self.emit_status("autolock issued but not confirmed");
                }
            }
            CenterStep::Exhausted => {
                self.centering = None;
                self.job = None;
                self.state = LockState::Idle;
                self.emit_status("offset search exhausted");
            }
        }
        Ok(())
    }

    fn tick_monitor(&mut self) -> Result<(), LockError> {
        if let Some(last) = self.last_monitor {
            if last.elapsed() < self.cfg.monitor.period {
                return Ok(());
            }
        }
        self.last_monitor = Some(Instant::now());
        let history = self.hw.acquire_history()?;
        let Some(event) = self.detector.check(&history) else {
            return Ok(());
        };
        self.unlocks.emit(event);

        let Some(job) = self.job.as_ref() else {
            self.enter_idle("unlocked");
            return Ok(());
        };
        let key = job.line_key.clone();
        let relock = job.relock;
        let position = self.positions.get(&key).copied().unwrap_or(self.hw.offset())
            + event.drift_estimate;
        self.positions.insert(key.clone(), position);

        if !relock {
            self.enter_idle("unlocked, relock disabled");
            return Ok(());
        }
        log::info!("relocking {key:?} around {position:.3} V");
        let line = self.catalog.lock().unwrap().snapshot(&key)?;
        self.scan = Some(LineScan::new(
            (
                position - self.cfg.scan.relock_halfwidth,
                position + self.cfg.scan.relock_halfwidth,
            ),
            self.cfg.scan.relock_points,
            vec![line],
            self.cfg.scan.min_fraction,
        ));
        self.state = LockState::Scanning;
        self.emit_status("relocking");
        Ok(())
    }

    fn enter_idle(&mut self, reason: &str) {
        self.scan = None;
        self.centering = None;
        self.job = None;
        self.last_monitor = None;
        if let Err(e) = self.hw.start_sweep_mode() {
            log::warn!("failed to release hardware into sweep mode: {e}");
        }
        self.state = LockState::Idle;
        self.emit_status(reason);
    }

    fn emit_status(&self, detail: &str) {
        log::debug!("state {:?}: {detail}", self.state);
        self.packets.emit(LockPacket::Status {
            state: self.state,
            detail: detail.to_string(),
        });
    }
}
