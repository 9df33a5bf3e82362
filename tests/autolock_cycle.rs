//! Full automatic-lock cycle against the synthetic rig: wide scan,
//! centering, autolock handoff, monitoring, and the stop path.

mod common;

use linelock::error::LockError;
use linelock::sink::LockPacket;
use linelock::supervisor::{LockState, LockSupervisor};

use common::{catalog_with, init_logs, test_config, SyntheticRig};

const TICK_BOUND: usize = 500;

fn tick_until<H: linelock::hardware::HardwareLink>(
    supervisor: &mut LockSupervisor<H>,
    target: LockState,
) {
    for _ in 0..TICK_BOUND {
        if supervisor.tick().expect("rig never fails") == target {
            return;
        }
    }
    panic!(
        "supervisor did not reach {target:?} within {TICK_BOUND} ticks (stuck in {:?})",
        supervisor.state()
    );
}

#[test]
fn unknown_line_is_rejected_at_the_boundary() {
    init_logs();
    let rig = SyntheticRig::new(1.0);
    let mut supervisor = LockSupervisor::new(rig, catalog_with(&["L1"]), test_config());
    assert!(matches!(
        supervisor.run_auto_relock("nope", true),
        Err(LockError::CatalogMiss(_))
    ));
    assert_eq!(supervisor.state(), LockState::Idle);
}

#[test]
fn auto_lock_reaches_monitoring_and_centers_the_line() {
    init_logs();
    let rig = SyntheticRig::new(1.0);
    let handle = rig.clone();
    let mut supervisor = LockSupervisor::new(rig, catalog_with(&["L1"]), test_config());
    let packets = supervisor.subscribe_packets();

    supervisor.run_auto_relock("L1", true).unwrap();
    assert_eq!(supervisor.state(), LockState::Scanning);
    tick_until(&mut supervisor, LockState::Monitoring);

    assert_eq!(handle.autolock_count(), 1, "exactly one autolock handoff");
    let position = supervisor.line_position("L1").expect("line was located");
    assert!(
        (position - 1.0).abs() < 0.12,
        "centered position {position} too far from the line at 1.0 V"
    );
    // Feature must sit well inside the sweep at the final offset.
    assert!((handle.current_offset() - position).abs() < 1e-9);

    // The host saw the scan progress and at least one status change.
    let mut scans = 0;
    let mut statuses = 0;
    while let Ok(packet) = packets.try_recv() {
        match packet {
            LockPacket::Scan { total, .. } => {
                assert_eq!(total, 9);
                scans += 1;
            }
            LockPacket::Status { .. } => statuses += 1,
            LockPacket::Sweep { .. } => {}
        }
    }
    assert_eq!(scans, 9, "one packet per scan point");
    assert!(statuses >= 2);
}

#[test]
fn monitoring_stays_quiet_on_flat_history() {
    init_logs();
    let rig = SyntheticRig::new(1.0);
    let mut supervisor = LockSupervisor::new(rig, catalog_with(&["L1"]), test_config());
    let unlocks = supervisor.subscribe_unlock_events();

    supervisor.run_auto_relock("L1", true).unwrap();
    tick_until(&mut supervisor, LockState::Monitoring);
    for _ in 0..10 {
        supervisor.tick().unwrap();
    }
    assert_eq!(supervisor.state(), LockState::Monitoring);
    assert!(unlocks.try_recv().is_err(), "no unlock on a flat history");
}

#[test]
fn stop_is_honored_within_one_tick_from_any_state() {
    init_logs();
    let rig = SyntheticRig::new(1.0);
    let handle = rig.clone();
    let mut supervisor = LockSupervisor::new(rig, catalog_with(&["L1"]), test_config());

    // From Scanning.
    supervisor.run_auto_relock("L1", true).unwrap();
    supervisor.tick().unwrap();
    let stop = supervisor.stop_handle();
    stop.stop();
    assert_eq!(supervisor.tick().unwrap(), LockState::Idle);
    let released = handle.sweep_mode_count();
    assert!(released >= 1, "stop must release the board into sweep mode");

    // From Monitoring.
    supervisor.run_auto_relock("L1", true).unwrap();
    tick_until(&mut supervisor, LockState::Monitoring);
    stop.stop();
    assert_eq!(supervisor.tick().unwrap(), LockState::Idle);
    assert!(handle.sweep_mode_count() > released);

    // Idle stays idle.
    assert_eq!(supervisor.tick().unwrap(), LockState::Idle);
}

#[test]
fn sweeping_republishes_traces() {
    init_logs();
    let rig = SyntheticRig::new(1.0);
    let mut supervisor = LockSupervisor::new(rig, catalog_with(&["L1"]), test_config());
    let packets = supervisor.subscribe_packets();

    supervisor.start_sweeping().unwrap();
    for _ in 0..3 {
        supervisor.tick().unwrap();
    }
    let sweeps = std::iter::from_fn(|| packets.try_recv().ok())
        .filter(|p| matches!(p, LockPacket::Sweep { .. }))
        .count();
    assert_eq!(sweeps, 3);
}

#[test]
fn blocking_locate_and_center_work_without_ticks() {
    init_logs();
    let rig = SyntheticRig::new(1.0);
    let handle = rig.clone();
    let mut supervisor = LockSupervisor::new(rig, catalog_with(&["L1"]), test_config());

    let candidates = supervisor.locate_lines((0.8, 1.2), 9).unwrap();
    let candidate = &candidates["L1"];
    assert!(
        (0.8..=1.2).contains(&candidate.offset_volts),
        "candidate offset {} outside the scanned range",
        candidate.offset_volts
    );

    let issued = supervisor.center_and_lock("L1").unwrap();
    assert!(issued.locked);
    assert_eq!(handle.autolock_count(), 1);
    assert!((issued.offset - 1.0).abs() < 0.12);
}
