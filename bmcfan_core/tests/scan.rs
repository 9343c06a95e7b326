mod common;

use std::time::Duration;

use bmcfan_core::mocks::Call;
use bmcfan_core::{FanCurve, FanCurveStore, ScanStatus, TickOutcome};
use common::{rig_with, settings};
use rstest::rstest;

fn scan_status(out: TickOutcome) -> ScanStatus {
    match out {
        TickOutcome::Scan { status, .. } => status,
        other => panic!("expected a scan tick, got {other:?}"),
    }
}

#[rstest]
#[case(vec![20, 30, 40], vec![(20, 3000), (30, 4200), (40, 5400)])]
#[case(vec![40, 20, 30], vec![(20, 3000), (30, 4200), (40, 5400)])]
#[case(vec![20, 30, 20], vec![(20, 3000), (30, 4200)])]
fn scan_builds_one_entry_per_speed(#[case] speeds: Vec<u8>, #[case] expected: Vec<(u8, u32)>) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fan_curve.csv");
    let mut s = settings();
    s.scan.enabled = true;
    s.scan.speeds = speeds.clone();
    let mut r = rig_with(s, &path, FanCurve::from_points([(90, 1)]));
    r.ctl.bootstrap().unwrap();

    let mut ticks = 0;
    while r.ctl.is_scanning() {
        r.tick();
        ticks += 1;
        assert!(ticks <= 20, "scan did not finish");
    }

    // Settle equals the tick interval: one tick to command the first speed,
    // then one tick per speed to record and command the next.
    assert_eq!(ticks, speeds.len() + 1);
    assert_eq!(r.bmc.count(&Call::ReadFanRpm), speeds.len());
    let got: Vec<(u8, u32)> = r
        .ctl
        .store()
        .curve()
        .entries()
        .map(|e| (e.speed_percent, e.rpm))
        .collect();
    assert_eq!(got, expected);

    let reloaded = FanCurveStore::load(&path).unwrap();
    assert_eq!(reloaded.curve(), r.ctl.store().curve());
    assert_eq!(r.ctl.last_effective(), speeds.last().copied());
}

#[test]
fn later_measurement_wins_on_duplicate_speed() {
    let dir = tempfile::tempdir().unwrap();
    let mut s = settings();
    s.scan.enabled = true;
    s.scan.speeds = vec![20, 30, 20];
    let mut r = rig_with(s, &dir.path().join("c.csv"), FanCurve::new());
    r.ctl.bootstrap().unwrap();
    r.tick(); // command 20
    r.tick(); // record 20 -> 3000, command 30
    r.bmc.set_rpm_model(100, 0);
    r.tick(); // record 30 -> 3000, command 20
    r.tick(); // record 20 -> 2000, done
    assert_eq!(r.ctl.store().curve().get(20), Some(2000));
    assert_eq!(r.ctl.store().curve().get(30), Some(3000));
}

#[test]
fn scan_waits_out_settle_window_and_skips_hysteresis() {
    let dir = tempfile::tempdir().unwrap();
    let mut s = settings();
    s.scan.enabled = true;
    s.scan.speeds = vec![20, 21];
    s.scan.settle = Duration::from_secs(25);
    let mut r = rig_with(s, &dir.path().join("c.csv"), FanCurve::new());
    r.ctl.bootstrap().unwrap();

    assert_eq!(
        scan_status(r.tick()),
        ScanStatus::Commanded { speed: 20 }
    );
    assert!(matches!(
        scan_status(r.tick()),
        ScanStatus::Settling { speed: 20, .. }
    ));
    assert!(matches!(
        scan_status(r.tick()),
        ScanStatus::Settling { speed: 20, .. }
    ));
    // 21 is within the 2 % deadband of 20 but still commanded.
    assert_eq!(
        scan_status(r.tick()),
        ScanStatus::Commanded { speed: 21 }
    );
    assert_eq!(r.bmc.speed_commands(), vec![20, 21]);
}

#[test]
fn completed_scan_hands_back_to_pid_from_last_speed() {
    let dir = tempfile::tempdir().unwrap();
    let mut s = settings();
    s.scan.enabled = true;
    s.scan.speeds = vec![40];
    let mut r = rig_with(s, &dir.path().join("c.csv"), FanCurve::new());
    r.ctl.bootstrap().unwrap();
    r.tick();
    assert!(matches!(
        scan_status(r.tick()),
        ScanStatus::Completed {
            entries: 1,
            persisted: true
        }
    ));
    r.bmc.set_steady_temp(65.0);
    // incremental base is the scanned 40 %, +10
    assert!(matches!(r.tick(), TickOutcome::Actuated { percent: 50, .. }));
}

#[test]
fn persistence_failure_keeps_curve_in_memory() {
    let dir = tempfile::tempdir().unwrap();
    // A directory where the file should be makes the rename fail.
    let path = dir.path().join("fan_curve.csv");
    std::fs::create_dir(&path).unwrap();
    let mut s = settings();
    s.scan.enabled = true;
    s.scan.speeds = vec![30];
    let mut r = rig_with(s, &path, FanCurve::new());
    r.ctl.bootstrap().unwrap();
    r.tick();
    assert_eq!(
        scan_status(r.tick()),
        ScanStatus::Completed {
            entries: 1,
            persisted: false
        }
    );
    assert_eq!(r.ctl.store().curve().get(30), Some(4200));
    assert!(path.is_dir());
    assert!(r.notifier.sent().last().unwrap().body.contains("FAILED"));
}
