mod common;

use bmcfan_core::mocks::Call;
use bmcfan_core::{FanCurve, SafetyState, ScanStatus, TickOutcome};
use bmcfan_traits::Priority;
use common::{rig, rig_with, settings};

#[test]
fn breach_reverts_once_within_the_same_tick() {
    let dir = tempfile::tempdir().unwrap();
    let mut r = rig(dir.path());
    r.ctl.bootstrap().unwrap();
    r.bmc.clear_calls();
    r.bmc.script_temps([86.0]);

    match r.tick() {
        TickOutcome::Safety { state, sample } => {
            assert_eq!(state, SafetyState::Reverted);
            assert_eq!(sample.temp_c, 86.0);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(
        r.bmc.calls(),
        vec![Call::ReadTemperature, Call::RevertToDefaultControl]
    );
    assert_eq!(r.notifier.sent().len(), 1);
    assert_eq!(r.notifier.sent()[0].priority, Priority::High);
}

#[test]
fn no_speed_command_after_reverted() {
    let dir = tempfile::tempdir().unwrap();
    let mut r = rig(dir.path());
    r.bmc.script_temps([70.0, 90.0, 50.0, 75.0, 95.0]);
    r.tick();
    let commands_before = r.bmc.speed_commands().len();
    for _ in 0..20 {
        assert!(matches!(
            r.tick(),
            TickOutcome::Safety {
                state: SafetyState::Reverted,
                ..
            }
        ));
    }
    assert_eq!(r.bmc.speed_commands().len(), commands_before);
    assert_eq!(r.bmc.count(&Call::RevertToDefaultControl), 1);
    assert_eq!(r.notifier.sent().len(), 1);
    // Shutdown does not revert a second time.
    r.ctl.shutdown().unwrap();
    assert_eq!(r.bmc.count(&Call::RevertToDefaultControl), 1);
}

#[test]
fn failed_revert_escalates_and_keeps_retrying() {
    let dir = tempfile::tempdir().unwrap();
    let mut r = rig(dir.path());
    r.bmc.fail_reverts(4);
    r.bmc.set_steady_temp(90.0);

    assert!(matches!(
        r.tick(),
        TickOutcome::Safety {
            state: SafetyState::Overheat,
            ..
        }
    ));
    assert_eq!(r.notifier.count_at(Priority::Urgent), 1);
    assert!(r.bmc.speed_commands().is_empty());

    assert!(matches!(
        r.tick(),
        TickOutcome::Safety {
            state: SafetyState::Reverted,
            ..
        }
    ));
    assert_eq!(r.bmc.count(&Call::RevertToDefaultControl), 5);
    assert_eq!(r.notifier.count_at(Priority::Urgent), 1);
    assert_eq!(r.notifier.count_at(Priority::High), 1);
}

#[test]
fn pending_revert_is_retried_on_ticks_without_a_reading() {
    let dir = tempfile::tempdir().unwrap();
    let mut r = rig(dir.path());
    r.bmc.fail_reverts(6);
    r.bmc.script_temps([90.0]);
    r.bmc.fail_temps(2);

    assert!(matches!(
        r.tick(),
        TickOutcome::Safety {
            state: SafetyState::Overheat,
            ..
        }
    ));
    assert_eq!(r.bmc.count(&Call::RevertToDefaultControl), 3);

    assert!(matches!(r.tick(), TickOutcome::Skipped(_)));
    assert_eq!(r.bmc.count(&Call::RevertToDefaultControl), 6);
    assert_eq!(r.ctl.safety_state(), SafetyState::Overheat);

    assert!(matches!(r.tick(), TickOutcome::Skipped(_)));
    assert_eq!(r.bmc.count(&Call::RevertToDefaultControl), 7);
    assert_eq!(r.ctl.safety_state(), SafetyState::Reverted);
    assert_eq!(r.notifier.count_at(Priority::Urgent), 1);
    assert_eq!(r.notifier.count_at(Priority::High), 1);
    assert!(r.bmc.speed_commands().is_empty());
}

#[test]
fn breach_preempts_scan_without_recording() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fan_curve.csv");
    let mut s = settings();
    s.scan.enabled = true;
    let original = FanCurve::from_points([(50, 7000)]);
    let mut r = rig_with(s, &path, original.clone());
    r.ctl.bootstrap().unwrap();
    assert!(r.ctl.is_scanning());

    assert!(matches!(
        r.tick(),
        TickOutcome::Scan {
            status: ScanStatus::Commanded { speed: 20 },
            ..
        }
    ));
    r.bmc.script_temps([88.0]);
    assert!(matches!(r.tick(), TickOutcome::Safety { .. }));
    assert!(!r.ctl.is_scanning());
    assert_eq!(r.bmc.count(&Call::ReadFanRpm), 0);
    assert_eq!(r.ctl.store().curve(), &original);
    assert!(!path.exists());

    // Scanning does not come back on its own.
    r.bmc.set_steady_temp(50.0);
    r.tick();
    assert!(!r.ctl.is_scanning());
    assert!(!r.ctl.start_scan());
}
