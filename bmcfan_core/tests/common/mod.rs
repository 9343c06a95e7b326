#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use bmcfan_core::mocks::{FakeBmc, RecordingNotifier};
use bmcfan_core::{
    ControlCfg, ControlLoop, ControlSettings, FanCurve, FanCurveStore, PidCfg, PidForm, PidGains,
    SafetyCfg, ScanCfg,
};
use bmcfan_traits::ManualClock;

pub type TestLoop = ControlLoop<FakeBmc, FakeBmc, RecordingNotifier, ManualClock>;

/// P-only incremental regulator, 10..=100 %, setpoint 60, ceiling 85.
pub fn settings() -> ControlSettings {
    ControlSettings {
        control: ControlCfg {
            desired_temp: 60.0,
            step_delay: Duration::from_secs(10),
            min_percent: 10,
            max_percent: 100,
            hysteresis_percent: 2,
            max_consecutive_failures: 3,
            disable_vendor_cooling_override: false,
            rebase_on_rpm: false,
            command_timeout: Duration::from_secs(1),
            status_every_ticks: 0,
        },
        pid: PidCfg {
            gains: PidGains {
                kp: 2.0,
                ki: 0.0,
                kd: 0.0,
            },
            form: PidForm::Incremental,
        },
        safety: SafetyCfg {
            max_temp: 85.0,
            revert_attempts: 3,
            revert_backoff: Duration::from_millis(100),
        },
        scan: ScanCfg {
            enabled: false,
            speeds: vec![20, 30, 40],
            settle: Duration::from_secs(10),
            max_step_failures: 3,
        },
    }
}

pub struct Rig {
    pub bmc: FakeBmc,
    pub notifier: RecordingNotifier,
    pub clock: ManualClock,
    pub ctl: TestLoop,
}

pub fn rig_with(settings: ControlSettings, curve_path: &Path, curve: FanCurve) -> Rig {
    let bmc = FakeBmc::new(60.0);
    let notifier = RecordingNotifier::default();
    let clock = ManualClock::new();
    let ctl = ControlLoop::new(
        settings,
        bmc.clone(),
        bmc.clone(),
        notifier.clone(),
        clock.clone(),
        FanCurveStore::new(curve_path, curve),
    );
    Rig {
        bmc,
        notifier,
        clock,
        ctl,
    }
}

pub fn rig(dir: &Path) -> Rig {
    rig_with(settings(), &dir.join("fan_curve.csv"), FanCurve::new())
}

impl Rig {
    /// Tick, then let one step delay pass.
    pub fn tick(&mut self) -> bmcfan_core::TickOutcome {
        let out = self.ctl.tick().expect("tick");
        self.clock.advance(Duration::from_secs(10));
        out
    }
}
