//! `From` implementations bridging `bmcfan_config` types to `bmcfan_core` types.

use std::time::Duration;

use crate::config::{ControlCfg, ControlSettings, PidCfg, PidForm, PidGains, SafetyCfg, ScanCfg};
use crate::curve::FanCurve;

// ── PID ──────────────────────────────────────────────────────────────────────

impl From<bmcfan_config::PidForm> for PidForm {
    fn from(f: bmcfan_config::PidForm) -> Self {
        match f {
            bmcfan_config::PidForm::Incremental => PidForm::Incremental,
            bmcfan_config::PidForm::Positional => PidForm::Positional,
        }
    }
}

impl From<&bmcfan_config::PidCfg> for PidCfg {
    fn from(c: &bmcfan_config::PidCfg) -> Self {
        Self {
            gains: PidGains {
                kp: c.kp,
                ki: c.ki,
                kd: c.kd,
            },
            form: c.form.into(),
        }
    }
}

// ── Safety ───────────────────────────────────────────────────────────────────

impl From<&bmcfan_config::Safety> for SafetyCfg {
    fn from(c: &bmcfan_config::Safety) -> Self {
        Self {
            max_temp: c.max_temp,
            revert_attempts: c.revert_attempts,
            revert_backoff: Duration::from_millis(c.revert_backoff_ms),
        }
    }
}

// ── Whole config ─────────────────────────────────────────────────────────────

impl From<&bmcfan_config::Config> for ControlSettings {
    fn from(c: &bmcfan_config::Config) -> Self {
        let ctl = &c.control;
        Self {
            control: ControlCfg {
                desired_temp: ctl.desired_temp,
                step_delay: Duration::from_millis(ctl.step_delay_ms),
                min_percent: ctl.min_fan_speed_percent,
                max_percent: ctl.max_fan_speed_percent,
                hysteresis_percent: ctl.hysteresis_percent,
                max_consecutive_failures: ctl.max_consecutive_failures,
                disable_vendor_cooling_override: ctl.disable_vendor_cooling_override,
                rebase_on_rpm: ctl.rebase_on_rpm,
                command_timeout: Duration::from_millis(c.bmc.command_timeout_ms),
                status_every_ticks: c.notify.status_every_ticks,
            },
            pid: (&c.pid).into(),
            safety: (&c.safety).into(),
            scan: ScanCfg {
                enabled: c.scan.enabled,
                speeds: c.scan_speeds(),
                settle: Duration::from_millis(c.scan.settle_ms),
                max_step_failures: c.scan.max_step_failures,
            },
        }
    }
}

// ── Curve ────────────────────────────────────────────────────────────────────

impl From<&bmcfan_config::CurveCfg> for FanCurve {
    fn from(c: &bmcfan_config::CurveCfg) -> Self {
        FanCurve::from_points(c.fallback.iter().copied())
    }
}
