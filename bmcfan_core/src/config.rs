//! Runtime settings for the control engine.
//!
//! These are built once from the validated TOML config (see `conversions`)
//! and never change for the lifetime of the process. They are separate from
//! the deserialized schema in `bmcfan_config`.

use std::time::Duration;

/// Gains of the PID regulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 2.0,
            ki: 0.01,
            kd: 0.0,
        }
    }
}

/// How the PID sum becomes a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PidForm {
    /// command = base + P + I + D, where base is the previous command.
    #[default]
    Incremental,
    /// command = P + I + D.
    Positional,
}

#[derive(Debug, Clone)]
pub struct PidCfg {
    pub gains: PidGains,
    pub form: PidForm,
}

impl Default for PidCfg {
    fn default() -> Self {
        Self {
            gains: PidGains::default(),
            form: PidForm::Incremental,
        }
    }
}

/// Loop pacing, output bounds and deadband.
#[derive(Debug, Clone)]
pub struct ControlCfg {
    /// Setpoint (°C).
    pub desired_temp: f32,
    /// Tick interval.
    pub step_delay: Duration,
    pub min_percent: u8,
    pub max_percent: u8,
    /// Candidates closer than this to the last command are not sent.
    pub hysteresis_percent: u8,
    /// Ticks without a temperature before the fail-safe revert.
    pub max_consecutive_failures: u32,
    pub disable_vendor_cooling_override: bool,
    /// Seed the incremental PID base from measured RPM via the fan curve.
    pub rebase_on_rpm: bool,
    /// Per-call timeout handed to the sampler.
    pub command_timeout: Duration,
    /// Send a status notification every N ticks (0 = never).
    pub status_every_ticks: u32,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            desired_temp: 60.0,
            step_delay: Duration::from_secs(10),
            min_percent: 10,
            max_percent: 100,
            hysteresis_percent: 2,
            max_consecutive_failures: 10,
            disable_vendor_cooling_override: false,
            rebase_on_rpm: true,
            command_timeout: Duration::from_secs(10),
            status_every_ticks: 0,
        }
    }
}

/// Overheat ceiling and fallback retry policy.
#[derive(Debug, Clone)]
pub struct SafetyCfg {
    /// Ceiling (°C); a sample at or above it reverts to BMC control.
    pub max_temp: f32,
    /// Revert attempts per tick.
    pub revert_attempts: u32,
    /// Backoff before the second attempt; doubles afterwards.
    pub revert_backoff: Duration,
}

impl Default for SafetyCfg {
    fn default() -> Self {
        Self {
            max_temp: 85.0,
            revert_attempts: 3,
            revert_backoff: Duration::from_millis(500),
        }
    }
}

/// Fan curve scan.
#[derive(Debug, Clone)]
pub struct ScanCfg {
    pub enabled: bool,
    /// Speeds visited in order.
    pub speeds: Vec<u8>,
    pub settle: Duration,
    pub max_step_failures: u32,
}

impl Default for ScanCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            speeds: Vec::new(),
            settle: Duration::from_secs(10),
            max_step_failures: 3,
        }
    }
}

/// Everything the scheduler needs, grouped.
#[derive(Debug, Clone, Default)]
pub struct ControlSettings {
    pub control: ControlCfg,
    pub pid: PidCfg,
    pub safety: SafetyCfg,
    pub scan: ScanCfg,
}
