#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and fan curve file format for the fan controller.
//!
//! - `Config` and its sections are deserialized from TOML and validated once
//!   at startup; a validation failure is fatal before the first tick.
//! - `curve_csv` reads and writes the persisted speed→RPM table.
use serde::Deserialize;
use serde::de::Deserializer;

pub mod curve_csv;

pub use curve_csv::{CurveRow, parse_curve_csv, render_curve_csv};

/// Environment variable consulted when `bmc.password` is absent.
pub const BMC_PASSWORD_ENV: &str = "BMCFAN_BMC_PASSWORD";
/// Environment variable consulted when `notify.token` is absent.
pub const NTFY_TOKEN_ENV: &str = "BMCFAN_NTFY_TOKEN";

#[derive(Debug, Deserialize)]
pub struct Bmc {
    pub host: String,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_interface")]
    pub interface: String,
    #[serde(default = "default_ipmitool")]
    pub ipmitool: String,
    #[serde(default = "default_sshpass")]
    pub sshpass: String,
    /// Upper bound for any single external command (ms).
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// SDR record whose reading is used as the reference fan RPM.
    #[serde(default = "default_fan_sensor")]
    pub fan_sensor: String,
    /// Only temperature SDR lines starting with this prefix are considered.
    #[serde(default = "default_temperature_prefix")]
    pub temperature_prefix: String,
}

fn default_interface() -> String {
    "lanplus".into()
}
fn default_ipmitool() -> String {
    "ipmitool".into()
}
fn default_sshpass() -> String {
    "sshpass".into()
}
fn default_command_timeout_ms() -> u64 {
    10_000
}
fn default_fan_sensor() -> String {
    "Fan1".into()
}
fn default_temperature_prefix() -> String {
    "Temp".into()
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlCfg {
    /// Setpoint in °C.
    pub desired_temp: f32,
    /// Tick interval (ms).
    pub step_delay_ms: u64,
    pub min_fan_speed_percent: u8,
    pub max_fan_speed_percent: u8,
    /// Commands closer than this to the last one are not re-sent.
    pub hysteresis_percent: u8,
    /// Ticks in a row without a temperature before the fail-safe revert.
    pub max_consecutive_failures: u32,
    pub disable_vendor_cooling_override: bool,
    /// Seed the PID base from the measured RPM through the fan curve.
    pub rebase_on_rpm: bool,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            desired_temp: 60.0,
            step_delay_ms: 10_000,
            min_fan_speed_percent: 10,
            max_fan_speed_percent: 100,
            hysteresis_percent: 2,
            max_consecutive_failures: 10,
            disable_vendor_cooling_override: false,
            rebase_on_rpm: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PidForm {
    /// Correction is added to the previous (or measured) command.
    #[default]
    Incremental,
    /// Output is the PID sum itself.
    Positional,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PidCfg {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub form: PidForm,
}

impl Default for PidCfg {
    fn default() -> Self {
        Self {
            kp: 2.0,
            ki: 0.01,
            kd: 0.0,
            form: PidForm::Incremental,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Safety {
    /// Ceiling in °C; reaching it hands control back to the BMC for good.
    pub max_temp: f32,
    /// Attempts per tick for the fallback revert command.
    pub revert_attempts: u32,
    /// Initial backoff between revert attempts; doubles per attempt.
    pub revert_backoff_ms: u64,
}

impl Default for Safety {
    fn default() -> Self {
        Self {
            max_temp: 85.0,
            revert_attempts: 3,
            revert_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ScanCfg {
    pub enabled: bool,
    /// Explicit speed sequence; empty means min..=max in `step_percent` steps.
    pub speeds: Vec<u8>,
    pub step_percent: u8,
    pub settle_ms: u64,
    /// Consecutive failures on one step before the scan is abandoned.
    pub max_step_failures: u32,
}

impl Default for ScanCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            speeds: Vec::new(),
            step_percent: 10,
            settle_ms: 10_000,
            max_step_failures: 3,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CurveCfg {
    pub path: String,
    /// Curve used when the file is missing or unreadable.
    /// Accepts either:
    /// - array of tuples: [[20, 3360], [30, 4440]]
    /// - array of tables: [{ speed = 20, rpm = 3360 }, ...]
    #[serde(deserialize_with = "de_curve_points")]
    pub fallback: Vec<(u8, u32)>,
}

impl Default for CurveCfg {
    fn default() -> Self {
        Self {
            path: "/var/lib/bmcfan/fan_curve.csv".into(),
            fallback: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PointToml {
    Tuple((u8, u32)),
    Table { speed: u8, rpm: u32 },
}

fn de_curve_points<'de, D>(deserializer: D) -> Result<Vec<(u8, u32)>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<Vec<PointToml>> = Option::deserialize(deserializer)?;
    Ok(opt
        .unwrap_or_default()
        .into_iter()
        .map(|p| match p {
            PointToml::Tuple(t) => t,
            PointToml::Table { speed, rpm } => (speed, rpm),
        })
        .collect())
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NotifyCfg {
    pub enabled: bool,
    pub host: String,
    pub topic: String,
    pub token: Option<String>,
    pub timeout_ms: u64,
    /// Send a status message every N ticks (0 disables).
    pub status_every_ticks: u32,
    pub test_on_start: bool,
}

impl Default for NotifyCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "ntfy.sh".into(),
            topic: "bmcfan".into(),
            token: None,
            timeout_ms: 5_000,
            status_every_ticks: 0,
            test_on_start: false,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub bmc: Bmc,
    #[serde(default)]
    pub control: ControlCfg,
    #[serde(default)]
    pub pid: PidCfg,
    #[serde(default)]
    pub safety: Safety,
    #[serde(default)]
    pub scan: ScanCfg,
    #[serde(default)]
    pub curve: CurveCfg,
    #[serde(default)]
    pub notify: NotifyCfg,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read, parse and validate a config file in one go.
pub fn load_file(path: &std::path::Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read config {:?}: {}", path, e))?;
    let cfg = load_toml(&text).map_err(|e| eyre::eyre!("invalid configuration: {e}"))?;
    cfg.validate()
        .map_err(|e| eyre::eyre!("invalid configuration: {e}"))?;
    Ok(cfg)
}

impl Config {
    /// Speeds the scan visits, in order.
    pub fn scan_speeds(&self) -> Vec<u8> {
        if !self.scan.speeds.is_empty() {
            return self.scan.speeds.clone();
        }
        let min = self.control.min_fan_speed_percent;
        let max = self.control.max_fan_speed_percent;
        let step = usize::from(self.scan.step_percent.max(1));
        let mut out: Vec<u8> = (min..=max).step_by(step).collect();
        if out.last() != Some(&max) {
            out.push(max);
        }
        out
    }

    pub fn validate(&self) -> eyre::Result<()> {
        // BMC
        if self.bmc.host.trim().is_empty() {
            eyre::bail!("bmc.host must not be empty");
        }
        if self.bmc.username.trim().is_empty() {
            eyre::bail!("bmc.username must not be empty");
        }
        if self.bmc.command_timeout_ms == 0 {
            eyre::bail!("bmc.command_timeout_ms must be >= 1");
        }

        // Control
        let c = &self.control;
        if c.max_fan_speed_percent > 100 {
            eyre::bail!("control.max_fan_speed_percent must be <= 100");
        }
        if c.min_fan_speed_percent > c.max_fan_speed_percent {
            eyre::bail!("control.min_fan_speed_percent must be <= control.max_fan_speed_percent");
        }
        if c.hysteresis_percent > c.max_fan_speed_percent - c.min_fan_speed_percent {
            eyre::bail!("control.hysteresis_percent must not exceed the fan speed span");
        }
        if c.step_delay_ms == 0 {
            eyre::bail!("control.step_delay_ms must be >= 1");
        }
        if !c.desired_temp.is_finite() {
            eyre::bail!("control.desired_temp must be finite");
        }
        if c.max_consecutive_failures == 0 {
            eyre::bail!("control.max_consecutive_failures must be >= 1");
        }

        // PID
        for (name, v) in [("kp", self.pid.kp), ("ki", self.pid.ki), ("kd", self.pid.kd)] {
            if !v.is_finite() || v < 0.0 {
                eyre::bail!("pid.{name} must be finite and >= 0");
            }
        }

        // Safety
        if !self.safety.max_temp.is_finite() {
            eyre::bail!("safety.max_temp must be finite");
        }
        if c.desired_temp >= self.safety.max_temp {
            eyre::bail!("control.desired_temp must be below safety.max_temp");
        }
        if self.safety.revert_attempts == 0 {
            eyre::bail!("safety.revert_attempts must be >= 1");
        }
        if self.safety.revert_backoff_ms > 60_000 {
            eyre::bail!("safety.revert_backoff_ms is unreasonably large (>60s)");
        }

        // Scan
        if self.scan.step_percent == 0 {
            eyre::bail!("scan.step_percent must be >= 1");
        }
        if self.scan.settle_ms == 0 {
            eyre::bail!("scan.settle_ms must be >= 1");
        }
        if self.scan.max_step_failures == 0 {
            eyre::bail!("scan.max_step_failures must be >= 1");
        }
        if let Some(s) = self.scan.speeds.iter().find(|s| **s > 100) {
            eyre::bail!("scan.speeds entry {s} is out of range [0, 100]");
        }

        // Curve
        if self.curve.path.trim().is_empty() {
            eyre::bail!("curve.path must not be empty");
        }
        let mut seen = [false; 101];
        for (speed, _) in &self.curve.fallback {
            let idx = usize::from(*speed);
            if idx > 100 {
                eyre::bail!("curve.fallback speed {speed} is out of range [0, 100]");
            }
            if seen[idx] {
                eyre::bail!("curve.fallback has duplicate speed {speed}");
            }
            seen[idx] = true;
        }

        // Notify
        if self.notify.enabled {
            if self.notify.host.trim().is_empty() {
                eyre::bail!("notify.host must not be empty when notify.enabled");
            }
            if self.notify.topic.trim().is_empty() {
                eyre::bail!("notify.topic must not be empty when notify.enabled");
            }
        }
        if self.notify.timeout_ms == 0 {
            eyre::bail!("notify.timeout_ms must be >= 1");
        }

        // Logging
        if let Some(r) = self.logging.rotation.as_deref()
            && !matches!(r, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly, got {r}");
        }

        Ok(())
    }
}
