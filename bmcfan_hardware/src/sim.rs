//! Simulated BMC for demos and CLI tests.
//!
//! First-order thermal model: each temperature read moves the die a fixed
//! fraction of the way towards the steady state for the current fan duty.
//! Fan RPM is linear in duty. Like a real iDRAC, fixed speeds are ignored
//! until manual control is enabled, and default control runs the fans at
//! `auto_percent`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bmcfan_traits::{Actuator, BoxError, Sampler};

use crate::error::HwError;

#[derive(Debug, Clone, PartialEq)]
pub struct SimParams {
    pub start_temp: f32,
    pub ambient: f32,
    /// Rise above ambient with the fans stopped.
    pub heat: f32,
    /// Fraction of `heat` removed at 100 % duty.
    pub cooling: f32,
    /// Fraction of the gap to steady state closed per read.
    pub response: f32,
    pub rpm_per_percent: u32,
    pub rpm_idle: u32,
    pub auto_percent: u8,
    /// Number of leading temperature reads that fail.
    pub fail_temp_reads: u32,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            start_temp: 55.0,
            ambient: 25.0,
            heat: 60.0,
            cooling: 0.6,
            response: 0.3,
            rpm_per_percent: 108,
            rpm_idle: 1200,
            auto_percent: 30,
            fail_temp_reads: 0,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(v) => v.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparsable simulator setting");
            default
        }),
        Err(_) => default,
    }
}

impl SimParams {
    /// Defaults overridden by `BMCFAN_SIM_START_TEMP`, `BMCFAN_SIM_AMBIENT`,
    /// `BMCFAN_SIM_HEAT` and `BMCFAN_SIM_FAIL_TEMP_READS`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            start_temp: env_or("BMCFAN_SIM_START_TEMP", d.start_temp),
            ambient: env_or("BMCFAN_SIM_AMBIENT", d.ambient),
            heat: env_or("BMCFAN_SIM_HEAT", d.heat),
            fail_temp_reads: env_or("BMCFAN_SIM_FAIL_TEMP_READS", d.fail_temp_reads),
            ..d
        }
    }
}

#[derive(Debug)]
struct SimState {
    params: SimParams,
    temp: f32,
    manual: bool,
    manual_percent: u8,
    temp_reads: u32,
}

impl SimState {
    fn duty(&self) -> u8 {
        if self.manual {
            self.manual_percent
        } else {
            self.params.auto_percent
        }
    }

    fn steady_temp(&self) -> f32 {
        let p = &self.params;
        p.ambient + p.heat * (1.0 - p.cooling * f32::from(self.duty()) / 100.0)
    }
}

/// Clones share one simulated machine.
#[derive(Debug, Clone)]
pub struct SimulatedBmc {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedBmc {
    fn default() -> Self {
        Self::new(SimParams::default())
    }
}

impl SimulatedBmc {
    pub fn new(params: SimParams) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                temp: params.start_temp,
                params,
                manual: false,
                manual_percent: 0,
                temp_reads: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Duty the fans are actually running at.
    pub fn duty(&self) -> u8 {
        self.lock().duty()
    }

    pub fn is_manual(&self) -> bool {
        self.lock().manual
    }
}

impl Sampler for SimulatedBmc {
    fn read_temperature(&mut self, _timeout: Duration) -> Result<f32, BoxError> {
        let mut s = self.lock();
        s.temp_reads += 1;
        if s.temp_reads <= s.params.fail_temp_reads {
            return Err(Box::new(HwError::Parse {
                what: "temperature",
                detail: "simulated sensor failure".into(),
            }));
        }
        let target = s.steady_temp();
        let response = s.params.response.clamp(0.0, 1.0);
        s.temp += (target - s.temp) * response;
        tracing::trace!(temp_c = s.temp, duty = s.duty(), "sim temperature");
        Ok(s.temp.round())
    }

    fn read_fan_rpm(&mut self, _timeout: Duration) -> Result<u32, BoxError> {
        let s = self.lock();
        Ok(s.params.rpm_idle + u32::from(s.duty()) * s.params.rpm_per_percent)
    }
}

impl Actuator for SimulatedBmc {
    fn set_fan_speed(&mut self, percent: u8) -> Result<(), BoxError> {
        if percent > 100 {
            return Err(Box::new(HwError::InvalidArgument(format!(
                "fan speed {percent}% is above 100%"
            ))));
        }
        let mut s = self.lock();
        s.manual_percent = percent;
        if !s.manual {
            tracing::debug!(percent, "sim ignoring fixed speed outside manual mode");
        }
        Ok(())
    }

    fn enable_manual_control(&mut self) -> Result<(), BoxError> {
        self.lock().manual = true;
        Ok(())
    }

    fn revert_to_default_control(&mut self) -> Result<(), BoxError> {
        self.lock().manual = false;
        Ok(())
    }

    fn disable_vendor_cooling_override(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(1);

    #[test]
    fn speed_only_applies_in_manual_mode() {
        let mut bmc = SimulatedBmc::default();
        bmc.set_fan_speed(80).unwrap();
        assert_eq!(bmc.duty(), 30);
        bmc.enable_manual_control().unwrap();
        assert_eq!(bmc.duty(), 80);
        assert_eq!(bmc.read_fan_rpm(T).unwrap(), 1200 + 80 * 108);
        bmc.revert_to_default_control().unwrap();
        assert_eq!(bmc.duty(), 30);
    }

    #[test]
    fn more_fan_means_cooler() {
        let mut hot = SimulatedBmc::default();
        let mut cold = SimulatedBmc::default();
        hot.enable_manual_control().unwrap();
        cold.enable_manual_control().unwrap();
        hot.set_fan_speed(10).unwrap();
        cold.set_fan_speed(100).unwrap();
        let (mut th, mut tc) = (0.0, 0.0);
        for _ in 0..50 {
            th = hot.read_temperature(T).unwrap();
            tc = cold.read_temperature(T).unwrap();
        }
        assert!(th > tc + 20.0, "hot {th} cold {tc}");
        assert!((tc - 49.0).abs() <= 1.0);
    }

    #[test]
    fn scripted_sensor_failures() {
        let mut bmc = SimulatedBmc::new(SimParams {
            fail_temp_reads: 2,
            ..SimParams::default()
        });
        assert!(bmc.read_temperature(T).is_err());
        assert!(bmc.read_temperature(T).is_err());
        assert!(bmc.read_temperature(T).is_ok());
    }
}
