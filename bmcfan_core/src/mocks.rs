//! In-memory collaborators for tests and dry runs.
//!
//! `FakeBmc` implements both `Sampler` and `Actuator`. Clones share state,
//! so a test can hand one clone to the controller as sampler, another as
//! actuator, and keep a third to script readings and inspect the call log.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bmcfan_traits::{Actuator, BoxError, Notifier, Priority, Sampler};

/// One collaborator call, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ReadTemperature,
    ReadFanRpm,
    SetFanSpeed(u8),
    EnableManualControl,
    RevertToDefaultControl,
    DisableVendorCoolingOverride,
}

#[derive(Debug)]
struct BmcState {
    /// Scripted readings consumed front to back; `None` is a failed read.
    temps: VecDeque<Option<f32>>,
    /// Reading once the script runs out.
    steady_temp: f32,
    rpm_per_percent: u32,
    rpm_offset: u32,
    fail_rpm: u32,
    fail_set_speed: u32,
    fail_revert: u32,
    fail_enable: bool,
    fail_vendor: bool,
    percent: u8,
    calls: Vec<Call>,
}

#[derive(Debug, Clone)]
pub struct FakeBmc {
    inner: Arc<Mutex<BmcState>>,
}

impl Default for FakeBmc {
    fn default() -> Self {
        Self::new(50.0)
    }
}

fn fail(what: &str) -> BoxError {
    Box::new(std::io::Error::other(format!("fake bmc: {what} failed")))
}

/// Consume one unit of an injected failure budget.
fn take(budget: &mut u32) -> bool {
    if *budget > 0 {
        *budget -= 1;
        true
    } else {
        false
    }
}

impl FakeBmc {
    /// Fan RPM defaults to `120 * percent + 600`.
    pub fn new(steady_temp: f32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BmcState {
                temps: VecDeque::new(),
                steady_temp,
                rpm_per_percent: 120,
                rpm_offset: 600,
                fail_rpm: 0,
                fail_set_speed: 0,
                fail_revert: 0,
                fail_enable: false,
                fail_vendor: false,
                percent: 0,
                calls: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, BmcState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue temperature readings returned before the steady value.
    pub fn script_temps<I: IntoIterator<Item = f32>>(&self, temps: I) -> &Self {
        self.state().temps.extend(temps.into_iter().map(Some));
        self
    }

    /// Queue `n` failing temperature reads.
    pub fn fail_temps(&self, n: usize) -> &Self {
        self.state()
            .temps
            .extend(std::iter::repeat_n(None, n));
        self
    }

    pub fn set_steady_temp(&self, t: f32) -> &Self {
        self.state().steady_temp = t;
        self
    }

    pub fn set_rpm_model(&self, per_percent: u32, offset: u32) -> &Self {
        let mut s = self.state();
        s.rpm_per_percent = per_percent;
        s.rpm_offset = offset;
        self
    }

    pub fn fail_rpm_reads(&self, n: u32) -> &Self {
        self.state().fail_rpm = n;
        self
    }

    pub fn fail_set_speed(&self, n: u32) -> &Self {
        self.state().fail_set_speed = n;
        self
    }

    pub fn fail_reverts(&self, n: u32) -> &Self {
        self.state().fail_revert = n;
        self
    }

    pub fn fail_enable_manual(&self) -> &Self {
        self.state().fail_enable = true;
        self
    }

    pub fn fail_vendor_override(&self) -> &Self {
        self.state().fail_vendor = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Percentages passed to `set_fan_speed`, in order.
    pub fn speed_commands(&self) -> Vec<u8> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::SetFanSpeed(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.state().calls.iter().filter(|c| *c == call).count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Last percent the fake accepted.
    pub fn percent(&self) -> u8 {
        self.state().percent
    }
}

impl Sampler for FakeBmc {
    fn read_temperature(&mut self, _timeout: Duration) -> Result<f32, BoxError> {
        let mut s = self.state();
        s.calls.push(Call::ReadTemperature);
        match s.temps.pop_front() {
            Some(Some(t)) => Ok(t),
            Some(None) => Err(fail("temperature read")),
            None => Ok(s.steady_temp),
        }
    }

    fn read_fan_rpm(&mut self, _timeout: Duration) -> Result<u32, BoxError> {
        let mut s = self.state();
        s.calls.push(Call::ReadFanRpm);
        if take(&mut s.fail_rpm) {
            return Err(fail("rpm read"));
        }
        Ok(u32::from(s.percent) * s.rpm_per_percent + s.rpm_offset)
    }
}

impl Actuator for FakeBmc {
    fn set_fan_speed(&mut self, percent: u8) -> Result<(), BoxError> {
        let mut s = self.state();
        s.calls.push(Call::SetFanSpeed(percent));
        if take(&mut s.fail_set_speed) {
            return Err(fail("set fan speed"));
        }
        s.percent = percent;
        Ok(())
    }

    fn enable_manual_control(&mut self) -> Result<(), BoxError> {
        let mut s = self.state();
        s.calls.push(Call::EnableManualControl);
        if s.fail_enable {
            return Err(fail("enable manual control"));
        }
        Ok(())
    }

    fn revert_to_default_control(&mut self) -> Result<(), BoxError> {
        let mut s = self.state();
        s.calls.push(Call::RevertToDefaultControl);
        if take(&mut s.fail_revert) {
            return Err(fail("revert"));
        }
        Ok(())
    }

    fn disable_vendor_cooling_override(&mut self) -> Result<(), BoxError> {
        let mut s = self.state();
        s.calls.push(Call::DisableVendorCoolingOverride);
        if s.fail_vendor {
            return Err(fail("disable vendor override"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub title: String,
    pub body: String,
    pub priority: Priority,
}

/// Notifier that keeps every message it was asked to send.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Sent>>>,
    failing: bool,
}

impl RecordingNotifier {
    /// Records messages but reports every send as failed.
    pub fn failing() -> Self {
        Self {
            sent: Arc::default(),
            failing: true,
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count_at(&self, priority: Priority) -> usize {
        self.sent().iter().filter(|m| m.priority == priority).count()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&mut self, title: &str, body: &str, priority: Priority) -> Result<(), BoxError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Sent {
                title: title.to_owned(),
                body: body.to_owned(),
                priority,
            });
        if self.failing {
            return Err(fail("notify"));
        }
        Ok(())
    }
}
