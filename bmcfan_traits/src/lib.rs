//! Collaborator seams between the control engine and the outside world.
//!
//! The engine never talks to `ipmitool`, `racadm` or an HTTP endpoint
//! directly; it only sees these traits. Errors crossing the boundary are
//! boxed so backends can carry their own error types.

pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

use std::time::Duration;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Read side of the BMC: temperatures and fan tachometers.
pub trait Sampler {
    /// Highest CPU temperature in degrees Celsius.
    fn read_temperature(&mut self, timeout: Duration) -> Result<f32, BoxError>;
    /// Current RPM of the reference fan.
    fn read_fan_rpm(&mut self, timeout: Duration) -> Result<u32, BoxError>;
}

/// Write side of the BMC.
pub trait Actuator {
    /// Apply a fixed fan duty in percent (0..=100).
    fn set_fan_speed(&mut self, percent: u8) -> Result<(), BoxError>;
    /// Take fan control away from the BMC's own thermal algorithm.
    fn enable_manual_control(&mut self) -> Result<(), BoxError>;
    /// Hand fan control back to the BMC's default algorithm.
    fn revert_to_default_control(&mut self) -> Result<(), BoxError>;
    /// Disable the vendor "third-party PCIe card" cooling response.
    fn disable_vendor_cooling_override(&mut self) -> Result<(), BoxError>;
}

/// Notification urgency, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    Min,
    Low,
    #[default]
    Default,
    High,
    Urgent,
}

impl Priority {
    /// ntfy priority number (1 = min .. 5 = urgent).
    pub fn level(self) -> u8 {
        match self {
            Priority::Min => 1,
            Priority::Low => 2,
            Priority::Default => 3,
            Priority::High => 4,
            Priority::Urgent => 5,
        }
    }
}

/// Best-effort push notifications.
pub trait Notifier {
    fn send(&mut self, title: &str, body: &str, priority: Priority) -> Result<(), BoxError>;
}

impl<T: Sampler + ?Sized> Sampler for Box<T> {
    fn read_temperature(&mut self, timeout: Duration) -> Result<f32, BoxError> {
        (**self).read_temperature(timeout)
    }
    fn read_fan_rpm(&mut self, timeout: Duration) -> Result<u32, BoxError> {
        (**self).read_fan_rpm(timeout)
    }
}

impl<T: Actuator + ?Sized> Actuator for Box<T> {
    fn set_fan_speed(&mut self, percent: u8) -> Result<(), BoxError> {
        (**self).set_fan_speed(percent)
    }
    fn enable_manual_control(&mut self) -> Result<(), BoxError> {
        (**self).enable_manual_control()
    }
    fn revert_to_default_control(&mut self) -> Result<(), BoxError> {
        (**self).revert_to_default_control()
    }
    fn disable_vendor_cooling_override(&mut self) -> Result<(), BoxError> {
        (**self).disable_vendor_cooling_override()
    }
}

impl<T: Notifier + ?Sized> Notifier for Box<T> {
    fn send(&mut self, title: &str, body: &str, priority: Priority) -> Result<(), BoxError> {
        (**self).send(title, body, priority)
    }
}
