#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Fan control engine (hardware-agnostic).
//!
//! All BMC interaction goes through the `Sampler`, `Actuator` and `Notifier`
//! traits from `bmcfan_traits`; time goes through `Clock`. Nothing here
//! spawns a process or opens a socket.
//!
//! ## Architecture
//!
//! - **Regulation**: incremental or positional PID with anti-windup (`pid`)
//! - **Deadband**: hysteresis between regulator and fans (`hysteresis`)
//! - **Fan curve**: speed to RPM table with atomic persistence (`curve`)
//! - **Scan**: state machine that measures the fan curve (`scan`)
//! - **Safety**: overheat latch and fail-safe revert (`safety`)
//! - **Orchestration**: per-tick sequencing (`scheduler`) and pacing (`runner`)
//!
//! Each tick: sample, safety gate, scan step or PID step, deadband, actuate.

pub mod atomic;
pub mod config;
pub mod conversions;
pub mod curve;
pub mod error;
pub mod hw_error;
pub mod hysteresis;
pub mod mocks;
pub mod notify;
pub mod pid;
pub mod runner;
pub mod safety;
pub mod scan;
pub mod scheduler;
pub mod status;

pub use config::{ControlCfg, ControlSettings, PidCfg, PidForm, PidGains, SafetyCfg, ScanCfg};
pub use curve::{FanCurve, FanCurveEntry, FanCurveStore};
pub use error::{ControlError, Report, Result};
pub use pid::{ControllerState, PidController};
pub use runner::{RunSummary, StopReason, run};
pub use safety::{SafetyGuard, SafetyState};
pub use scan::{ScanEngine, ScanPhase, ScanStatus};
pub use scheduler::ControlLoop;
pub use status::{Sample, TickOutcome};
