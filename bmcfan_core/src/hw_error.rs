//! Maps `Box<dyn Error>` from trait boundaries to typed `ControlError`.
//!
//! The traits in `bmcfan_traits` use `Box<dyn Error + Send + Sync>` so any
//! backend can plug in; this module converts those to our typed error enum,
//! with an optional feature-gated path for `bmcfan_hardware::HwError`
//! downcasting.

use crate::error::ControlError;

/// Which side of the collaborator boundary produced the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Sample,
    Actuate,
    Notify,
}

fn classify(op: Op, msg: String) -> ControlError {
    match op {
        Op::Sample => ControlError::SamplingUnavailable(msg),
        Op::Actuate => ControlError::ActuationFailed(msg),
        Op::Notify => ControlError::NotificationFailed(msg),
    }
}

/// Map a trait-boundary error to a typed `ControlError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static), op: Op) -> ControlError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<bmcfan_hardware::error::HwError>() {
            return match hw {
                bmcfan_hardware::error::HwError::Timeout { .. } => ControlError::Timeout,
                other => classify(op, other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timed out") || s.to_lowercase().contains("timeout") {
        ControlError::Timeout
    } else {
        classify(op, s)
    }
}
