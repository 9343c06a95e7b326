//! What a single control tick did.

use std::time::Instant;

use crate::error::ControlError;
use crate::safety::SafetyState;
use crate::scan::ScanStatus;

/// One temperature reading. Consumed by the tick that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub at: Instant,
    pub temp_c: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// PID output sent to the fans.
    Actuated { sample: Sample, percent: u8 },
    /// PID output within the deadband; the previous command stays.
    Held { sample: Sample, percent: u8 },
    /// The scan engine had control this tick.
    Scan { sample: Sample, status: ScanStatus },
    /// Safety guard is not `Normal`; nothing else ran.
    Safety { sample: Sample, state: SafetyState },
    /// Soft failure; previous command and regulator state kept.
    Skipped(ControlError),
}

impl TickOutcome {
    pub fn sample(&self) -> Option<&Sample> {
        match self {
            TickOutcome::Actuated { sample, .. }
            | TickOutcome::Held { sample, .. }
            | TickOutcome::Scan { sample, .. }
            | TickOutcome::Safety { sample, .. } => Some(sample),
            TickOutcome::Skipped(_) => None,
        }
    }
}
