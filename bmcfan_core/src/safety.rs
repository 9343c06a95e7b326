//! Overheat guard: the gate every tick passes before PID or scan logic.
//!
//! A sample at or above the ceiling hands the fans back to the BMC and
//! latches. There is no way back to `Normal` inside one process; an operator
//! has to look at the machine and restart the service.

use std::time::Duration;

use bmcfan_traits::{Actuator, Clock, Notifier, Priority};

use crate::config::SafetyCfg;
use crate::error::ControlError;
use crate::hw_error::{Op, map_hw_error};
use crate::notify::send_best_effort;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SafetyState {
    #[default]
    Normal,
    /// Ceiling breached, BMC has not yet confirmed the revert.
    Overheat,
    /// Fans are back under BMC control. Terminal.
    Reverted,
}

#[derive(Debug)]
pub struct SafetyGuard {
    cfg: SafetyCfg,
    state: SafetyState,
    escalated: bool,
}

impl SafetyGuard {
    pub fn new(cfg: SafetyCfg) -> Self {
        Self {
            cfg,
            state: SafetyState::Normal,
            escalated: false,
        }
    }

    pub fn state(&self) -> SafetyState {
        self.state
    }

    /// True once manual control must no longer be exercised.
    pub fn blocks_control(&self) -> bool {
        self.state != SafetyState::Normal
    }

    /// Evaluate one temperature sample.
    ///
    /// On a breach the revert is attempted right away (with retries); on
    /// success the guard is `Reverted` and one high-priority notification
    /// goes out. If every attempt fails the guard stays in `Overheat`, sends
    /// one urgent escalation and retries on each later call regardless of
    /// the temperature.
    pub fn check<A, N, C>(
        &mut self,
        temp_c: f32,
        actuator: &mut A,
        notifier: &mut N,
        clock: &C,
    ) -> SafetyState
    where
        A: Actuator + ?Sized,
        N: Notifier + ?Sized,
        C: Clock + ?Sized,
    {
        match self.state {
            SafetyState::Reverted => {
                tracing::debug!(temp_c, "fan control already reverted");
            }
            SafetyState::Normal if temp_c >= self.cfg.max_temp => {
                self.state = SafetyState::Overheat;
                tracing::error!(
                    temp_c,
                    max_temp = self.cfg.max_temp,
                    "temperature ceiling breached"
                );
                let body = format!(
                    "Temperature {temp_c:.1}°C reached the {:.1}°C ceiling. \
                     Fan control handed back to the BMC; \
                     restart the service once the cause is fixed.",
                    self.cfg.max_temp
                );
                self.revert(actuator, notifier, clock, &body);
            }
            SafetyState::Normal => {}
            SafetyState::Overheat => {
                let body = format!(
                    "Revert succeeded after earlier failures; last temperature {temp_c:.1}°C."
                );
                self.revert(actuator, notifier, clock, &body);
            }
        }
        self.state
    }

    /// Retry a revert left pending by an earlier breach on a tick that has
    /// no temperature to pass to [`check`](Self::check).
    pub fn retry_pending<A, N, C>(
        &mut self,
        actuator: &mut A,
        notifier: &mut N,
        clock: &C,
    ) -> SafetyState
    where
        A: Actuator + ?Sized,
        N: Notifier + ?Sized,
        C: Clock + ?Sized,
    {
        if self.state == SafetyState::Overheat {
            self.revert(
                actuator,
                notifier,
                clock,
                "Revert succeeded after earlier failures; temperature currently unreadable.",
            );
        }
        self.state
    }

    /// Give control back to the BMC for a reason other than temperature,
    /// e.g. the sampler has been failing for too long.
    ///
    /// Always sends one urgent notification. Returns whether the BMC
    /// accepted the revert.
    pub fn fail_safe<A, N, C>(
        &mut self,
        reason: &str,
        actuator: &mut A,
        notifier: &mut N,
        clock: &C,
    ) -> bool
    where
        A: Actuator + ?Sized,
        N: Notifier + ?Sized,
        C: Clock + ?Sized,
    {
        tracing::error!(reason, "fail-safe revert");
        if self.state == SafetyState::Reverted {
            send_best_effort(notifier, "Fail-safe engaged", reason, Priority::Urgent);
            return true;
        }
        self.state = SafetyState::Overheat;
        let ok = match self.retry(actuator, clock) {
            Ok(_) => {
                self.state = SafetyState::Reverted;
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "fail-safe revert exhausted retries");
                false
            }
        };
        let body = if ok {
            format!("{reason}. Fan control handed back to the BMC.")
        } else {
            format!("{reason}. Reverting fan control to the BMC FAILED; check the machine now.")
        };
        send_best_effort(notifier, "Fail-safe engaged", &body, Priority::Urgent);
        ok
    }

    fn retry<A, C>(&self, actuator: &mut A, clock: &C) -> Result<u32, ControlError>
    where
        A: Actuator + ?Sized,
        C: Clock + ?Sized,
    {
        revert_with_retry(
            actuator,
            clock,
            self.cfg.revert_attempts,
            self.cfg.revert_backoff,
        )
    }

    fn revert<A, N, C>(&mut self, actuator: &mut A, notifier: &mut N, clock: &C, body: &str)
    where
        A: Actuator + ?Sized,
        N: Notifier + ?Sized,
        C: Clock + ?Sized,
    {
        match self.retry(actuator, clock) {
            Ok(attempt) => {
                self.state = SafetyState::Reverted;
                tracing::error!(attempt, "fan control reverted to BMC");
                send_best_effort(
                    notifier,
                    "Overheat: fans reverted to BMC",
                    body,
                    Priority::High,
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "revert to BMC control failed, retrying next tick");
                if !self.escalated {
                    self.escalated = true;
                    let body = format!(
                        "The BMC refused to take back fan control after {} attempts: {e}. \
                         Retrying every tick.",
                        self.cfg.revert_attempts
                    );
                    send_best_effort(
                        notifier,
                        "URGENT: fan revert failing",
                        &body,
                        Priority::Urgent,
                    );
                }
            }
        }
    }
}

/// Call `revert_to_default_control` up to `attempts` times, sleeping
/// `backoff`, `2 * backoff`, `4 * backoff`, ... between tries.
///
/// Returns the 1-based attempt that succeeded, or the last error.
pub fn revert_with_retry<A, C>(
    actuator: &mut A,
    clock: &C,
    attempts: u32,
    backoff: Duration,
) -> Result<u32, ControlError>
where
    A: Actuator + ?Sized,
    C: Clock + ?Sized,
{
    let attempts = attempts.max(1);
    let mut last = ControlError::ActuationFailed("no revert attempted".into());
    for attempt in 1..=attempts {
        match actuator.revert_to_default_control() {
            Ok(()) => return Ok(attempt),
            Err(e) => {
                last = map_hw_error(&*e, Op::Actuate);
                tracing::warn!(attempt, error = %last, "revert attempt failed");
                if attempt < attempts {
                    let shift = (attempt - 1).min(16);
                    clock.sleep(backoff.saturating_mul(1 << shift));
                }
            }
        }
    }
    Err(last)
}
