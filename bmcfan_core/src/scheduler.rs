//! The control loop: sample, gate, regulate or scan, filter, actuate.

use std::time::{Duration, Instant};

use bmcfan_traits::{Actuator, Clock, MonotonicClock, Notifier, Priority, Sampler};
use eyre::WrapErr;

use crate::config::ControlSettings;
use crate::curve::FanCurveStore;
use crate::error::{ControlError, Result};
use crate::hw_error::{Op, map_hw_error};
use crate::hysteresis;
use crate::notify::send_best_effort;
use crate::pid::PidController;
use crate::safety::{SafetyGuard, SafetyState, revert_with_retry};
use crate::scan::ScanEngine;
use crate::status::{Sample, TickOutcome};

/// Owns every piece of mutable control state for one fan zone.
///
/// Ticks are driven from outside (see [`crate::runner::run`]); each call to
/// [`tick`](Self::tick) runs to completion and never overlaps another.
pub struct ControlLoop<S, A, N, C = MonotonicClock> {
    settings: ControlSettings,
    sampler: S,
    actuator: A,
    notifier: N,
    clock: C,
    pid: PidController,
    guard: SafetyGuard,
    scan: ScanEngine,
    store: FanCurveStore,
    last_effective: Option<u8>,
    last_tick: Option<Instant>,
    consecutive_failures: u32,
    ticks: u64,
    bootstrapped: bool,
}

impl<S, A, N, C> ControlLoop<S, A, N, C>
where
    S: Sampler,
    A: Actuator,
    N: Notifier,
    C: Clock,
{
    pub fn new(
        settings: ControlSettings,
        sampler: S,
        actuator: A,
        notifier: N,
        clock: C,
        store: FanCurveStore,
    ) -> Self {
        let ctl = &settings.control;
        let pid = PidController::new(&settings.pid, ctl.min_percent, ctl.max_percent);
        let guard = SafetyGuard::new(settings.safety.clone());
        let scan = ScanEngine::new(settings.scan.clone());
        Self {
            settings,
            sampler,
            actuator,
            notifier,
            clock,
            pid,
            guard,
            scan,
            store,
            last_effective: None,
            last_tick: None,
            consecutive_failures: 0,
            ticks: 0,
            bootstrapped: false,
        }
    }

    /// One-time setup before the first tick.
    ///
    /// Disables the vendor cooling override when configured (a failure is
    /// reported but tolerated), then takes manual fan control (a failure is
    /// fatal). Starts a scan if scanning is enabled. Calling it again is a
    /// no-op.
    pub fn bootstrap(&mut self) -> Result<()> {
        if self.bootstrapped {
            return Ok(());
        }
        if self.settings.control.disable_vendor_cooling_override {
            match self.actuator.disable_vendor_cooling_override() {
                Ok(()) => tracing::info!("vendor cooling override disabled"),
                Err(e) => {
                    let err = map_hw_error(&*e, Op::Actuate);
                    tracing::warn!(error = %err, "could not disable vendor cooling override");
                    send_best_effort(
                        &mut self.notifier,
                        "Vendor cooling override still active",
                        &format!("Disabling the PCIe cooling response failed: {err}"),
                        Priority::Default,
                    );
                }
            }
        }

        self.actuator
            .enable_manual_control()
            .map_err(|e| eyre::Report::new(map_hw_error(&*e, Op::Actuate)))
            .wrap_err("enable manual fan control")?;
        tracing::info!("manual fan control enabled");
        self.bootstrapped = true;

        if self.settings.scan.enabled {
            self.scan.start();
        }
        Ok(())
    }

    /// Begin a fan curve scan on the next tick.
    pub fn start_scan(&mut self) -> bool {
        if self.guard.blocks_control() {
            tracing::warn!("scan refused, fan control has been reverted");
            return false;
        }
        self.scan.start()
    }

    /// Run one control tick.
    ///
    /// Soft failures come back as `Ok(TickOutcome::Skipped)`. The only error
    /// is `ControlError::FailSafe`, after too many ticks without a
    /// temperature; by then control has already been handed back.
    pub fn tick(&mut self) -> Result<TickOutcome> {
        self.ticks += 1;
        let now = self.clock.now();
        let timeout = self.settings.control.command_timeout;

        let temp_c = match self.sampler.read_temperature(timeout) {
            Ok(t) if t.is_finite() => t,
            Ok(t) => {
                let err = ControlError::SamplingUnavailable(format!("non-finite temperature {t}"));
                return self.sampling_failed(err);
            }
            Err(e) => return self.sampling_failed(map_hw_error(&*e, Op::Sample)),
        };
        self.consecutive_failures = 0;
        let sample = Sample { at: now, temp_c };
        let dt = self
            .last_tick
            .map_or(self.settings.control.step_delay, |t| now.saturating_duration_since(t));
        self.last_tick = Some(now);
        tracing::debug!(tick = self.ticks, temp_c, "tick");

        let state = self
            .guard
            .check(temp_c, &mut self.actuator, &mut self.notifier, &self.clock);
        if state != SafetyState::Normal {
            if self.scan.is_active() {
                self.scan.abort("temperature ceiling breached");
            }
            return Ok(TickOutcome::Safety { sample, state });
        }

        let outcome = if self.scan.is_active() {
            self.scan_tick(sample)
        } else {
            self.pid_tick(sample, dt)
        };
        self.maybe_send_status(temp_c);
        Ok(outcome)
    }

    fn sampling_failed(&mut self, err: ControlError) -> Result<TickOutcome> {
        // A pending overheat revert is retried even without a reading.
        if self.guard.state() == SafetyState::Overheat {
            self.guard
                .retry_pending(&mut self.actuator, &mut self.notifier, &self.clock);
        }
        self.consecutive_failures += 1;
        let limit = self.settings.control.max_consecutive_failures.max(1);
        tracing::warn!(
            error = %err,
            consecutive = self.consecutive_failures,
            limit,
            "temperature sample failed, tick skipped"
        );
        if self.consecutive_failures < limit {
            return Ok(TickOutcome::Skipped(err));
        }
        let reason = format!(
            "{} consecutive temperature reads failed (last: {err})",
            self.consecutive_failures
        );
        self.scan.abort("sampling unavailable");
        let reverted =
            self.guard
                .fail_safe(&reason, &mut self.actuator, &mut self.notifier, &self.clock);
        let msg = if reverted {
            reason
        } else {
            format!("{reason}; revert to BMC control also failed")
        };
        Err(eyre::Report::new(ControlError::FailSafe(msg)))
    }

    fn scan_tick(&mut self, sample: Sample) -> TickOutcome {
        let status = self.scan.advance(
            &mut self.sampler,
            &mut self.actuator,
            &mut self.notifier,
            &mut self.store,
            &self.clock,
            self.settings.control.command_timeout,
        );
        if let Some(p) = self.scan.last_commanded() {
            self.last_effective = Some(p);
            if !self.scan.is_active() {
                // Regulation resumes from where the scan left the fans.
                self.pid.rebase(f32::from(p));
            }
        }
        TickOutcome::Scan { sample, status }
    }

    fn pid_tick(&mut self, sample: Sample, dt: Duration) -> TickOutcome {
        let ctl = &self.settings.control;
        if ctl.rebase_on_rpm && self.store.curve().len() >= 2 {
            match self.sampler.read_fan_rpm(ctl.command_timeout) {
                Ok(rpm) => {
                    if let Some(p) = self.store.curve().percent_for_rpm(rpm) {
                        tracing::debug!(rpm, estimated_percent = p, "pid base from rpm");
                        self.pid.rebase(p);
                    }
                }
                Err(e) => {
                    let err = map_hw_error(&*e, Op::Sample);
                    tracing::warn!(error = %err, "rpm read failed, keeping previous pid base");
                }
            }
        }

        let snapshot = self.pid.state().clone();
        let output = self.pid.step(ctl.desired_temp, sample.temp_c, dt.as_secs_f32());
        let candidate = hysteresis::to_percent(output, ctl.min_percent, ctl.max_percent);
        let effective = hysteresis::apply(self.last_effective, candidate, ctl.hysteresis_percent);

        if self.last_effective == Some(effective) {
            tracing::debug!(candidate, percent = effective, "within deadband, holding");
            return TickOutcome::Held {
                sample,
                percent: effective,
            };
        }

        match self.actuator.set_fan_speed(effective) {
            Ok(()) => {
                tracing::info!(
                    temp_c = sample.temp_c,
                    percent = effective,
                    output,
                    "fan speed set"
                );
                self.last_effective = Some(effective);
                TickOutcome::Actuated {
                    sample,
                    percent: effective,
                }
            }
            Err(e) => {
                self.pid.restore(snapshot);
                let err = map_hw_error(&*e, Op::Actuate);
                tracing::warn!(
                    percent = effective,
                    error = %err,
                    "fan speed command failed, tick skipped"
                );
                TickOutcome::Skipped(err)
            }
        }
    }

    fn maybe_send_status(&mut self, temp_c: f32) {
        let every = u64::from(self.settings.control.status_every_ticks);
        if every == 0 || self.ticks % every != 0 {
            return;
        }
        let percent = self
            .last_effective
            .map_or_else(|| "n/a".to_owned(), |p| format!("{p}%"));
        let rpm = self
            .last_effective
            .and_then(|p| self.store.curve().rpm_for_percent(f32::from(p)))
            .map_or_else(|| "unknown".to_owned(), |r| format!("~{r:.0} rpm"));
        let body = format!(
            "Temperature {temp_c:.1}°C (target {:.1}°C), fans at {percent}, {rpm}",
            self.settings.control.desired_temp
        );
        send_best_effort(&mut self.notifier, "Fan controller status", &body, Priority::Low);
    }

    /// Hand control back to the BMC before exiting. A no-op if the guard
    /// already did so.
    pub fn shutdown(&mut self) -> Result<()> {
        self.scan.abort("shutdown");
        if self.guard.state() == SafetyState::Reverted {
            return Ok(());
        }
        let safety = &self.settings.safety;
        match revert_with_retry(
            &mut self.actuator,
            &self.clock,
            safety.revert_attempts,
            safety.revert_backoff,
        ) {
            Ok(attempt) => {
                tracing::info!(attempt, "fan control returned to BMC");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "could not return fan control to BMC on shutdown");
                Err(eyre::Report::new(e)).wrap_err("revert to default fan control")
            }
        }
    }

    pub fn settings(&self) -> &ControlSettings {
        &self.settings
    }

    pub fn store(&self) -> &FanCurveStore {
        &self.store
    }

    pub fn safety_state(&self) -> SafetyState {
        self.guard.state()
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.is_active()
    }

    /// Last percent actually sent to the fans.
    pub fn last_effective(&self) -> Option<u8> {
        self.last_effective
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn notifier_mut(&mut self) -> &mut N {
        &mut self.notifier
    }
}
