//! PID regulator turning a temperature error into a fan duty command.
//!
//! Positive error means the machine is warmer than the setpoint and pushes
//! the output up. The integral accumulator is clamped to `span / ki` so the
//! integral term alone can never ask for more than the full output span;
//! after a long saturation the output therefore leaves the rail as soon as
//! the error changes sign instead of waiting for the accumulator to unwind.

use crate::config::{PidCfg, PidForm, PidGains};

/// Mutable regulator state. Lives only in memory: a restart starts cold.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
    pub integral: f32,
    /// `None` until the first successful step; the first derivative is zero.
    pub previous_error: Option<f32>,
    pub previous_output: f32,
}

#[derive(Debug, Clone)]
pub struct PidController {
    gains: PidGains,
    form: PidForm,
    min: f32,
    max: f32,
    state: ControllerState,
}

impl PidController {
    /// New regulator with output bounds in percent. The initial output is `min`.
    pub fn new(cfg: &PidCfg, min_percent: u8, max_percent: u8) -> Self {
        let (lo, hi) = if min_percent <= max_percent {
            (min_percent, max_percent)
        } else {
            (max_percent, min_percent)
        };
        Self {
            gains: cfg.gains,
            form: cfg.form,
            min: f32::from(lo),
            max: f32::from(hi),
            state: ControllerState {
                integral: 0.0,
                previous_error: None,
                previous_output: f32::from(lo),
            },
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Put back a snapshot taken with `state().clone()`.
    pub fn restore(&mut self, state: ControllerState) {
        self.state = state;
    }

    /// Magnitude bound of the integral accumulator (0 when `ki` is 0).
    pub fn integral_limit(&self) -> f32 {
        if self.gains.ki > f32::EPSILON {
            (self.max - self.min) / self.gains.ki
        } else {
            0.0
        }
    }

    /// Replace the base of the next incremental step, e.g. with the percent
    /// the fan is actually running at. Non-finite values are ignored.
    pub fn rebase(&mut self, percent: f32) {
        if percent.is_finite() {
            self.state.previous_output = percent.clamp(self.min, self.max);
        }
    }

    /// One regulator update. `dt_secs` is the time since the previous step.
    ///
    /// A non-positive or non-finite `dt_secs`, or a non-finite input,
    /// returns the previous output and leaves the state untouched.
    pub fn step(&mut self, setpoint: f32, measured: f32, dt_secs: f32) -> f32 {
        if !(dt_secs.is_finite() && dt_secs > 0.0) || !setpoint.is_finite() || !measured.is_finite()
        {
            tracing::warn!(dt_secs, measured, "pid step skipped");
            return self.state.previous_output;
        }

        let error = measured - setpoint;
        let proportional = self.gains.kp * error;

        let limit = self.integral_limit();
        self.state.integral = (self.state.integral + error * dt_secs).clamp(-limit, limit);
        let integral = self.gains.ki * self.state.integral;

        let derivative = match self.state.previous_error {
            Some(prev) => self.gains.kd * (error - prev) / dt_secs,
            None => 0.0,
        };
        self.state.previous_error = Some(error);

        let correction = proportional + integral + derivative;
        let raw = match self.form {
            PidForm::Incremental => self.state.previous_output + correction,
            PidForm::Positional => correction,
        };
        let output = if raw.is_nan() {
            self.state.previous_output
        } else {
            raw.clamp(self.min, self.max)
        };

        tracing::debug!(
            error,
            proportional,
            integral,
            derivative,
            raw,
            output,
            "pid step"
        );
        self.state.previous_output = output;
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(kp: f32, ki: f32, kd: f32, form: PidForm) -> PidController {
        PidController::new(
            &PidCfg {
                gains: PidGains { kp, ki, kd },
                form,
            },
            10,
            100,
        )
    }

    #[test]
    fn proportional_only_incremental_adds_to_previous() {
        let mut p = pid(2.0, 0.0, 0.0, PidForm::Incremental);
        p.rebase(30.0);
        let out = p.step(60.0, 70.0, 1.0);
        assert!((out - 50.0).abs() < 1e-4, "got {out}");
    }

    #[test]
    fn incremental_output_clamps_to_max() {
        let mut p = pid(2.0, 0.0, 0.0, PidForm::Incremental);
        p.rebase(90.0);
        assert!((p.step(60.0, 70.0, 1.0) - 100.0).abs() < 1e-4);
    }

    #[test]
    fn positional_output_is_pid_sum() {
        let mut p = pid(2.0, 0.0, 0.0, PidForm::Positional);
        assert!((p.step(60.0, 80.0, 1.0) - 40.0).abs() < 1e-4);
        // Below setpoint clamps to the floor
        assert!((p.step(60.0, 50.0, 1.0) - 10.0).abs() < 1e-4);
    }

    #[test]
    fn non_positive_dt_returns_previous_output_unchanged() {
        let mut p = pid(2.0, 0.1, 1.0, PidForm::Incremental);
        let first = p.step(60.0, 65.0, 1.0);
        let before = p.state().clone();
        assert_eq!(p.step(60.0, 90.0, 0.0), first);
        assert_eq!(p.step(60.0, 90.0, -3.0), first);
        assert_eq!(p.step(60.0, 90.0, f32::NAN), first);
        assert_eq!(p.state(), &before);
    }

    #[test]
    fn first_step_has_no_derivative_kick() {
        let mut p = pid(0.0, 0.0, 5.0, PidForm::Positional);
        assert!((p.step(60.0, 70.0, 1.0) - 10.0).abs() < 1e-4);
        // error moves 10 -> 14 over 2s: D = 5 * 4 / 2 = 10
        assert!((p.step(60.0, 74.0, 2.0) - 10.0).abs() < 1e-4);
        assert!((p.step(60.0, 80.0, 1.0) - 30.0).abs() < 1e-4);
    }

    #[test]
    fn integral_is_clamped_to_span_over_ki() {
        let mut p = pid(0.0, 0.5, 0.0, PidForm::Positional);
        for _ in 0..1000 {
            p.step(60.0, 90.0, 1.0);
        }
        assert!((p.integral_limit() - 180.0).abs() < 1e-4);
        assert!((p.state().integral - 180.0).abs() < 1e-3);
    }

    #[test]
    fn zero_ki_keeps_accumulator_at_zero() {
        let mut p = pid(1.0, 0.0, 0.0, PidForm::Positional);
        p.step(60.0, 90.0, 10.0);
        assert_eq!(p.state().integral, 0.0);
    }

    #[test]
    fn restore_rolls_back_a_step() {
        let mut p = pid(1.0, 0.1, 0.0, PidForm::Incremental);
        let snapshot = p.state().clone();
        p.step(60.0, 75.0, 1.0);
        assert_ne!(p.state(), &snapshot);
        p.restore(snapshot.clone());
        assert_eq!(p.state(), &snapshot);
    }
}
