//! # PID feedback controller.
//!
//! [`Pid`] keeps integral and derivative state between calls; everything else is
//! a pure function of the current input.
//!
//! ```text
//! error      = setpoint - input
//! integral  += ki * error * dt          (clamped to output bounds)
//! derivative = -kd * (input - last_input) / dt
//! output     = clamp(kp * error + integral + derivative)
//! ```
//!
//! ## Rules
//! - Derivative is taken on the measurement, so setpoint changes never kick the output.
//! - Changing the setpoint does **not** reset integral history.
//! - Integral is clamped to the output bounds (anti-windup).
//! - `dt <= 0` skips the integral and derivative terms for that call.

use serde::Deserialize;

/// Proportional / integral / derivative gains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

/// PID controller with bounded output.
#[derive(Debug, Clone)]
pub struct Pid {
    gains: PidGains,
    setpoint: f64,
    min_output: f64,
    max_output: f64,
    integral: f64,
    last_input: Option<f64>,
    last_output: Option<f64>,
}

impl Pid {
    /// Creates a controller with output clamped to `[min_output, max_output]`.
    pub fn new(gains: PidGains, setpoint: f64, min_output: f64, max_output: f64) -> Self {
        let (min_output, max_output) = if min_output <= max_output {
            (min_output, max_output)
        } else {
            (max_output, min_output)
        };
        Self {
            gains,
            setpoint,
            min_output,
            max_output,
            integral: 0.0,
            last_input: None,
            last_output: None,
        }
    }

    /// Computes the next control signal for `input` after `dt` time units.
    pub fn update(&mut self, input: f64, dt: f64) -> f64 {
        let error = self.setpoint - input;
        let proportional = self.gains.kp * error;

        let mut derivative = 0.0;
        if dt > 0.0 {
            self.integral = self.clamp(self.integral + self.gains.ki * error * dt);
            if let Some(last) = self.last_input {
                derivative = -self.gains.kd * (input - last) / dt;
            }
        }

        let output = self.clamp(proportional + self.integral + derivative);
        self.last_input = Some(input);
        self.last_output = Some(output);
        output
    }

    /// Moves the target without touching accumulated history.
    pub fn set_setpoint(&mut self, setpoint: f64) {
        self.setpoint = setpoint;
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    /// Output of the most recent `update`, if any.
    pub fn last_output(&self) -> Option<f64> {
        self.last_output
    }

    fn clamp(&self, v: f64) -> f64 {
        v.clamp(self.min_output, self.max_output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gains(kp: f64, ki: f64, kd: f64) -> PidGains {
        PidGains { kp, ki, kd }
    }

    #[test]
    fn proportional_only() {
        let mut pid = Pid::new(gains(2.0, 0.0, 0.0), 1.0, -10.0, 10.0);
        assert_eq!(pid.update(0.5, 1.0), 1.0);
        assert_eq!(pid.update(1.5, 1.0), -1.0);
    }

    #[test]
    fn output_is_clamped() {
        let mut pid = Pid::new(gains(100.0, 0.0, 0.0), 1.0, 0.0, 1.0);
        assert_eq!(pid.update(0.0, 1.0), 1.0);
        assert_eq!(pid.update(2.0, 1.0), 0.0);
    }

    #[test]
    fn negative_gains_act_above_setpoint() {
        let mut pid = Pid::new(gains(-2.97, -0.11, -0.09), 2.4, 0.0, 1.0);
        assert!(pid.update(3.2, 60.0) > 0.5);
    }

    #[test]
    fn setpoint_change_keeps_integral() {
        let mut pid = Pid::new(gains(0.0, 1.0, 0.0), 1.0, -100.0, 100.0);
        assert_eq!(pid.update(0.0, 1.0), 1.0);
        pid.set_setpoint(0.0);
        // error is now zero, so the output is exactly the retained integral
        assert_eq!(pid.update(0.0, 1.0), 1.0);
        assert_eq!(pid.setpoint(), 0.0);
    }

    #[test]
    fn zero_dt_skips_integral_and_derivative() {
        let mut pid = Pid::new(gains(1.0, 5.0, 5.0), 1.0, -100.0, 100.0);
        assert_eq!(pid.update(0.0, 0.0), 1.0);
        assert_eq!(pid.last_output(), Some(1.0));
    }

    #[test]
    fn derivative_on_measurement() {
        let mut pid = Pid::new(gains(0.0, 0.0, 1.0), 0.0, -100.0, 100.0);
        assert_eq!(pid.update(1.0, 1.0), 0.0);
        assert_eq!(pid.update(3.0, 1.0), -2.0);
    }
}
