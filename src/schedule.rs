//! Cyclical learning rates (Smith, "Cyclical Learning Rates for Training Neural Networks").
//!
//! The rate oscillates between `base_lr` and `max_lr` along a triangular wave whose half period is
//! `step_size` gradient steps. `Triangular2` halves the amplitude every cycle and `ExpRange`
//! multiplies the rate by `gamma^t`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use tracing::debug;

pub const DEFAULT_STEP_SIZE: u64 = 2000;
pub const DEFAULT_GAMMA: f64 = 0.99994;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclicalMode {
    Triangular,
    Triangular2,
    ExpRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CyclicalLearningRate {
    base_lr: f64,
    max_lr: f64,
    mode: CyclicalMode,
    step_size: u64,
    gamma: f64,
    iteration: u64,
}

impl CyclicalLearningRate {
    pub fn new(
        base_lr: f64,
        max_lr: f64,
        mode: CyclicalMode,
        step_size: u64,
        gamma: f64,
    ) -> Result<CyclicalLearningRate> {
        if step_size == 0 {
            return Err(Error::Configuration("schedule step size must be at least 1".into()));
        }
        if !(base_lr.is_finite() && max_lr.is_finite() && base_lr > 0.0 && max_lr >= base_lr) {
            return Err(Error::Configuration(format!(
                "schedule bounds must satisfy 0 < base_lr <= max_lr, got {base_lr} and {max_lr}"
            )));
        }
        if !(gamma.is_finite() && gamma > 0.0) {
            return Err(Error::Configuration(format!("schedule gamma must be positive, got {gamma}")));
        }

        Ok(CyclicalLearningRate {
            base_lr,
            max_lr,
            mode,
            step_size,
            gamma,
            iteration: 0,
        })
    }

    /// A flat schedule: the triangular wave with both bounds equal to `learning_rate`.
    pub fn constant(learning_rate: f64) -> Result<CyclicalLearningRate> {
        CyclicalLearningRate::new(
            learning_rate,
            learning_rate,
            CyclicalMode::Triangular,
            DEFAULT_STEP_SIZE,
            DEFAULT_GAMMA,
        )
    }

    /// Advance the step counter by one and return the rate for the new step.
    pub fn next_rate(&mut self) -> f64 {
        self.iteration += 1;
        let rate = self.rate_at(self.iteration);
        debug!(iteration = self.iteration, rate, "learning rate");
        rate
    }

    /// The rate the schedule produces at step `t`. Depends on nothing but `t` and the fixed
    /// parameters.
    pub fn rate_at(&self, t: u64) -> f64 {
        let t = t as f64;
        let step_size = self.step_size as f64;

        let cycle = (1.0 + t / (2.0 * step_size)).floor();
        let x = (t / step_size - 2.0 * cycle + 1.0).abs();
        let mut rate = self.base_lr + (self.max_lr - self.base_lr) * f64::max(0.0, 1.0 - x);

        match self.mode {
            CyclicalMode::Triangular => {}
            CyclicalMode::Triangular2 => rate /= 2f64.powf(cycle - 1.0),
            CyclicalMode::ExpRange => rate *= self.gamma.powf(t),
        }
        rate
    }

    /// Number of rates handed out so far.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Start the wave over from step 0. Only meant for reusing a schedule across separate runs.
    pub fn reset(&mut self) {
        self.iteration = 0;
    }

    pub fn base_lr(&self) -> f64 {
        self.base_lr
    }

    pub fn max_lr(&self) -> f64 {
        self.max_lr
    }

    pub fn mode(&self) -> CyclicalMode {
        self.mode
    }

    pub fn step_size(&self) -> u64 {
        self.step_size
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }
}

/// Named presets binding a base learning rate to a full schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Constant,
    Triangular,
    Triangular2,
    ExpRange,
}

impl ScheduleKind {
    /// Build the preset schedule for a run of `epochs` epochs covering `total_steps` steps.
    ///
    /// Runs of at most three epochs get a step size of `total_steps / k` (at least 1), with `k`
    /// equal to 30, 35 or 40 depending on the mode, so several cycles fit in the run. Longer runs
    /// get `5 * total_steps`, which never completes even half a cycle.
    pub fn build(self, learning_rate: f64, total_steps: u64, epochs: usize) -> Result<CyclicalLearningRate> {
        let step_size = |divisor: u64| {
            if epochs <= 3 {
                (total_steps / divisor).max(1)
            } else {
                5 * total_steps
            }
        };

        match self {
            ScheduleKind::Constant => CyclicalLearningRate::constant(learning_rate),
            ScheduleKind::Triangular => CyclicalLearningRate::new(
                learning_rate,
                5.0 * learning_rate,
                CyclicalMode::Triangular,
                step_size(30),
                DEFAULT_GAMMA,
            ),
            ScheduleKind::Triangular2 => CyclicalLearningRate::new(
                learning_rate,
                7.0 * learning_rate,
                CyclicalMode::Triangular2,
                step_size(35),
                DEFAULT_GAMMA,
            ),
            ScheduleKind::ExpRange => CyclicalLearningRate::new(
                learning_rate,
                5.0 * learning_rate,
                CyclicalMode::ExpRange,
                step_size(40),
                DEFAULT_GAMMA,
            ),
        }
    }
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleKind::Constant => write!(f, "constant"),
            ScheduleKind::Triangular => write!(f, "triangular"),
            ScheduleKind::Triangular2 => write!(f, "triangular2"),
            ScheduleKind::ExpRange => write!(f, "exp_range"),
        }
    }
}

impl FromStr for ScheduleKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "constant" => Ok(ScheduleKind::Constant),
            "triangular" => Ok(ScheduleKind::Triangular),
            "triangular2" => Ok(ScheduleKind::Triangular2),
            "exp_range" | "exp-range" => Ok(ScheduleKind::ExpRange),
            other => Err(Error::Configuration(format!(
                "unknown schedule '{other}', expected one of: constant, triangular, triangular2, exp_range"
            ))),
        }
    }
}
