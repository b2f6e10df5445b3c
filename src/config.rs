//! Run configuration.
//!
//! A `TrainingConfig` is built once before training, either from defaults matching the reference
//! MNIST run or from a JSON file, and validated before any network is constructed:
//!
//! ```json
//! {
//!   "sizes": [784, 30, 10],
//!   "cost": "crossentropy",
//!   "activation": "relu",
//!   "schedule": { "kind": "exp_range", "learning_rate": 0.03 },
//!   "epochs": 30,
//!   "mini_batch_size": 20,
//!   "lambda": 2.0,
//!   "monitor": { "evaluation_accuracy": true }
//! }
//! ```
//!
//! Missing fields fall back to the defaults.

use crate::activation::Activation;
use crate::cost::Cost;
use crate::error::{Error, Result};
use crate::network::{Monitor, Network};
use crate::schedule::{CyclicalLearningRate, ScheduleKind};
use ndarray_rand::rand::Rng;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// The loop parameters of `Network::stochastic_gradient_descent`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub epochs: usize,
    pub mini_batch_size: usize,
    /// L2 regularisation coefficient. Zero disables weight shrinkage.
    pub lambda: f64,
    pub monitor: Monitor,
}

impl Hyperparameters {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::Configuration("epochs must be at least 1".into()));
        }
        if self.mini_batch_size == 0 {
            return Err(Error::Configuration("mini-batch size must be at least 1".into()));
        }
        if !(self.lambda.is_finite() && self.lambda >= 0.0) {
            return Err(Error::Configuration(format!(
                "lambda must be finite and non-negative, got {}",
                self.lambda
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub kind: ScheduleKind,
    pub learning_rate: f64,
}

impl ScheduleConfig {
    pub fn build(&self, total_steps: u64, epochs: usize) -> Result<CyclicalLearningRate> {
        self.kind.build(self.learning_rate, total_steps, epochs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub sizes: Vec<usize>,
    pub cost: Cost,
    pub activation: Activation,
    pub schedule: ScheduleConfig,
    pub epochs: usize,
    pub mini_batch_size: usize,
    pub lambda: f64,
    pub monitor: Monitor,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            sizes: vec![784, 30, 10],
            cost: Cost::CrossEntropy,
            activation: Activation::Relu,
            schedule: ScheduleConfig {
                kind: ScheduleKind::ExpRange,
                learning_rate: 0.03,
            },
            epochs: 30,
            mini_batch_size: 20,
            lambda: 2.0,
            monitor: Monitor {
                evaluation_accuracy: true,
                ..Monitor::default()
            },
        }
    }
}

impl TrainingConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<TrainingConfig> {
        let contents = fs::read_to_string(path)?;
        let config: TrainingConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    pub fn hyperparameters(&self) -> Hyperparameters {
        Hyperparameters {
            epochs: self.epochs,
            mini_batch_size: self.mini_batch_size,
            lambda: self.lambda,
            monitor: self.monitor,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sizes.len() < 2 || self.sizes.contains(&0) {
            return Err(Error::Configuration(format!(
                "layer sizes must list at least two positive sizes, got {:?}",
                self.sizes
            )));
        }
        if !(self.schedule.learning_rate.is_finite() && self.schedule.learning_rate > 0.0) {
            return Err(Error::Configuration(format!(
                "learning rate must be positive, got {}",
                self.schedule.learning_rate
            )));
        }
        self.hyperparameters().validate()
    }

    /// Builds the schedule for a training set of `training_set_size` examples. The total step
    /// count handed to the preset is `epochs * training_set_size`.
    pub fn build_schedule(&self, training_set_size: usize) -> Result<CyclicalLearningRate> {
        let total_steps = (self.epochs as u64).saturating_mul(training_set_size as u64);
        self.schedule.build(total_steps, self.epochs)
    }

    pub fn build_network<R: Rng + ?Sized>(
        &self,
        training_set_size: usize,
        rng: &mut R,
    ) -> Result<Network> {
        self.validate()?;
        let schedule = self.build_schedule(training_set_size)?;
        Network::new(self.sizes.clone(), schedule, self.cost, self.activation, rng)
    }
}
