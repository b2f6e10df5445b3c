//! A fully-connected feedforward classifier trained with mini-batch stochastic gradient descent,
//! L2 regularisation and a cyclical learning rate.
//!
//! ```no_run
//! use cyclic_nn::{Activation, Cost, Hyperparameters, Monitor, Network, ScheduleKind};
//! use cyclic_nn::mnist::MnistData;
//! use ndarray_rand::rand::{SeedableRng, rngs::StdRng};
//!
//! # fn main() -> cyclic_nn::Result<()> {
//! let mut rng = StdRng::seed_from_u64(0);
//! let mut mnist = MnistData::load("data")?;
//! let epochs = 30;
//! let schedule = ScheduleKind::ExpRange.build(0.03, (epochs * mnist.training_data.len()) as u64, epochs)?;
//! let mut network = Network::new(vec![784, 30, 10], schedule, Cost::CrossEntropy, Activation::Sigmoid, &mut rng)?;
//! let hyperparameters = Hyperparameters {
//!     epochs,
//!     mini_batch_size: 20,
//!     lambda: 2.0,
//!     monitor: Monitor { evaluation_accuracy: true, ..Monitor::default() },
//! };
//! network.stochastic_gradient_descent(
//!     &mut mnist.training_data,
//!     &hyperparameters,
//!     Some(&mnist.validation_data),
//!     &mut rng,
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod config;
pub mod cost;
pub mod data;
pub mod error;
pub mod mnist;
pub mod network;
pub mod schedule;

pub use activation::Activation;
pub use config::{Hyperparameters, ScheduleConfig, TrainingConfig};
pub use cost::Cost;
pub use data::{TestDatum, TrainingDatum};
pub use error::{Error, Result};
pub use network::{Evaluation, Monitor, Network, TrainingHistory};
pub use schedule::{CyclicalLearningRate, CyclicalMode, ScheduleKind};
