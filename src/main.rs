use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cyclic_nn::mnist::{IMAGE_SIDE, MnistData, expand_training_data};
use cyclic_nn::{Activation, Cost, Network, ScheduleKind, TrainingConfig};
use ndarray_rand::rand::{SeedableRng, rngs::StdRng, thread_rng};
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "cyclic-nn")]
#[command(about = "Train and evaluate an MNIST classifier with cyclical learning rates", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: Level,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a network on MNIST
    Train {
        /// Directory holding the gzip-compressed MNIST IDX files
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,

        /// JSON training configuration; the flags below override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Hidden layer sizes, e.g. --hidden 30 or --hidden 100,30
        #[arg(long, value_delimiter = ',')]
        hidden: Option<Vec<usize>>,

        /// quadratic or crossentropy
        #[arg(long)]
        cost: Option<Cost>,

        /// sigmoid or relu
        #[arg(long)]
        activation: Option<Activation>,

        /// constant, triangular, triangular2 or exp_range
        #[arg(long)]
        schedule: Option<ScheduleKind>,

        #[arg(long)]
        learning_rate: Option<f64>,

        #[arg(long)]
        epochs: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        /// L2 regularisation coefficient
        #[arg(long)]
        lambda: Option<f64>,

        /// Train on only the first N training examples
        #[arg(long, default_value = "1000")]
        train_limit: usize,

        /// Monitor on only the first N validation examples
        #[arg(long, default_value = "100")]
        eval_limit: usize,

        /// Add four one-pixel shifted copies of every training image
        #[arg(long)]
        expand: bool,

        /// Seed for initialisation and shuffling; random when omitted
        #[arg(long)]
        seed: Option<u64>,

        /// Write the trained network to this JSON file
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Report test-set accuracy of a saved network
    Evaluate {
        /// JSON file written by `train --save`
        #[arg(short, long)]
        model: PathBuf,

        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to install logger")?;

    match cli.command {
        Commands::Train {
            data_dir,
            config,
            hidden,
            cost,
            activation,
            schedule,
            learning_rate,
            epochs,
            batch_size,
            lambda,
            train_limit,
            eval_limit,
            expand,
            seed,
            save,
        } => {
            let mut config = match config {
                Some(path) => TrainingConfig::from_json_file(&path)
                    .with_context(|| format!("failed to read config {}", path.display()))?,
                None => TrainingConfig::default(),
            };
            if let Some(hidden) = hidden {
                let input = config.sizes[0];
                let output = config.sizes[config.sizes.len() - 1];
                config.sizes = std::iter::once(input)
                    .chain(hidden)
                    .chain(std::iter::once(output))
                    .collect();
            }
            if let Some(cost) = cost {
                config.cost = cost;
            }
            if let Some(activation) = activation {
                config.activation = activation;
            }
            if let Some(schedule) = schedule {
                config.schedule.kind = schedule;
            }
            if let Some(learning_rate) = learning_rate {
                config.schedule.learning_rate = learning_rate;
            }
            if let Some(epochs) = epochs {
                config.epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                config.mini_batch_size = batch_size;
            }
            if let Some(lambda) = lambda {
                config.lambda = lambda;
            }
            config.validate()?;

            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_rng(thread_rng()).context("failed to seed RNG")?,
            };

            let mnist = MnistData::load(&data_dir)
                .with_context(|| format!("failed to load MNIST from {}", data_dir.display()))?;
            let mut training_data: Vec<_> =
                mnist.training_data.into_iter().take(train_limit).collect();
            if expand {
                training_data = expand_training_data(&training_data, IMAGE_SIDE, &mut rng)?;
            }
            let evaluation_data: Vec<_> =
                mnist.validation_data.into_iter().take(eval_limit).collect();

            info!(
                sizes = ?config.sizes,
                cost = %config.cost,
                activation = %config.activation,
                schedule = %config.schedule.kind,
                training = training_data.len(),
                "starting training"
            );

            let mut network = config.build_network(training_data.len(), &mut rng)?;
            let history = network.stochastic_gradient_descent(
                &mut training_data,
                &config.hyperparameters(),
                Some(&evaluation_data),
                &mut rng,
            )?;
            if let Some(best) = history.evaluation_accuracy.iter().max() {
                info!("best evaluation accuracy: {best} / {}", evaluation_data.len());
            }

            if let Some(path) = save {
                network
                    .save(&path)
                    .with_context(|| format!("failed to save network to {}", path.display()))?;
                info!(path = %path.display(), "saved network");
            }
        }
        Commands::Evaluate { model, data_dir } => {
            let schedule = cyclic_nn::CyclicalLearningRate::constant(1.0)?;
            let network = Network::load(&model, schedule)
                .with_context(|| format!("failed to load network from {}", model.display()))?;
            let mnist = MnistData::load(&data_dir)
                .with_context(|| format!("failed to load MNIST from {}", data_dir.display()))?;

            let evaluation = network.evaluate(&mnist.test_data)?;
            info!(
                average_cost = evaluation.average_cost,
                "test accuracy: {} / {}",
                evaluation.correct,
                evaluation.total
            );
        }
    }

    Ok(())
}
