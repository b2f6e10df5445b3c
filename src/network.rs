use crate::activation::Activation;
use crate::config::Hyperparameters;
use crate::cost::Cost;
use crate::data::{TestDatum, TrainingDatum, argmax, vectorized_result};
use crate::error::{Error, Result};
use crate::schedule::CyclicalLearningRate;
use ndarray::{Array, Array2, Axis, concatenate};
use ndarray_rand::{
    RandomExt,
    rand::{Rng, seq::SliceRandom},
    rand_distr::StandardNormal,
};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Network {
    num_layers: usize,
    sizes: Vec<usize>,
    biases: Vec<Array2<f64>>,
    weights: Vec<Array2<f64>>,
    cost: Cost,
    activation: Activation,
    schedule: CyclicalLearningRate,
}

/// Which metrics `stochastic_gradient_descent` computes after every epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Monitor {
    pub evaluation_cost: bool,
    pub evaluation_accuracy: bool,
    pub training_cost: bool,
    pub training_accuracy: bool,
}

impl Monitor {
    fn any(&self) -> bool {
        self.evaluation_cost || self.evaluation_accuracy || self.training_cost || self.training_accuracy
    }
}

/// Per-epoch metrics, one entry per epoch for every metric enabled in the `Monitor`. Costs include
/// the L2 penalty; accuracies are counts of correctly classified examples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingHistory {
    pub evaluation_cost: Vec<f64>,
    pub evaluation_accuracy: Vec<usize>,
    pub training_cost: Vec<f64>,
    pub training_accuracy: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub correct: usize,
    pub total: usize,
    pub average_cost: f64,
}

// The persisted form of a network. The schedule is training state and is supplied again on load.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    sizes: Vec<usize>,
    weights: Vec<Array2<f64>>,
    biases: Vec<Array2<f64>>,
    cost: Cost,
    activation: Activation,
}

impl Network {
    /// Creates a network with one weight matrix and one bias column per layer transition.
    ///
    /// Biases are drawn from a standard normal distribution. Weights are drawn from a normal
    /// distribution with standard deviation `1 / sqrt(fan_in)`, which keeps the weighted inputs of
    /// the first forward pass small enough that sigmoid units do not start out saturated.
    pub fn new<R: Rng + ?Sized>(
        sizes: Vec<usize>,
        schedule: CyclicalLearningRate,
        cost: Cost,
        activation: Activation,
        rng: &mut R,
    ) -> Result<Network> {
        validate_sizes(&sizes)?;

        let biases: Vec<Array2<f64>> = sizes
            .iter()
            .skip(1)
            .map(|&size| Array::random_using((size, 1), StandardNormal, &mut *rng))
            .collect();
        let weights: Vec<Array2<f64>> = sizes
            .iter()
            .zip(sizes.iter().skip(1))
            .map(|(&current_size, &next_size)| {
                let weight: Array2<f64> =
                    Array::random_using((next_size, current_size), StandardNormal, &mut *rng);
                weight / (current_size as f64).sqrt()
            })
            .collect();

        Ok(Network::assemble(sizes, weights, biases, schedule, cost, activation))
    }

    /// Rebuilds a network from previously trained parameters, checking that every matrix has the
    /// shape implied by `sizes`.
    pub fn from_parameters(
        sizes: Vec<usize>,
        weights: Vec<Array2<f64>>,
        biases: Vec<Array2<f64>>,
        schedule: CyclicalLearningRate,
        cost: Cost,
        activation: Activation,
    ) -> Result<Network> {
        validate_sizes(&sizes)?;

        let layers = sizes.len() - 1;
        if weights.len() != layers {
            return Err(Error::shape("weight matrices", layers, weights.len()));
        }
        if biases.len() != layers {
            return Err(Error::shape("bias vectors", layers, biases.len()));
        }
        for (l, (weight, bias)) in weights.iter().zip(biases.iter()).enumerate() {
            let expected = (sizes[l + 1], sizes[l]);
            if weight.dim() != expected {
                return Err(Error::shape(
                    "weight matrix",
                    format!("{expected:?}"),
                    format!("{:?}", weight.dim()),
                ));
            }
            if bias.dim() != (sizes[l + 1], 1) {
                return Err(Error::shape(
                    "bias vector",
                    format!("{:?}", (sizes[l + 1], 1)),
                    format!("{:?}", bias.dim()),
                ));
            }
        }

        Ok(Network::assemble(sizes, weights, biases, schedule, cost, activation))
    }

    fn assemble(
        sizes: Vec<usize>,
        weights: Vec<Array2<f64>>,
        biases: Vec<Array2<f64>>,
        schedule: CyclicalLearningRate,
        cost: Cost,
        activation: Activation,
    ) -> Network {
        if cost == Cost::CrossEntropy && activation == Activation::Relu {
            warn!(
                "cross-entropy with relu outputs: activations above 1 are clamped before the \
                 logarithm and the output delta omits the relu derivative"
            );
        }

        Network {
            num_layers: sizes.len(),
            sizes,
            biases,
            weights,
            cost,
            activation,
            schedule,
        }
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn weights(&self) -> &[Array2<f64>] {
        &self.weights
    }

    pub fn biases(&self) -> &[Array2<f64>] {
        &self.biases
    }

    pub fn cost(&self) -> Cost {
        self.cost
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn schedule(&self) -> &CyclicalLearningRate {
        &self.schedule
    }

    fn output_size(&self) -> usize {
        self.sizes[self.num_layers - 1]
    }

    // Calculates the activations of the output layer, given the activations of the input layer.
    // The input may hold several examples side by side, one per column, as long as it has one row
    // per input neuron.
    pub fn feedforward(&self, input_activation: &Array2<f64>) -> Result<Array2<f64>> {
        if input_activation.nrows() != self.sizes[0] {
            return Err(Error::shape("network input", self.sizes[0], input_activation.nrows()));
        }
        Ok(self.feedforward_unchecked(input_activation))
    }

    fn feedforward_unchecked(&self, input_activation: &Array2<f64>) -> Array2<f64> {
        // Only the prior activation is needed to compute the next one (a' = f(w.a + b)), so the
        // activation matrix is overwritten layer by layer.
        let mut activation = input_activation.to_owned();
        for (bias, weight) in self.biases.iter().zip(self.weights.iter()) {
            let z = weight.dot(&activation) + bias;
            activation = self.activation.apply(&z);
        }
        activation
    }

    /// Trains the network with mini-batch stochastic gradient descent.
    ///
    /// Every epoch shuffles `training_data` in place, splits it into consecutive mini-batches of
    /// `mini_batch_size` examples (the last one may be shorter) and applies one update per batch,
    /// pulling a fresh learning rate from the schedule each time. When `monitor` asks for it, the
    /// cost and accuracy on the training and evaluation data are recorded after each epoch.
    pub fn stochastic_gradient_descent<R: Rng + ?Sized>(
        &mut self,
        training_data: &mut [TrainingDatum],
        hyperparameters: &Hyperparameters,
        evaluation_data: Option<&[TestDatum]>,
        rng: &mut R,
    ) -> Result<TrainingHistory> {
        hyperparameters.validate()?;
        if training_data.is_empty() {
            return Err(Error::Configuration("training data must not be empty".into()));
        }

        let Hyperparameters {
            epochs,
            mini_batch_size,
            lambda,
            monitor,
        } = *hyperparameters;
        let n = training_data.len();
        let mut history = TrainingHistory::default();

        for epoch in 0..epochs {
            training_data.shuffle(rng);

            for mini_batch in training_data.chunks(mini_batch_size) {
                self.update_mini_batch(mini_batch, lambda, n)?;
            }

            if !monitor.any() {
                info!(epoch, "epoch training complete");
                continue;
            }

            if monitor.training_cost {
                let cost = self.total_cost(training_data, lambda)?;
                info!(epoch, cost, "cost on training data");
                history.training_cost.push(cost);
            }
            if monitor.training_accuracy {
                let correct = self.training_accuracy(training_data)?;
                info!(epoch, "accuracy on training data: {correct} / {n}");
                history.training_accuracy.push(correct);
            }
            if let Some(evaluation_data) = evaluation_data {
                if monitor.evaluation_cost {
                    let cost = self.evaluation_cost(evaluation_data, lambda)?;
                    info!(epoch, cost, "cost on evaluation data");
                    history.evaluation_cost.push(cost);
                }
                if monitor.evaluation_accuracy {
                    let correct = self.accuracy(evaluation_data)?;
                    info!(
                        epoch,
                        "accuracy on evaluation data: {correct} / {}",
                        evaluation_data.len()
                    );
                    history.evaluation_accuracy.push(correct);
                }
            }
        }

        Ok(history)
    }

    // Adjust the network's biases and weights according to the given batch of training data.
    // `training_set_size` is the size of the whole training set, which scales the L2 shrinkage.
    // Every example is checked before any gradient is computed, so a malformed example leaves the
    // parameters and the schedule untouched.
    pub fn update_mini_batch(
        &mut self,
        mini_batch: &[TrainingDatum],
        lambda: f64,
        training_set_size: usize,
    ) -> Result<()> {
        if mini_batch.is_empty() {
            return Err(Error::Configuration("mini-batch must not be empty".into()));
        }
        for datum in mini_batch {
            self.check_training_datum(datum)?;
        }

        // Combine each training datum input and expected output into a single matrix where each
        // column corresponds to a separate datum.
        let training_input_matrix = concatenate(
            Axis(1),
            &mini_batch.iter().map(|datum| datum.input.view()).collect::<Vec<_>>(),
        )?;
        let training_expected_output_matrix = concatenate(
            Axis(1),
            &mini_batch
                .iter()
                .map(|datum| datum.expected_output.view())
                .collect::<Vec<_>>(),
        )?;

        let (nabla_biases, nabla_weights) =
            self.backpropagate(&training_input_matrix, &training_expected_output_matrix)?;

        let learning_rate = self.schedule.next_rate();
        self.apply_gradients(
            &nabla_biases,
            &nabla_weights,
            learning_rate,
            lambda,
            mini_batch.len(),
            training_set_size,
        );
        Ok(())
    }

    // w <- (1 - eta * lambda / n) * w - (eta / m) * nabla_w
    // b <- b - (eta / m) * nabla_b
    // Biases are never shrunk.
    fn apply_gradients(
        &mut self,
        nabla_biases: &[Array2<f64>],
        nabla_weights: &[Array2<f64>],
        learning_rate: f64,
        lambda: f64,
        mini_batch_size: usize,
        training_set_size: usize,
    ) {
        let step = learning_rate / mini_batch_size as f64;
        let shrinkage = 1.0 - learning_rate * lambda / training_set_size as f64;
        debug!(learning_rate, shrinkage, mini_batch_size, "applying mini-batch update");

        for (bias, nabla_bias) in self.biases.iter_mut().zip(nabla_biases.iter()) {
            bias.scaled_add(-step, nabla_bias);
        }
        for (weight, nabla_weight) in self.weights.iter_mut().zip(nabla_weights.iter()) {
            weight.zip_mut_with(nabla_weight, |w, &nw| *w = shrinkage * *w - step * nw);
        }
    }

    /// Gradients of the cost with respect to every bias and weight, summed over the columns of the
    /// input matrix. Returned as `(nabla_biases, nabla_weights)`, shaped like the parameters.
    pub fn backpropagate(
        &self,
        training_input_matrix: &Array2<f64>,
        training_expected_output_matrix: &Array2<f64>,
    ) -> Result<(Vec<Array2<f64>>, Vec<Array2<f64>>)> {
        if training_input_matrix.nrows() != self.sizes[0] {
            return Err(Error::shape("network input", self.sizes[0], training_input_matrix.nrows()));
        }
        if training_expected_output_matrix.dim()
            != (self.output_size(), training_input_matrix.ncols())
        {
            return Err(Error::shape(
                "expected output",
                format!("{:?}", (self.output_size(), training_input_matrix.ncols())),
                format!("{:?}", training_expected_output_matrix.dim()),
            ));
        }

        let mut nabla_biases: Vec<Array2<f64>> = self
            .biases
            .iter()
            .map(|bias| Array::zeros(bias.raw_dim()))
            .collect();
        let mut nabla_weights: Vec<Array2<f64>> = self
            .weights
            .iter()
            .map(|weight| Array::zeros(weight.raw_dim()))
            .collect();

        let mut activation = training_input_matrix.clone();
        let mut activations = Vec::with_capacity(self.num_layers);
        let mut zs = Vec::with_capacity(self.num_layers - 1);

        // The first activation is pushed during the loop and the last one after it, so that each
        // activation can be borrowed for the dot product before being moved into the vector.
        for (bias, weight) in self.biases.iter().zip(self.weights.iter()) {
            let z = weight.dot(&activation) + bias;
            activations.push(activation);
            activation = self.activation.apply(&z);
            zs.push(z);
        }

        // zs and both nabla vectors hold (num_layers - 1) entries, activations holds num_layers.
        // Each column of delta is the output error of one example. Summing the columns gives the
        // bias gradient, and the product with the stacked activation columns sums the per-example
        // outer products for the weight gradient.
        let last = self.num_layers - 2;
        let derivative = self.activation.derivative(&zs[last]);
        let mut delta = self
            .cost
            .delta(&activation, training_expected_output_matrix, &derivative)?;

        nabla_biases[last] = delta.sum_axis(Axis(1)).insert_axis(Axis(1));
        nabla_weights[last] = delta.dot(&activations[last].t());

        for l in 2..self.num_layers {
            let layer = self.num_layers - 1 - l;
            let derivative = self.activation.derivative(&zs[layer]);
            delta = self.weights[layer + 1].t().dot(&delta) * &derivative;

            nabla_biases[layer] = delta.sum_axis(Axis(1)).insert_axis(Axis(1));
            nabla_weights[layer] = delta.dot(&activations[layer].t());
        }

        Ok((nabla_biases, nabla_weights))
    }

    // Index of the output neuron with the highest activation for a single example.
    fn predict(&self, input: &Array2<f64>) -> Result<usize> {
        let output = self.feedforward(input)?;
        argmax(&output).ok_or_else(|| Error::shape("network output", "at least one neuron", 0))
    }

    /// Number of test examples whose label matches the most active output neuron.
    pub fn accuracy(&self, test_data: &[TestDatum]) -> Result<usize> {
        let mut correct = 0;
        for datum in test_data {
            self.check_label(datum.label)?;
            if self.predict(&datum.input)? == datum.label {
                correct += 1;
            }
        }
        Ok(correct)
    }

    /// Like `accuracy`, but for examples labelled by a one-hot expected output.
    pub fn training_accuracy(&self, training_data: &[TrainingDatum]) -> Result<usize> {
        let mut correct = 0;
        for datum in training_data {
            self.check_training_datum(datum)?;
            if Some(self.predict(&datum.input)?) == datum.label() {
                correct += 1;
            }
        }
        Ok(correct)
    }

    /// Average cost over `training_data` plus the L2 penalty `0.5 * (lambda / n) * sum(|w|^2)`.
    pub fn total_cost(&self, training_data: &[TrainingDatum], lambda: f64) -> Result<f64> {
        let mut cost = 0.0;
        for datum in training_data {
            self.check_training_datum(datum)?;
            let output = self.feedforward_unchecked(&datum.input);
            cost += self.cost.loss(&output, &datum.expected_output)?;
        }
        Ok(self.with_penalty(cost, training_data.len(), lambda))
    }

    /// `total_cost` for labelled examples, comparing against one-hot vectors of the labels.
    pub fn evaluation_cost(&self, test_data: &[TestDatum], lambda: f64) -> Result<f64> {
        let cost = self.summed_label_cost(test_data)?;
        Ok(self.with_penalty(cost, test_data.len(), lambda))
    }

    /// Correct predictions and average unregularised cost on labelled data. Never touches the
    /// parameters.
    pub fn evaluate(&self, test_data: &[TestDatum]) -> Result<Evaluation> {
        let correct = self.accuracy(test_data)?;
        let total = test_data.len();
        let average_cost = if total == 0 {
            0.0
        } else {
            self.summed_label_cost(test_data)? / total as f64
        };
        Ok(Evaluation {
            correct,
            total,
            average_cost,
        })
    }

    fn summed_label_cost(&self, test_data: &[TestDatum]) -> Result<f64> {
        let mut cost = 0.0;
        for datum in test_data {
            self.check_label(datum.label)?;
            let output = self.feedforward(&datum.input)?;
            let expected = vectorized_result(datum.label, self.output_size());
            cost += self.cost.loss(&output, &expected)?;
        }
        Ok(cost)
    }

    fn with_penalty(&self, summed_cost: f64, n: usize, lambda: f64) -> f64 {
        if n == 0 {
            return 0.0;
        }
        let squared_weights: f64 = self
            .weights
            .iter()
            .map(|weight| weight.iter().map(|w| w * w).sum::<f64>())
            .sum();
        summed_cost / n as f64 + 0.5 * (lambda / n as f64) * squared_weights
    }

    fn check_training_datum(&self, datum: &TrainingDatum) -> Result<()> {
        if datum.input.dim() != (self.sizes[0], 1) {
            return Err(Error::shape(
                "training input",
                format!("{:?}", (self.sizes[0], 1)),
                format!("{:?}", datum.input.dim()),
            ));
        }
        if datum.expected_output.dim() != (self.output_size(), 1) {
            return Err(Error::shape(
                "training target",
                format!("{:?}", (self.output_size(), 1)),
                format!("{:?}", datum.expected_output.dim()),
            ));
        }
        Ok(())
    }

    fn check_label(&self, label: usize) -> Result<()> {
        if label >= self.output_size() {
            return Err(Error::shape(
                "test label",
                format!("a class below {}", self.output_size()),
                label,
            ));
        }
        Ok(())
    }

    /// Writes sizes, weights, biases, cost and activation as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let snapshot = Snapshot {
            sizes: self.sizes.clone(),
            weights: self.weights.clone(),
            biases: self.biases.clone(),
            cost: self.cost,
            activation: self.activation,
        };
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, &snapshot)?;
        Ok(())
    }

    /// Reads a network written by `save`. The schedule only matters if training continues.
    pub fn load(path: impl AsRef<Path>, schedule: CyclicalLearningRate) -> Result<Network> {
        let reader = BufReader::new(File::open(path)?);
        let snapshot: Snapshot = serde_json::from_reader(reader)?;
        Network::from_parameters(
            snapshot.sizes,
            snapshot.weights,
            snapshot.biases,
            schedule,
            snapshot.cost,
            snapshot.activation,
        )
    }
}

fn validate_sizes(sizes: &[usize]) -> Result<()> {
    if sizes.len() < 2 {
        return Err(Error::Configuration(format!(
            "a network needs at least an input and an output layer, got {} layer(s)",
            sizes.len()
        )));
    }
    if let Some(position) = sizes.iter().position(|&size| size == 0) {
        return Err(Error::Configuration(format!("layer {position} has no neurons")));
    }
    Ok(())
}
