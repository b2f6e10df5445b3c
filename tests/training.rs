use approx::assert_abs_diff_eq;
use cyclic_nn::data::column;
use cyclic_nn::{
    Activation, Cost, CyclicalLearningRate, CyclicalMode, Hyperparameters, Monitor, Network,
    TestDatum, TrainingDatum,
};
use ndarray::{Array2, arr2};
use ndarray_rand::rand::{Rng, SeedableRng, rngs::StdRng};

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn assert_close(actual: &Array2<f64>, expected: &Array2<f64>, epsilon: f64) {
    assert_eq!(actual.dim(), expected.dim());
    for (a, b) in actual.iter().zip(expected.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = epsilon);
    }
}

fn constant(rate: f64) -> CyclicalLearningRate {
    CyclicalLearningRate::constant(rate).unwrap()
}

fn small_network(cost: Cost) -> Network {
    Network::from_parameters(
        vec![2, 2, 1],
        vec![arr2(&[[0.1, 0.2], [0.3, 0.4]]), arr2(&[[0.5, 0.6]])],
        vec![arr2(&[[0.1], [0.2]]), arr2(&[[0.3]])],
        constant(0.5),
        cost,
        Activation::Sigmoid,
    )
    .unwrap()
}

fn random_data(rng: &mut StdRng, count: usize, inputs: usize, classes: usize) -> Vec<TrainingDatum> {
    (0..count)
        .map(|_| {
            let input: Vec<f64> = (0..inputs).map(|_| rng.gen_range(0.0..1.0)).collect();
            let label = rng.gen_range(0..classes);
            TestDatum::new(column(&input), label).to_training_datum(classes)
        })
        .collect()
}

#[test]
fn single_update_matches_hand_computed_gradient() {
    let mut network = small_network(Cost::Quadratic);
    let (x0, x1, y) = (1.0, 0.5, 1.0);

    // Forward pass, written out neuron by neuron.
    let a10 = sigmoid(0.1 * x0 + 0.2 * x1 + 0.1);
    let a11 = sigmoid(0.3 * x0 + 0.4 * x1 + 0.2);
    let a2 = sigmoid(0.5 * a10 + 0.6 * a11 + 0.3);

    // Backward pass for the quadratic cost.
    let d2 = (a2 - y) * a2 * (1.0 - a2);
    let d10 = 0.5 * d2 * a10 * (1.0 - a10);
    let d11 = 0.6 * d2 * a11 * (1.0 - a11);

    let (eta, lambda, n) = (0.5, 0.2, 4usize);
    let shrink = 1.0 - eta * lambda / n as f64;

    let batch = vec![TrainingDatum::new(column(&[x0, x1]), column(&[y]))];
    network.update_mini_batch(&batch, lambda, n).unwrap();

    let w1 = &network.weights()[0];
    let w2 = &network.weights()[1];
    let b1 = &network.biases()[0];
    let b2 = &network.biases()[1];

    assert_abs_diff_eq!(w1[[0, 0]], shrink * 0.1 - eta * d10 * x0, epsilon = 1e-9);
    assert_abs_diff_eq!(w1[[0, 1]], shrink * 0.2 - eta * d10 * x1, epsilon = 1e-9);
    assert_abs_diff_eq!(w1[[1, 0]], shrink * 0.3 - eta * d11 * x0, epsilon = 1e-9);
    assert_abs_diff_eq!(w1[[1, 1]], shrink * 0.4 - eta * d11 * x1, epsilon = 1e-9);
    assert_abs_diff_eq!(w2[[0, 0]], shrink * 0.5 - eta * d2 * a10, epsilon = 1e-9);
    assert_abs_diff_eq!(w2[[0, 1]], shrink * 0.6 - eta * d2 * a11, epsilon = 1e-9);
    assert_abs_diff_eq!(b1[[0, 0]], 0.1 - eta * d10, epsilon = 1e-9);
    assert_abs_diff_eq!(b1[[1, 0]], 0.2 - eta * d11, epsilon = 1e-9);
    assert_abs_diff_eq!(b2[[0, 0]], 0.3 - eta * d2, epsilon = 1e-9);
    assert_eq!(network.schedule().iteration(), 1);
}

#[test]
fn cross_entropy_output_delta_skips_the_derivative() {
    let network = small_network(Cost::CrossEntropy);
    let (x0, x1, y) = (1.0, 0.5, 1.0);

    let a10 = sigmoid(0.1 * x0 + 0.2 * x1 + 0.1);
    let a11 = sigmoid(0.3 * x0 + 0.4 * x1 + 0.2);
    let a2 = sigmoid(0.5 * a10 + 0.6 * a11 + 0.3);
    let d2 = a2 - y;

    let (nabla_biases, nabla_weights) = network
        .backpropagate(&column(&[x0, x1]), &column(&[y]))
        .unwrap();
    assert_abs_diff_eq!(nabla_biases[1][[0, 0]], d2, epsilon = 1e-12);
    assert_abs_diff_eq!(nabla_weights[1][[0, 0]], d2 * a10, epsilon = 1e-12);
    assert_abs_diff_eq!(nabla_weights[1][[0, 1]], d2 * a11, epsilon = 1e-12);
}

#[test]
fn mini_batch_gradient_is_the_sum_of_example_gradients() {
    let network = small_network(Cost::Quadratic);
    let first = (column(&[1.0, 0.5]), column(&[1.0]));
    let second = (column(&[-0.3, 0.8]), column(&[0.0]));

    let (b_first, w_first) = network.backpropagate(&first.0, &first.1).unwrap();
    let (b_second, w_second) = network.backpropagate(&second.0, &second.1).unwrap();

    let inputs = ndarray::concatenate![ndarray::Axis(1), first.0, second.0];
    let targets = ndarray::concatenate![ndarray::Axis(1), first.1, second.1];
    let (b_batch, w_batch) = network.backpropagate(&inputs, &targets).unwrap();

    for l in 0..2 {
        assert_close(&w_batch[l], &(&w_first[l] + &w_second[l]), 1e-12);
        assert_close(&b_batch[l], &(&b_first[l] + &b_second[l]), 1e-12);
    }
}

fn loss_of(network: &Network, input: &Array2<f64>, target: &Array2<f64>) -> f64 {
    let output = network.feedforward(input).unwrap();
    network.cost().loss(&output, target).unwrap()
}

fn with_weight(network: &Network, layer: usize, index: (usize, usize), delta: f64) -> Network {
    let mut weights = network.weights().to_vec();
    weights[layer][[index.0, index.1]] += delta;
    Network::from_parameters(
        network.sizes().to_vec(),
        weights,
        network.biases().to_vec(),
        constant(0.1),
        network.cost(),
        network.activation(),
    )
    .unwrap()
}

#[test]
fn backpropagation_matches_finite_differences() {
    for cost in [Cost::Quadratic, Cost::CrossEntropy] {
        let mut rng = StdRng::seed_from_u64(5);
        let network =
            Network::new(vec![3, 4, 2], constant(0.1), cost, Activation::Sigmoid, &mut rng).unwrap();
        let input = column(&[0.2, -0.7, 0.9]);
        let target = column(&[0.0, 1.0]);

        let (_, nabla_weights) = network.backpropagate(&input, &target).unwrap();
        let h = 1e-6;
        for (layer, weight) in network.weights().iter().enumerate() {
            for ((row, col), _) in weight.indexed_iter() {
                let plus = loss_of(&with_weight(&network, layer, (row, col), h), &input, &target);
                let minus = loss_of(&with_weight(&network, layer, (row, col), -h), &input, &target);
                let numeric = (plus - minus) / (2.0 * h);
                assert_abs_diff_eq!(nabla_weights[layer][[row, col]], numeric, epsilon = 1e-6);
            }
        }
    }
}

fn train(seed: u64, data: &[TrainingDatum]) -> Network {
    let mut rng = StdRng::seed_from_u64(seed);
    let schedule = CyclicalLearningRate::new(0.1, 0.5, CyclicalMode::ExpRange, 4, 0.999).unwrap();
    let mut network =
        Network::new(vec![4, 5, 3], schedule, Cost::CrossEntropy, Activation::Sigmoid, &mut rng)
            .unwrap();
    let mut data = data.to_vec();
    let hyperparameters = Hyperparameters {
        epochs: 3,
        mini_batch_size: 4,
        lambda: 1.0,
        monitor: Monitor::default(),
    };
    network
        .stochastic_gradient_descent(&mut data, &hyperparameters, None, &mut rng)
        .unwrap();
    network
}

#[test]
fn training_is_reproducible_with_a_fixed_seed() {
    let mut rng = StdRng::seed_from_u64(99);
    let data = random_data(&mut rng, 30, 4, 3);

    let first = train(17, &data);
    let second = train(17, &data);
    assert_eq!(first.weights(), second.weights());
    assert_eq!(first.biases(), second.biases());
    assert_eq!(first.schedule().iteration(), 24);

    let other = train(18, &data);
    assert_ne!(first.weights(), other.weights());
}

#[test]
fn accuracy_matches_brute_force_evaluation() {
    let mut rng = StdRng::seed_from_u64(3);
    let network =
        Network::new(vec![3, 6, 4], constant(0.1), Cost::Quadratic, Activation::Relu, &mut rng)
            .unwrap();
    let data: Vec<TestDatum> = (0..50)
        .map(|_| {
            let input: Vec<f64> = (0..3).map(|_| rng.gen_range(-1.0..1.0)).collect();
            TestDatum::new(column(&input), rng.gen_range(0..4))
        })
        .collect();

    let mut expected = 0;
    for datum in &data {
        let mut activation: Vec<f64> = datum.input.iter().copied().collect();
        for (weight, bias) in network.weights().iter().zip(network.biases()) {
            activation = (0..weight.nrows())
                .map(|i| {
                    let z: f64 = (0..weight.ncols()).map(|j| weight[[i, j]] * activation[j]).sum::<f64>()
                        + bias[[i, 0]];
                    z.max(0.0)
                })
                .collect();
        }
        let mut best = 0;
        for (i, a) in activation.iter().enumerate() {
            if *a > activation[best] {
                best = i;
            }
        }
        if best == datum.label {
            expected += 1;
        }
    }

    assert_eq!(network.accuracy(&data).unwrap(), expected);
    let evaluation = network.evaluate(&data).unwrap();
    assert_eq!(evaluation.correct, expected);
    assert_eq!(evaluation.total, 50);
}

#[test]
fn zero_lambda_is_a_plain_gradient_step() {
    let mut network = small_network(Cost::Quadratic);
    let input = column(&[0.4, -0.1]);
    let target = column(&[0.0]);
    let (nabla_biases, nabla_weights) = network.backpropagate(&input, &target).unwrap();
    let weights = network.weights().to_vec();
    let biases = network.biases().to_vec();

    network
        .update_mini_batch(&[TrainingDatum::new(input, target)], 0.0, 1000)
        .unwrap();

    for l in 0..2 {
        assert_close(&network.weights()[l], &(&weights[l] - &(&nabla_weights[l] * 0.5)), 1e-15);
        assert_close(&network.biases()[l], &(&biases[l] - &(&nabla_biases[l] * 0.5)), 1e-15);
    }
}

#[test]
fn learns_a_separable_problem_and_records_history() {
    let mut rng = StdRng::seed_from_u64(1);
    let mut network =
        Network::new(vec![2, 2], constant(3.0), Cost::CrossEntropy, Activation::Sigmoid, &mut rng)
            .unwrap();
    let mut training = vec![
        TestDatum::new(column(&[1.0, 0.0]), 0).to_training_datum(2),
        TestDatum::new(column(&[0.0, 1.0]), 1).to_training_datum(2),
    ];
    let evaluation = vec![
        TestDatum::new(column(&[1.0, 0.0]), 0),
        TestDatum::new(column(&[0.0, 1.0]), 1),
    ];
    let hyperparameters = Hyperparameters {
        epochs: 200,
        mini_batch_size: 2,
        lambda: 0.0,
        monitor: Monitor {
            evaluation_cost: true,
            evaluation_accuracy: true,
            training_cost: true,
            training_accuracy: true,
        },
    };

    let history = network
        .stochastic_gradient_descent(&mut training, &hyperparameters, Some(&evaluation), &mut rng)
        .unwrap();

    assert_eq!(history.training_cost.len(), 200);
    assert_eq!(history.evaluation_accuracy.len(), 200);
    assert_eq!(history.evaluation_accuracy.last(), Some(&2));
    assert_eq!(history.training_accuracy.last(), Some(&2));
    assert!(history.training_cost.last().unwrap() < history.training_cost.first().unwrap());
    assert!(history.evaluation_cost.iter().all(|cost| cost.is_finite()));
}

#[test]
fn saved_parameters_reload_identically() {
    let mut rng = StdRng::seed_from_u64(8);
    let network =
        Network::new(vec![3, 4, 2], constant(0.1), Cost::CrossEntropy, Activation::Relu, &mut rng)
            .unwrap();
    let path = std::env::temp_dir().join(format!("cyclic-nn-{}.json", std::process::id()));

    network.save(&path).unwrap();
    let loaded = Network::load(&path, constant(0.1)).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(loaded.sizes(), network.sizes());
    assert_eq!(loaded.cost(), Cost::CrossEntropy);
    assert_eq!(loaded.activation(), Activation::Relu);
    let input = column(&[0.3, 0.6, 0.9]);
    for (loaded, original) in loaded.weights().iter().zip(network.weights()) {
        assert_close(loaded, original, 1e-12);
    }
    assert_close(
        &loaded.feedforward(&input).unwrap(),
        &network.feedforward(&input).unwrap(),
        1e-9,
    );
}
