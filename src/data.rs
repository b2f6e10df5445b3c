use ndarray::{Array, Array2};

// A single input paired with the output a perfectly trained network would produce for it, as a
// [k x 1] column. For classification this is a one-hot vector.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingDatum {
    pub input: Array2<f64>,
    pub expected_output: Array2<f64>,
}

impl TrainingDatum {
    pub fn new(input: Array2<f64>, expected_output: Array2<f64>) -> TrainingDatum {
        TrainingDatum {
            input,
            expected_output,
        }
    }

    // The class encoded by the expected output, i.e. the index of its largest entry.
    pub fn label(&self) -> Option<usize> {
        argmax(&self.expected_output)
    }
}

// A single input paired with its correct class index.
#[derive(Debug, Clone, PartialEq)]
pub struct TestDatum {
    pub input: Array2<f64>,
    pub label: usize,
}

impl TestDatum {
    pub fn new(input: Array2<f64>, label: usize) -> TestDatum {
        TestDatum { input, label }
    }

    pub fn to_training_datum(&self, classes: usize) -> TrainingDatum {
        TrainingDatum {
            input: self.input.clone(),
            expected_output: vectorized_result(self.label, classes),
        }
    }
}

/// Turn a class index into a `[classes x 1]` column that is 1.0 at `label` and 0.0 elsewhere.
/// A label outside `0..classes` yields an all-zero column.
pub fn vectorized_result(label: usize, classes: usize) -> Array2<f64> {
    Array::from_shape_fn([classes, 1], |(i, _j)| if i == label { 1.0 } else { 0.0 })
}

/// Index of the largest activation, the first one winning ties. `None` for an empty array.
pub fn argmax(activations: &Array2<f64>) -> Option<usize> {
    activations
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.total_cmp(b).then(ib.cmp(ia)))
        .map(|(index, _)| index)
}

// Flatten plain rows into [n x 1] columns.
pub fn column(values: &[f64]) -> Array2<f64> {
    Array::from_shape_fn([values.len(), 1], |(i, _j)| values[i])
}
