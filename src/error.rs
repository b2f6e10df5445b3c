use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid layer sizes, hyperparameters or schedule settings. Raised before training starts.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// An input or target vector does not match the configured layer sizes.
    #[error("shape mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: &'static str,
        expected: String,
        found: String,
    },

    /// Cross-entropy was handed an activation that cannot be clamped into (0, 1), e.g. NaN.
    #[error("numeric domain error: {0}")]
    NumericDomain(String),

    #[error("malformed IDX file {path}: {reason}")]
    MalformedIdx { path: String, reason: String },

    #[error("array error: {0}")]
    Ndarray(#[from] ndarray::ShapeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn shape(context: &'static str, expected: impl ToString, found: impl ToString) -> Self {
        Error::ShapeMismatch {
            context,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}
