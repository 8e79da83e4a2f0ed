use crate::dtype::DType;
use crate::shape::{Shape, TensorType};

/// All errors that can occur within Vole.
///
/// One enum across the workspace keeps propagation simple: graph inference,
/// the loss library, and the executable lifecycle all speak the same
/// taxonomy. Compilation and execution failures wrap the underlying error,
/// tagged with the computation name and backend identifier.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad configuration: unknown loss name, non-positive hyperparameter,
    /// empty output list, nodes from different build contexts, and similar.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Two tensors were expected to agree in shape and do not.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// Two tensors were expected to agree in dtype and do not.
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },

    /// A list had the wrong number of entries (execute inputs, donate flags).
    #[error("wrong number of {what}: {got} given, {expected} expected")]
    Arity {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// A trailing label tensor could be classified as neither a per-example
    /// weight nor a boolean mask.
    #[error(
        "labels[{index}] has type {got}, which is neither a weight (expected {weights}) \
         nor a mask (bool tensor with the same dimensions)"
    )]
    UnrecognizedAuxiliary {
        index: usize,
        got: TensorType,
        weights: TensorType,
    },

    /// Lowering or compilation failed in the underlying runtime.
    #[error("backend {backend:?}: failed to compile computation {name:?}")]
    Compilation {
        backend: String,
        name: String,
        #[source]
        source: Box<Error>,
    },

    /// Execution failed in the underlying runtime.
    #[error("backend {backend:?}: failed to execute computation {name:?}")]
    Execution {
        backend: String,
        name: String,
        #[source]
        source: Box<Error>,
    },

    /// Use of a finalized executable, or of a backend that was shut down.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }
}

/// Convenience Result type used throughout Vole.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted [`Error::Msg`].
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
