//! Error types for the annealing engine.

use thiserror::Error;

/// Errors raised while configuring or running an inversion.
#[derive(Error, Debug)]
pub enum AnnealError {
    /// Invalid inputs or parameters, detected before annealing starts.
    #[error("configuration error: {0}")]
    Config(String),

    /// An energy component became NaN or negative.
    #[error("invalid {component} energy: {value}")]
    InvalidEnergy {
        /// Which energy component failed (`total`, `equality`, ...).
        component: &'static str,
        /// The offending value.
        value: f64,
    },

    /// The entropy sum went negative, which the regularizer cannot represent.
    #[error("negative entropy: {0}")]
    NegativeEntropy(f64),

    /// A worker thread's sub-batch failed.
    #[error("worker {worker} failed: {source}")]
    Worker {
        /// Index of the failed worker.
        worker: usize,
        /// The worker's error.
        #[source]
        source: Box<AnnealError>,
    },

    /// A collective operation failed or a peer rank went away.
    #[error("communication error: {0}")]
    Comm(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Zip archive error.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl AnnealError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        AnnealError::Config(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, AnnealError>;
