/// Error types shared by the link, prediction and configuration layers
use thiserror::Error;

/// Failures of the serial link.
///
/// Transport faults carry the OS message as text so the error can be cloned
/// into reporting events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Opening the port failed; the link is back in `Disconnected`
    #[error("failed to connect: {reason}")]
    ConnectFailed { reason: String },

    /// Hard I/O fault on an open link; the link is now `Faulted`
    #[error("transport fault: {reason}")]
    Transport { reason: String },

    /// `read_line` was called while the link was not connected
    #[error("link is not connected")]
    NotConnected,

    /// The byte stream was closed by the other side
    #[error("end of stream")]
    EndOfStream,
}

impl LinkError {
    pub fn transport(err: &std::io::Error) -> Self {
        LinkError::Transport {
            reason: err.to_string(),
        }
    }

    /// True for faults that leave the link in `Faulted`
    pub fn is_transport(&self) -> bool {
        matches!(self, LinkError::Transport { .. })
    }
}

/// Failures of the prediction adapter. None of them is fatal to ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PredictionError {
    #[error("reading is missing temperature, humidity or smoke")]
    IncompleteInput,

    #[error("classifier model is not loaded")]
    ModelNotReady,

    #[error("inference failed: {reason}")]
    InferenceFailure { reason: String },
}

/// Failures while loading a classifier from disk
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("cannot read model file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed model file: {0}")]
    Format(#[from] serde_json::Error),

    #[error("model expects {expected} coefficients, file has {found}")]
    Shape { expected: usize, found: usize },

    #[error("model was trained on features {found:?}, expected {expected:?}")]
    FeatureContract {
        expected: Vec<String>,
        found: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}
