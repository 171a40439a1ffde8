use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Invalid stream configuration: '{field}' must be greater than zero (got {value})")]
    Validation { field: &'static str, value: u32 },

    #[error("A stream session is already active - stop it before starting another")]
    AlreadyActive,

    #[error("No stream session is connected")]
    NotActive,

    #[error("Streaming engine failure: {source}")]
    Engine {
        #[source]
        source: anyhow::Error,
    },
}

impl StreamError {
    /// Stable machine-readable name, used by callers that forward errors to a UI
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "ValidationError",
            Self::AlreadyActive => "AlreadyActiveError",
            Self::NotActive => "NotActiveError",
            Self::Engine { .. } => "EngineError",
        }
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
