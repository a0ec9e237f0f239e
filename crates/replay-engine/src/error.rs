use replay_protocol::ErrorKind;
use thiserror::Error;

/// Engine-wide error, classified once at the point it is raised and never
/// re-logged downstream — the classification is the log.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Input(String),

    #[error("{0}")]
    Resolve(String),

    #[error(transparent)]
    Storage(#[from] replay_storage::StorageError),

    #[error(transparent)]
    Sink(#[from] replay_sink::SinkError),

    #[error("invalid transition: {action} while {phase:?}")]
    State {
        action: &'static str,
        phase: replay_protocol::Phase,
    },

    #[error("cancelled")]
    Cancel,

    #[error("fatal: {0}")]
    Fatal(String),
}

impl EngineError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Input(_) => ErrorKind::InputError,
            Self::Resolve(_) => ErrorKind::ResolveError,
            Self::Storage(_) => ErrorKind::StorageError,
            Self::Sink(_) => ErrorKind::SinkError,
            Self::State { .. } => ErrorKind::StateError,
            Self::Cancel => ErrorKind::CancelError,
            Self::Fatal(_) => ErrorKind::FatalError,
        }
    }
}
