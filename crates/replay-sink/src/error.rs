use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink has no configured output target")]
    Unconfigured,

    #[error("output endpoint returned status {0}")]
    NonSuccessStatus(u16),

    #[error("worker queue is full")]
    QueueFull,

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("sink cancelled")]
    Cancelled,
}
