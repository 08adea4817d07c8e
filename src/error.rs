use std::io;

#[derive(Debug, thiserror::Error)]
pub enum LifelineError {
    #[error("audio acquisition error: {0}")]
    Acquisition(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("send error: {0}")]
    Send(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("a session is already {0}")]
    SessionActive(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, LifelineError>;
