use thiserror::Error;

#[derive(Debug, Error)]
pub enum BleqError {
    #[error("update loop is no longer running")]
    LoopClosed,

    #[error("intent store: {0}")]
    IntentStore(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BleqError>;
