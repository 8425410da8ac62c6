use std::path::PathBuf;

/// Errors raised by the trainer, the inference engine and their collaborators.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("tensor backend error: {0}")]
    Tch(#[from] tch::TchError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("checkpoint {path} does not match the network: {detail}")]
    ConfigMismatch { path : PathBuf, detail : String },

    #[error("no checkpoint found at {0}")]
    MissingCheckpoint(PathBuf),

    #[error("no samples reported since the last collect()")]
    EmptyAccumulator,

    #[error("{op} is not allowed in state {state:?}")]
    InvalidState { op : &'static str, state : crate::training::TrainerState },

    #[error("position is {found}x{found}, the network expects {expected}x{expected}")]
    BoardSize { expected : i64, found : i64 },

    #[error("bad training example: {0}")]
    BadExample(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[test]
fn test_error_display() {
    let err = Error::ConfigMismatch {
        path : PathBuf::from("models/000001"),
        detail : "k: expected 8, found 16".to_string(),
    };
    assert_eq!(err.to_string(),
        "checkpoint models/000001 does not match the network: k: expected 8, found 16");

    assert_eq!(Error::EmptyAccumulator.to_string(),
        "no samples reported since the last collect()");

    let err = Error::InvalidState {
        op : "bootstrap", state : crate::training::TrainerState::Checkpointed };
    assert_eq!(err.to_string(), "bootstrap is not allowed in state Checkpointed");
}
