use thiserror::Error;

pub type Result<T> = std::result::Result<T, CheckpointError>;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint storage backend error: {0}")]
    Backend(String),

    #[error("failed to serialize checkpoint: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("corrupted checkpoint record for workflow {workflow_id}: {reason}")]
    Corrupted { workflow_id: String, reason: String },
}

impl From<sled::Error> for CheckpointError {
    fn from(e: sled::Error) -> Self {
        CheckpointError::Backend(e.to_string())
    }
}
