use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SamError {
    #[error("feature not found: {0}")]
    FeatureNotFound(String),

    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("malformed spec at line {line}: {reason} (`{text}`)")]
    MalformedSpec {
        line: usize,
        text: String,
        reason: String,
    },

    #[error("duplicate task id '{task_id}' at line {line} (first defined at line {first_line})")]
    DuplicateTaskId {
        task_id: String,
        first_line: usize,
        line: usize,
    },

    #[error("already exists: {} (use --force to overwrite)", .0.display())]
    AlreadyExists(PathBuf),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("invalid context path: '{0}'")]
    InvalidPath(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SamError {
    /// True for the "output exists, no override requested" refusal.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, SamError::AlreadyExists(_))
    }
}

pub type Result<T> = std::result::Result<T, SamError>;
