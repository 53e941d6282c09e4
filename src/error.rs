use thiserror::Error;

use crate::types::RuleId;

/// Classifier error types
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Rule {uid} exceeds classifier capacity of {max} rules")]
    RuleCapacity { uid: RuleId, max: usize },

    #[error("Rule {0} is already installed")]
    DuplicateRule(RuleId),

    #[error("Rule {0} is not installed")]
    UnknownRule(RuleId),

    #[error("Invalid rule {uid}: {message}")]
    InvalidRule { uid: RuleId, message: String },

    #[error("Too many field chunks (maximum {max})")]
    ChunkLimit { max: usize },

    #[error("Rule set needs {required} phases, maximum is {max}")]
    PhaseLimit { required: usize, max: usize },

    #[error("Chunk {chunk} in phase {phase} needs {cells} cells, maximum is {max}")]
    ChunkTooLarge {
        phase: usize,
        chunk: usize,
        cells: usize,
        max: usize,
    },

    #[error("Equivalence class matches {count} rules, maximum is {max}")]
    MatchCapacity { count: usize, max: usize },

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl ClassifierError {
    /// Returns true for the structural capacity errors.
    ///
    /// These abort the current add and can only be resolved by shrinking the
    /// rule set or raising the limits in [`ClassifierOptions`](crate::ClassifierOptions).
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            ClassifierError::RuleCapacity { .. }
                | ClassifierError::ChunkLimit { .. }
                | ClassifierError::PhaseLimit { .. }
                | ClassifierError::ChunkTooLarge { .. }
                | ClassifierError::MatchCapacity { .. }
        )
    }

    pub(crate) fn invalid(uid: RuleId, message: impl Into<String>) -> Self {
        ClassifierError::InvalidRule {
            uid,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClassifierError>;
