//! Errors surfaced by the workflow engine.

use fundflow_core::WorkflowError;

use crate::state_machine::repository::RepositoryError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// A workflow rule rejected the action before anything was written.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// The store stayed unavailable through every retry.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<RepositoryError> for EngineError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound { entity, id } => Self::NotFound { entity, id },
            RepositoryError::Unavailable { .. } => Self::StoreUnavailable(e.to_string()),
            other => Self::Repository(other),
        }
    }
}
