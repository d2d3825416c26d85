//! Errors that reject a whole workflow run.
//!
//! A handler failing on a node is not one of these: it is retried and then
//! recorded in the result tree.

use crate::types::{StepId, StepKind};

pub type WorkflowResult<T> = Result<T, WorkflowError>;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// No handler registered for a node's (kind, identifier)
    #[error("no handler registered for {kind}/{identifier}")]
    HandlerNotFound { kind: StepKind, identifier: String },

    /// Two handlers claimed the same (kind, identifier)
    #[error("handler already registered for {kind}/{identifier}")]
    DuplicateHandler { kind: StepKind, identifier: String },

    /// A node's config could not be prepared before its handler ran
    #[error("malformed config on step {step_id} ({kind}/{identifier}): {reason}")]
    ConfigMalformed {
        step_id: StepId,
        kind: StepKind,
        identifier: String,
        reason: String,
    },

    /// Rows do not describe a strict tree
    #[error("invalid step tree: {0}")]
    InvalidTree(String),

    /// A node task was torn down outside its handler
    #[error("step task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

impl WorkflowError {
    /// Errors caused by how the workflow was defined rather than by a runtime fault
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            Self::HandlerNotFound { .. }
                | Self::DuplicateHandler { .. }
                | Self::ConfigMalformed { .. }
                | Self::InvalidTree(_)
        )
    }
}
