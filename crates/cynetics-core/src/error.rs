use thiserror::Error;

use crate::task::TaskStatus;

#[derive(Debug, Error)]
pub enum CyneticsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("task {task_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
}
