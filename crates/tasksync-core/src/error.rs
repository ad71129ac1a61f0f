use thiserror::Error;

/// Failures scoped to a single task operation. None of these are fatal to
/// the process; the dashboard turns each one into a user-visible notice.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no signed-in user; sign in before working with tasks")]
    Unauthenticated,

    #[error("malformed task record {id:?}: {reason}")]
    MalformedRecord { id: Option<String>, reason: String },

    #[error("task title must not be empty")]
    EmptyTitle,

    #[error("due date {due} is before today ({today})")]
    PastDueDate { due: String, today: String },

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("task {0} is not known")]
    UnknownTask(String),

    #[error("attachment upload was cancelled")]
    UploadCancelled,

    #[error("{op} failed: {source:#}")]
    RemoteOperationFailed {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl SyncError {
    pub fn remote(op: &'static str, source: anyhow::Error) -> Self {
        Self::RemoteOperationFailed { op, source }
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SyncError::EmptyTitle | SyncError::PastDueDate { .. } | SyncError::InvalidDate(_)
        )
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
