//! Error taxonomy shared by the sync services.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or store failure. Carries the backend's `{code, message}`.
    #[error("backend unavailable ({code}): {message}")]
    BackendUnavailable { code: String, message: String },

    /// Expected absence. Readers turn this into empty state.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("job {job_id} is already tracked")]
    AlreadyTracked { job_id: String },

    /// Malformed input from the view, caught before any remote call.
    #[error("invalid input: {0}")]
    ValidationFailure(String),

    #[error("sign in required")]
    Unauthenticated,

    /// Another change for the same entity has not resolved yet.
    #[error("a change for {0} is still in flight")]
    Pending(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        if err.is_not_found() {
            SyncError::NotFound(err.message)
        } else {
            SyncError::BackendUnavailable {
                code: err.code,
                message: err.message,
            }
        }
    }
}
