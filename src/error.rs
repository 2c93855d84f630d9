//! Errors reported by the handle layer

use thiserror::Error;

use crate::backend::{BackendError, NativeWindow};

#[derive(Error, Debug)]
pub enum HandleError {
    /// The window behind the handle has been closed
    #[error("Invalid window (already closed)")]
    InvalidHandle,

    /// The handle has been freed or belongs to another session
    #[error("Unknown window handle")]
    UnknownHandle,

    #[error("Native {op} failed: {source}")]
    NativeOperationFailed {
        op: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("Window is already a panel")]
    AlreadyPanel,

    #[error("Window is not a panel")]
    NotPanel,

    /// Two handles claim the same native window. Never expected.
    #[error("Handle identity violated for native window {0}")]
    IdentityViolation(NativeWindow),

    #[error("Screen is not initialized")]
    NotInitialized,
}

impl HandleError {
    /// Wrap a backend failure for the named native operation
    pub fn native(op: &'static str) -> impl FnOnce(BackendError) -> HandleError {
        move |source| HandleError::NativeOperationFailed { op, source }
    }
}

pub type Result<T> = std::result::Result<T, HandleError>;
