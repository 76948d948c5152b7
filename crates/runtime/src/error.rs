//! Error taxonomy and the owned error-handle wrapper.
//!
//! Signature and type mismatches are recoverable: they route into a retry
//! continuation instead of aborting, because they may simply reflect a stale
//! view of a module that is about to be reloaded. Allocation and load
//! failures are reported with a diagnostic and never retried. Field access
//! failures on a struct view never retry either; struct shape mismatches are
//! not expected to resolve via reload.

use std::ffi::CStr;
use std::fmt;
use std::sync::Arc;

use moult_abi::{RawErrorHandle, RuntimeApi};

/// A recoverable invocation failure. Carried by a pending continuation and
/// reproduced verbatim when the continuation is forced without a reload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvokeError {
    #[error("failed to resolve function: {0}")]
    LookupFailed(String),

    #[error("invalid number of arguments: expected {expected}, found {found}")]
    ArityMismatch { expected: usize, found: usize },

    #[error("invalid argument type at index {index}: expected `{expected}`, found `{found}`")]
    ArgumentTypeMismatch {
        index: usize,
        expected: String,
        found: String,
    },

    #[error("invalid return type: expected `{expected}`, found `{found}`")]
    ReturnTypeMismatch { expected: String, found: String },
}

/// A struct field access failure. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("struct `{struct_name}` does not contain field `{field}`")]
    FieldNotFound { struct_name: String, field: String },

    #[error("mismatched types for `{struct_name}::{field}`: expected `{expected}`, found `{found}`")]
    FieldTypeMismatch {
        struct_name: String,
        field: String,
        expected: String,
        found: String,
    },
}

/// A non-recoverable boundary failure, reported to the caller with the
/// runtime's diagnostic.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to load runtime: {0}")]
    LoadFailed(String),

    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    #[error("runtime error: {0}")]
    Api(String),
}

/// Owning wrapper around a runtime error token.
///
/// Releases the underlying error object exactly once, on drop. Rust
/// ownership supplies the move-only contract the boundary requires: there is
/// no way to copy the handle, and a moved-from binding no longer exists.
pub struct ErrorHandle {
    raw: RawErrorHandle,
    api: Arc<RuntimeApi>,
}

impl ErrorHandle {
    /// Wrap a raw token, or `None` if the token signals success.
    pub(crate) fn from_raw(raw: RawErrorHandle, api: &Arc<RuntimeApi>) -> Option<ErrorHandle> {
        if raw.is_error() {
            Some(ErrorHandle {
                raw,
                api: Arc::clone(api),
            })
        } else {
            None
        }
    }

    /// The UTF-8 diagnostic message, if the runtime attached one.
    pub fn message(&self) -> Option<String> {
        let ptr = unsafe { (self.api.error_message)(self.raw) };
        if ptr.is_null() {
            return None;
        }
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }

    /// Consume the handle, returning its message and releasing the token.
    pub fn take_message(self) -> Option<String> {
        self.message()
    }
}

impl Drop for ErrorHandle {
    fn drop(&mut self) {
        unsafe { (self.api.error_destroy)(self.raw) };
    }
}

impl fmt::Debug for ErrorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandle").field("raw", &self.raw).finish()
    }
}

impl fmt::Display for ErrorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) => write!(f, "{msg}"),
            None => write!(f, "unknown runtime error"),
        }
    }
}

/// Turn a raw boundary result into `Err(ErrorHandle)` when the token is
/// non-zero.
pub(crate) fn check(api: &Arc<RuntimeApi>, raw: RawErrorHandle) -> Result<(), ErrorHandle> {
    match ErrorHandle::from_raw(raw, api) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

impl From<ErrorHandle> for RuntimeError {
    fn from(err: ErrorHandle) -> Self {
        RuntimeError::Api(
            err.take_message()
                .unwrap_or_else(|| "unknown runtime error".to_string()),
        )
    }
}
