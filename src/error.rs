//! Crate-wide error kinds.
//!
//! None of these ever escape to instrumented bytecode: every hot-path
//! entry point in [`crate::runtime`] catches and logs its own errors.
//! `FieldwatchError` exists for the handful of call sites (tests, the
//! demo binary, [`crate::rewriter`]) that want a `Result` to work with.

use thiserror::Error;

/// The error kinds this crate's own bookkeeping can produce.
#[derive(Debug, Error)]
pub enum FieldwatchError {
    /// A class could not be re-read or re-written during retransformation.
    /// The class is left unmodified; other classes continue to be processed.
    #[error("failed to transform class {class}: {reason}")]
    TransformFailure { class: String, reason: String },

    /// The runtime refused retransformation of a class outright.
    #[error("class {class} refused retransformation")]
    UnmodifiableClass { class: String },

    /// A stack could not be walked or serialized. Callers should still
    /// append the record with an empty stack rather than propagating this.
    #[error("failed to capture stack: {reason}")]
    StackCaptureFailure { reason: String },

    /// An unexpected exception occurred inside an agent entry point.
    /// Caught at the outermost boundary, logged once, swallowed.
    #[error("hot path exception in {entry_point}: {reason}")]
    HotPathException { entry_point: String, reason: String },

    /// The field or container referenced by a call was never registered.
    #[error("no tracking registered for {what}")]
    LookupMiss { what: String },
}

pub type Result<T> = std::result::Result<T, FieldwatchError>;
