//! Error type surfaced at every library entry point.

use crate::serialize::SerializationError;

pub type Result<T> = core::result::Result<T, AdapterError>;

/// Single error kind of the adapter. The variant carries the condition class,
/// the message carries the specifics.
#[derive(thiserror::Error, Debug)]
pub enum AdapterError {
    /// The middleware participant configuration could not be created.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The operation is not allowed in the current lifecycle phase.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The operation contradicts an earlier request or the calling context.
    #[error("invalid usage: {0}")]
    InvalidUsage(String),
    /// An error reported by the middleware itself.
    #[error("transport error: {0}")]
    Transport(String),
    /// Waiting for the first transmission of a consumed member timed out.
    #[error("timed out waiting for first transmission")]
    Timeout,
    #[error(transparent)]
    Serialization(#[from] SerializationError),
}
