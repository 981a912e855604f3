//! Error taxonomy for the memory engine.
//!
//! Almost every failure in this subsystem is recovered locally: a failed
//! classifier call becomes a conservative plan, a failed vector query becomes
//! an empty scope, a failed store write during maintenance is logged and
//! skipped. The one hard error surfaced to callers is [`MemoryError::InvalidScope`],
//! which is a caller programming error rather than a transient condition.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    /// The caller supplied a scope context without the required user id.
    #[error("invalid scope context: {0}")]
    InvalidScope(String),

    /// A durable-store operation failed on the request path.
    #[error("memory store error: {0}")]
    Store(anyhow::Error),

    /// An external capability failed on a path where the caller asked for a
    /// durable effect (e.g. embedding during entry creation).
    #[error("external capability error: {0}")]
    External(anyhow::Error),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
