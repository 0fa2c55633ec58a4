use thiserror::Error;

/// Errors returned by [`DynamicHashTable`](crate::DynamicHashTable) and
/// [`RbTree`](crate::RbTree).
///
/// None of these are fatal: the container is left exactly as it was before
/// the failing call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("key not found")]
    KeyNotFound,
    #[error("key already present and duplicate keys are not allowed")]
    DuplicateKey,
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
