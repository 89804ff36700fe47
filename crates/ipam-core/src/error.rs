//! IPAM core errors

use thiserror::Error;

/// Errors that can occur when reading or mutating the address space
///
/// Every error is reported synchronously to the caller of the operation that
/// detected it. A failed operation never leaves a partial write behind.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IpamError {
    /// Malformed CIDR or address text
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Structurally invalid prefix (bad length, host bits set, unsupported block)
    #[error("Invalid prefix: {0}")]
    InvalidPrefix(String),

    /// Structurally invalid range (mixed versions, start after end)
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Uniqueness violation
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// VRF-scoped collision between ranges and prefixes
    #[error("Overlap: {0}")]
    Overlap(String),

    /// Illegal allocation state change
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Targeted address is already in use
    #[error("Already assigned: {0}")]
    AlreadyAssigned(String),

    /// Address is not an allocatable member of the target block
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// No free address or sub-block left in the target block
    #[error("Exhausted: {0}")]
    Exhausted(String),

    /// Operation not permitted on this object (e.g. allocation on a non-pool container)
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Unknown id, or a reference to an object that does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Delete blocked because other records still reference the object
    #[error("Protected delete: {0}")]
    ProtectedDelete(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl IpamError {
    /// Whether the error is the losing side of an allocation race.
    ///
    /// Callers are expected to retry `allocate_next` on these instead of
    /// treating them as fatal.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, IpamError::DuplicateKey(_) | IpamError::AlreadyAssigned(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(IpamError::DuplicateKey("10.0.0.1".to_string()).is_retryable());
        assert!(IpamError::AlreadyAssigned("10.0.0.1".to_string()).is_retryable());
        assert!(!IpamError::Exhausted("10.0.0.0/29".to_string()).is_retryable());
        assert!(!IpamError::InvalidTransition("assigned -> reserved".to_string()).is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = IpamError::Overlap("10.0.0.10-10.0.0.20".to_string());
        assert_eq!(err.to_string(), "Overlap: 10.0.0.10-10.0.0.20");
    }
}
