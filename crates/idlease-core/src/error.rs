use idlease_storage::StorageError;
use thiserror::Error;

/// Result type alias for allocation and renewal operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for identifier allocation and lease renewal
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Store errors that are not part of normal contention
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Every identifier in the range is held by a live lease
    #[error("no available ID in range [{min_id}, {max_id}]")]
    NoAvailableId { min_id: i64, max_id: i64 },

    /// The held record no longer belongs to this process
    #[error("lease on ID {id} was lost to another owner")]
    LeaseLost { id: i64 },

    /// Internal system errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the renewal loop must stop after this error
    ///
    /// Transient store errors only cost a tick; everything else means this
    /// process can no longer vouch for its identifier.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Storage(e) => !e.is_transient(),
            _ => true,
        }
    }

    /// Get error code for logs and API consumers
    pub fn error_code(&self) -> &str {
        match self {
            Error::Config(_) => "CONFIGURATION_ERROR",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::NoAvailableId { .. } => "NO_AVAILABLE_ID",
            Error::LeaseLost { .. } => "LEASE_LOST",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_available_id_message() {
        let err = Error::NoAvailableId { min_id: 0, max_id: 3 };
        assert!(err.to_string().starts_with("no available ID"));
        assert_eq!(err.error_code(), "NO_AVAILABLE_ID");
    }

    #[test]
    fn test_fatality() {
        assert!(Error::LeaseLost { id: 4 }.is_fatal());
        assert!(Error::Storage(StorageError::Timeout).is_fatal());
        assert!(Error::Storage(StorageError::Conflict).is_fatal());

        assert!(!Error::Storage(StorageError::CapacityExceeded("busy".into())).is_fatal());
        assert!(!Error::Storage(StorageError::Internal("hiccup".into())).is_fatal());
    }

    #[test]
    fn test_storage_error_converts() {
        let err: Error = StorageError::Connection("refused".into()).into();
        assert!(matches!(err, Error::Storage(StorageError::Connection(_))));
    }
}
