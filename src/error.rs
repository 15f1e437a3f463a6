//! Error types for the partition shim.

use crate::types::PartitionId;
use thiserror::Error;

/// Result type alias for partition shim operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the partition shim.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// Reallocation was requested without any node to assign to.
    #[error("cannot reallocate partitions over an empty node list")]
    EmptyNodeList,

    /// A message or completion referenced a partition this service does not have.
    #[error("unknown partition: {0}")]
    UnknownPartition(PartitionId),

    /// Encoding or decoding of a gossip payload failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// The join transport could not reach any requested address.
    #[error("join failed: {0}")]
    JoinFailed(String),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::UnknownPartition(7).to_string(),
            "unknown partition: 7"
        );
        assert_eq!(
            Error::Config("partition_count must be > 0".into()).to_string(),
            "config error: partition_count must be > 0"
        );
    }

    #[test]
    fn test_from_bincode() {
        let err = bincode::deserialize::<u64>(&[1, 2]).unwrap_err();
        let err: Error = err.into();
        assert!(matches!(err, Error::Codec(_)));
    }
}
