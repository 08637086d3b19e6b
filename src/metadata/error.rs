//! Metadata catalog error definitions

use std::error::Error;
use std::fmt;

/// Reservation protocol errors
///
/// Capacity exhaustion is not an error: `reserve_create` returns a closed
/// reservation instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataError {
    /// Complete called on a cancelled or never-opened reservation
    InvalidReservation,
    /// Complete called twice on the same reservation
    DoubleComplete,
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataError::InvalidReservation => {
                write!(f, "Complete on invalid reservation")
            }
            MetadataError::DoubleComplete => write!(f, "Double complete not allowed"),
        }
    }
}

impl Error for MetadataError {}

/// Result type for reservation operations
pub type MetadataResult<T> = Result<T, MetadataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_error_display() {
        assert_eq!(
            MetadataError::InvalidReservation.to_string(),
            "Complete on invalid reservation"
        );
        assert_eq!(
            MetadataError::DoubleComplete.to_string(),
            "Double complete not allowed"
        );
    }
}
