//! Compute API client errors

use thiserror::Error;

/// Errors that can occur when interacting with the Compute Engine API
#[derive(Debug, Error)]
pub enum ComputeError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Compute API returned an error status
    #[error("Compute API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from the response body
        message: String,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed (invalid or expired token, missing permission)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Invalid request (rejected by API validation)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A long-running operation reported an error
    #[error("Operation {operation} failed: {message}")]
    Operation {
        /// Operation name
        operation: String,
        /// Concatenated error messages
        message: String,
    },
}

impl ComputeError {
    /// Maps an HTTP error status and body to the matching variant
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => ComputeError::Authentication(message),
            404 => ComputeError::NotFound(message),
            409 => ComputeError::AlreadyExists(message),
            400 => ComputeError::InvalidRequest(message),
            _ => ComputeError::Api { status, message },
        }
    }

    /// Whether the error means the resource does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, ComputeError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert!(matches!(ComputeError::from_status(401, String::new()), ComputeError::Authentication(_)));
        assert!(matches!(ComputeError::from_status(403, String::new()), ComputeError::Authentication(_)));
        assert!(ComputeError::from_status(404, String::new()).is_not_found());
        assert!(matches!(ComputeError::from_status(409, String::new()), ComputeError::AlreadyExists(_)));
        assert!(matches!(ComputeError::from_status(400, String::new()), ComputeError::InvalidRequest(_)));
        assert!(matches!(
            ComputeError::from_status(503, "unavailable".to_string()),
            ComputeError::Api { status: 503, .. }
        ));
    }
}
