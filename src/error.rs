use thiserror::Error;

pub type Result<T> = std::result::Result<T, AttendanceError>;

/// Failures surfaced by the attendance engine.
///
/// An empty result is never an error: a day without recognitions is a valid
/// report with zero presence. `UpstreamUnavailable` is reserved for failed
/// collaborator calls so callers can tell the two apart.
#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AttendanceError {
    /// Stable machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AttendanceError::NotFound(_) => "NOT_FOUND",
            AttendanceError::InvalidParameter(_) => "INVALID_PARAMETER",
            AttendanceError::ValidationFailed(_) => "VALIDATION_FAILED",
            AttendanceError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            AttendanceError::UpstreamUnavailable(_) | AttendanceError::Database(_) => {
                "UPSTREAM_UNAVAILABLE"
            }
        }
    }

    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            AttendanceError::UpstreamUnavailable(_) | AttendanceError::Database(_)
        )
    }
}
