use std::fmt;

/// Errors returned by instance lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceError {
    /// Malformed request input (bad `name@version`, unparsable body).
    InvalidInput(String),
    /// Requested instance or definition does not exist.
    NotFound(String),
    /// Missing or rejected bearer token.
    Unauthorized(String),
    /// Authenticated but not allowed.
    Forbidden(String),
    /// Conflicting object already exists.
    Conflict(String),
    /// A downstream service (cluster, controller, identity, registry) failed.
    Upstream(String),
    /// Tenant is at its concurrent-instance cap.
    QuotaExceeded(String),
    /// Global request-rate ceiling hit.
    RateLimited(String),
    /// Secondary index read/write failure.
    Storage(String),
}

impl InstanceError {
    /// HTTP status code this error is surfaced as.
    pub fn status_code(&self) -> u16 {
        match self {
            InstanceError::InvalidInput(_) => 400,
            InstanceError::Unauthorized(_) => 401,
            InstanceError::Forbidden(_) => 403,
            InstanceError::NotFound(_) => 404,
            InstanceError::Conflict(_) => 409,
            InstanceError::QuotaExceeded(_) | InstanceError::RateLimited(_) => 429,
            InstanceError::Upstream(_) | InstanceError::Storage(_) => 500,
        }
    }

    /// Rebuild an error from a downstream status code and message.
    pub fn from_status(status: u16, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match status {
            400 => InstanceError::InvalidInput(msg),
            401 => InstanceError::Unauthorized(msg),
            403 => InstanceError::Forbidden(msg),
            404 => InstanceError::NotFound(msg),
            409 => InstanceError::Conflict(msg),
            429 => InstanceError::RateLimited(msg),
            _ => InstanceError::Upstream(msg),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, InstanceError::NotFound(_))
    }

    /// The message without its category prefix.
    pub fn message(&self) -> &str {
        match self {
            InstanceError::InvalidInput(msg)
            | InstanceError::NotFound(msg)
            | InstanceError::Unauthorized(msg)
            | InstanceError::Forbidden(msg)
            | InstanceError::Conflict(msg)
            | InstanceError::Upstream(msg)
            | InstanceError::QuotaExceeded(msg)
            | InstanceError::RateLimited(msg)
            | InstanceError::Storage(msg) => msg,
        }
    }
}

impl fmt::Display for InstanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            InstanceError::NotFound(msg) => write!(f, "not found: {msg}"),
            InstanceError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            InstanceError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            InstanceError::Conflict(msg) => write!(f, "conflict: {msg}"),
            InstanceError::Upstream(msg) => write!(f, "upstream error: {msg}"),
            InstanceError::QuotaExceeded(msg) => write!(f, "quota exceeded: {msg}"),
            InstanceError::RateLimited(msg) => write!(f, "rate limited: {msg}"),
            InstanceError::Storage(msg) => write!(f, "storage error: {msg}"),
        }
    }
}

impl std::error::Error for InstanceError {}

pub type Result<T> = std::result::Result<T, InstanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_from_status() {
        for err in [
            InstanceError::InvalidInput("x".into()),
            InstanceError::Unauthorized("x".into()),
            InstanceError::Forbidden("x".into()),
            InstanceError::NotFound("x".into()),
            InstanceError::Conflict("x".into()),
        ] {
            assert_eq!(InstanceError::from_status(err.status_code(), "x"), err);
        }
    }

    #[test]
    fn unknown_status_is_upstream() {
        assert_eq!(
            InstanceError::from_status(502, "bad gateway"),
            InstanceError::Upstream("bad gateway".into())
        );
    }

    #[test]
    fn display_has_category_prefix() {
        let err = InstanceError::NotFound("pod demo-abc123".into());
        assert_eq!(err.to_string(), "not found: pod demo-abc123");
        assert_eq!(err.message(), "pod demo-abc123");
    }
}
