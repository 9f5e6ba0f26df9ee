/// Shared error type used across all Prizm crates.
///
/// Variants map one-to-one onto the boundary responses the gateway
/// produces: validation → 400, not-found → 404, locked → 423,
/// concurrency limit → 429, everything unexpected → 500.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A cooperative resource lock is held by another session. Carries the
    /// serialized lock descriptor so the boundary can render the 423 body.
    #[error("resource locked: {resource}")]
    ResourceLocked {
        resource: String,
        lock: serde_json::Value,
    },

    #[error("{0}")]
    ConcurrencyLimit(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// LLM provider or tool implementation failure.
    #[error("upstream: {0}")]
    Upstream(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status code for the boundary layer.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::NotFound(_) => 404,
            Error::ResourceLocked { .. } => 423,
            Error::ConcurrencyLimit(_) => 429,
            Error::Cancelled(_) => 499,
            Error::Timeout(_) => 504,
            Error::Upstream(_) => 502,
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => 500,
        }
    }

    /// Machine-readable error code for JSON bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::ResourceLocked { .. } => "RESOURCE_LOCKED",
            Error::ConcurrencyLimit(_) => "CONCURRENCY_LIMIT",
            Error::Cancelled(_) => "CANCELLED",
            Error::Timeout(_) => "TIMEOUT",
            Error::Upstream(_) => "UPSTREAM_ERROR",
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => "INTERNAL",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_boundary_contract() {
        assert_eq!(Error::Validation("x".into()).status_code(), 400);
        assert_eq!(Error::NotFound("x".into()).status_code(), 404);
        assert_eq!(
            Error::ResourceLocked {
                resource: "doc-1".into(),
                lock: serde_json::json!({}),
            }
            .status_code(),
            423
        );
        assert_eq!(Error::ConcurrencyLimit("x".into()).status_code(), 429);
        assert_eq!(Error::Internal("x".into()).status_code(), 500);
    }

    #[test]
    fn concurrency_limit_message_is_verbatim() {
        let e = Error::ConcurrencyLimit("global concurrency limit reached (5)".into());
        assert!(e.to_string().contains("global concurrency limit"));
    }
}
