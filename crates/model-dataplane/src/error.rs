//! Typed dataplane errors.
//!
//! The core raises these; every protocol binding maps them to its own wire
//! convention (HTTP status, gRPC code, or an OpenAI error object).

use crate::openai::types::ErrorResponse;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DataplaneError>;

#[derive(Error, Debug)]
pub enum DataplaneError {
    #[error("Model with name {0} does not exist.")]
    ModelNotFound(String),

    #[error("Model with name {0} is not ready.")]
    ModelNotReady(String),

    #[error("Model {model} does not support {capability}")]
    UnsupportedCapability { model: String, capability: String },

    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("{0}")]
    Internal(String),
}

/// Failures while talking to a remote runtime or OpenAI-compatible endpoint.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Failed to connect to upstream: {0}")]
    Connect(String),

    #[error("Upstream request timed out: {0}")]
    Timeout(String),

    /// Non-2xx with a structured error body; propagated verbatim.
    #[error("{}", .0.error.message)]
    Status(ErrorResponse),

    #[error("Received invalid response from upstream: {0}")]
    InvalidResponse(String),

    #[error("Upstream request failed: {0}")]
    Request(String),
}

impl DataplaneError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn unsupported(model: &str, capability: &str) -> Self {
        Self::UnsupportedCapability {
            model: model.to_string(),
            capability: capability.to_string(),
        }
    }

    /// HTTP status used by the REST bindings.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ModelNotFound(_) => 404,
            Self::ModelNotReady(_) => 503,
            Self::UnsupportedCapability { .. } => 501,
            Self::InvalidInput(_) => 400,
            Self::Upstream(e) => e.status_code(),
            Self::Internal(_) => 500,
        }
    }
}

impl UpstreamError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Connect(_) => 503,
            Self::Timeout(_) => 504,
            Self::Status(body) => body.status(),
            Self::InvalidResponse(_) => 502,
            Self::Request(_) => 500,
        }
    }

    /// Classify a transport failure from `reqwest`.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }

    /// Classify a non-2xx reply: a parseable OpenAI error body is kept as is.
    pub fn from_status(status: u16, body: &str) -> Self {
        match serde_json::from_str::<ErrorResponse>(body) {
            Ok(mut parsed) => {
                if parsed.error.code.is_empty() {
                    parsed.error.code = status.to_string();
                }
                Self::Status(parsed)
            }
            Err(_) => Self::InvalidResponse(format!("status {}: {}", status, body)),
        }
    }
}

impl From<&DataplaneError> for ErrorResponse {
    fn from(err: &DataplaneError) -> Self {
        let kind = match err {
            DataplaneError::Upstream(UpstreamError::Status(body)) => return body.clone(),
            DataplaneError::ModelNotFound(_) => "NotFoundError",
            DataplaneError::ModelNotReady(_) | DataplaneError::Upstream(UpstreamError::Connect(_)) => {
                "ServiceUnavailableError"
            }
            DataplaneError::UnsupportedCapability { .. } | DataplaneError::InvalidInput(_) => "BadRequestError",
            DataplaneError::Upstream(UpstreamError::Timeout(_)) => "GatewayTimeoutError",
            DataplaneError::Upstream(UpstreamError::InvalidResponse(_)) => "BadGatewayError",
            DataplaneError::Upstream(UpstreamError::Request(_)) | DataplaneError::Internal(_) => {
                "InternalServerError"
            }
        };
        ErrorResponse::new(err.status_code(), err.to_string(), kind)
    }
}

impl From<anyhow::Error> for DataplaneError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<DataplaneError>() {
            Ok(e) => e,
            Err(err) => Self::Internal(format!("{:#}", err)),
        }
    }
}

impl From<serde_json::Error> for DataplaneError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidInput(format!("Unrecognized request format: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(DataplaneError::ModelNotFound("m".into()).status_code(), 404);
        assert_eq!(DataplaneError::ModelNotReady("m".into()).status_code(), 503);
        assert_eq!(DataplaneError::invalid_input("bad").status_code(), 400);
        assert_eq!(DataplaneError::unsupported("m", "explain").status_code(), 501);
        assert_eq!(DataplaneError::Internal("boom".into()).status_code(), 500);
    }

    #[test]
    fn test_upstream_classification() {
        assert_eq!(UpstreamError::Timeout("t".into()).status_code(), 504);
        assert_eq!(UpstreamError::Connect("c".into()).status_code(), 503);
        assert_eq!(UpstreamError::Request("r".into()).status_code(), 500);

        let body = r#"{"error":{"code":"429","message":"slow down","type":"rate_limit","param":null}}"#;
        match UpstreamError::from_status(429, body) {
            UpstreamError::Status(resp) => {
                assert_eq!(resp.error.message, "slow down");
                assert_eq!(resp.error.code, "429");
            }
            other => panic!("unexpected {:?}", other),
        }

        let wrapped = UpstreamError::from_status(500, "<html>oops</html>");
        assert!(matches!(wrapped, UpstreamError::InvalidResponse(_)));
        assert_eq!(wrapped.status_code(), 502);
        assert!(wrapped.to_string().starts_with("Received invalid response from upstream"));
    }

    #[test]
    fn test_anyhow_roundtrip_keeps_kind() {
        let err: anyhow::Error = DataplaneError::ModelNotFound("x".into()).into();
        let back: DataplaneError = err.into();
        assert!(matches!(back, DataplaneError::ModelNotFound(name) if name == "x"));

        let other: DataplaneError = anyhow::anyhow!("disk on fire").into();
        assert!(matches!(other, DataplaneError::Internal(msg) if msg.contains("disk on fire")));
    }

    #[test]
    fn test_bad_json_is_invalid_input() {
        let err: DataplaneError = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err().into();
        assert!(err.to_string().starts_with("Unrecognized request format"));
    }
}
