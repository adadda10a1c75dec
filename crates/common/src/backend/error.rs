use reqwest::StatusCode;
use serde::Deserialize;

/// Errors returned by any backend capability
///
/// Sealed and permission-denied responses get their own variants since
///  callers report them differently from generic HTTP failures.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Unreachable(reqwest::Error),
    #[error("HTTP request failed: {0}")]
    Reqwest(reqwest::Error),
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("backend is sealed: {0}")]
    Sealed(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("HTTP status {0}: {1}")]
    HttpStatus(StatusCode, String),
    #[error("unexpected backend response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            BackendError::Unreachable(err)
        } else {
            BackendError::Reqwest(err)
        }
    }
}

impl BackendError {
    pub fn is_sealed(&self) -> bool {
        matches!(self, BackendError::Sealed(_))
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, BackendError::PermissionDenied(_))
    }

    /// Classify a non-success response from the backend
    pub(crate) fn from_response(status: StatusCode, body: &str) -> Self {
        let message = match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) if !parsed.errors.is_empty() => parsed.errors.join("; "),
            _ => body.trim().to_string(),
        };

        if message.contains("Vault is sealed") || status == StatusCode::SERVICE_UNAVAILABLE {
            return BackendError::Sealed(message);
        }
        if status == StatusCode::FORBIDDEN {
            return BackendError::PermissionDenied(message);
        }
        BackendError::HttpStatus(status, message)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_sealed() {
        let err = BackendError::from_response(
            StatusCode::SERVICE_UNAVAILABLE,
            r#"{"errors":["Vault is sealed"]}"#,
        );
        assert!(err.is_sealed());
        assert_eq!(err.to_string(), "backend is sealed: Vault is sealed");
    }

    #[test]
    fn test_classify_permission_denied() {
        let err =
            BackendError::from_response(StatusCode::FORBIDDEN, r#"{"errors":["permission denied"]}"#);
        assert!(err.is_permission_denied());
    }

    #[test]
    fn test_classify_other_keeps_status() {
        let err = BackendError::from_response(StatusCode::BAD_REQUEST, "not json");
        match err {
            BackendError::HttpStatus(status, message) => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(message, "not json");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
