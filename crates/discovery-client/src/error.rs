//! Platform API error handling.

use serde::Deserialize;

use discovery_core::Error;

/// Error body returned by the platform: `{"error": {"code": 400, "message": "..."}}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub message: String,
}

/// Classification of a platform error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCode {
    /// Missing or invalid credentials.
    Unauthorized,
    /// Credentials lack the required capability.
    Forbidden,
    /// Resource or job not found.
    NotFound,
    /// Duplicate external id.
    Conflict,
    /// Rate limit exceeded.
    RateLimited,
    /// Server error.
    ServerError,
    /// Unknown error.
    Unknown,
}

impl ApiErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            409 => Self::Conflict,
            429 => Self::RateLimited,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::ServerError)
    }
}

/// True when repeating the request may succeed. Transport failures count,
/// as do 429 and 5xx responses.
pub fn is_retryable(err: &Error) -> bool {
    match err {
        Error::Request(_) => true,
        Error::Http { status, .. } => ApiErrorCode::from_status(*status).is_retryable(),
        _ => false,
    }
}

/// Turn a non-success response into an [`Error::Http`], keeping the
/// platform's message when the body has one.
pub(crate) async fn error_from_response(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ApiErrorResponse>(&text) {
        Ok(body) => body.error.message,
        Err(_) if text.trim().is_empty() => "no response body".to_string(),
        Err(_) => text,
    };
    Error::Http { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_from_status() {
        assert_eq!(ApiErrorCode::from_status(401), ApiErrorCode::Unauthorized);
        assert_eq!(ApiErrorCode::from_status(409), ApiErrorCode::Conflict);
        assert_eq!(ApiErrorCode::from_status(429), ApiErrorCode::RateLimited);
        assert_eq!(ApiErrorCode::from_status(503), ApiErrorCode::ServerError);
        assert_eq!(ApiErrorCode::from_status(418), ApiErrorCode::Unknown);
    }

    #[test]
    fn test_retryable_codes() {
        assert!(ApiErrorCode::RateLimited.is_retryable());
        assert!(ApiErrorCode::ServerError.is_retryable());
        assert!(!ApiErrorCode::Conflict.is_retryable());
        assert!(!ApiErrorCode::Unauthorized.is_retryable());
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable(&Error::Request("reset".to_string())));
        assert!(is_retryable(&Error::Http {
            status: 502,
            message: "bad gateway".to_string()
        }));
        assert!(!is_retryable(&Error::Http {
            status: 400,
            message: "bad request".to_string()
        }));
        assert!(!is_retryable(&Error::Cancelled));
    }

    #[test]
    fn test_parse_error_body() {
        let body: ApiErrorResponse =
            serde_json::from_str(r#"{"error":{"code":400,"message":"Invalid fileId"}}"#).unwrap();
        assert_eq!(body.error.message, "Invalid fileId");
    }
}
