use reqwest::header::HeaderMap;
use reqwest::StatusCode;

/// Network-level failure before any HTTP status was obtained.
#[derive(Debug, thiserror::Error)]
#[error("transport error: {message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Typed failure of a single API exchange.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The local estimator judged the call unsafe; it never reached the wire.
    #[error("rate limit too close to the API limit to safely send this request ({used}/{allowed})")]
    RateLimitExceeded { used: u32, allowed: u32 },
    #[error("{message} Retry-After: {}", .retry_after.as_deref().unwrap_or("unknown"))]
    RemoteRateLimitBan {
        message: String,
        retry_after: Option<String>,
    },
    #[error("authorization rejected: {message}")]
    AuthorizationRejected { message: String },
    #[error("not found: {message}")]
    NotFound { message: String },
    #[error("bad request: {message}")]
    BadRequest { message: String },
    #[error("conflict: {message}")]
    Conflict { message: String },
    #[error("upstream server error ({status}): {message}")]
    ServerError { status: u16, message: String },
    #[error("edge server error ({status}): {message}")]
    EdgeServerError { status: u16, message: String },
    #[error("unexpected status {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ApiError {
    /// Stable machine-readable code for the failure kind.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::RateLimitExceeded { .. } => "local_rate_limit",
            ApiError::RemoteRateLimitBan { .. } => "rate_limited",
            ApiError::AuthorizationRejected { .. } => "unauthorized",
            ApiError::NotFound { .. } => "not_found",
            ApiError::BadRequest { .. } => "bad_request",
            ApiError::Conflict { .. } => "conflict",
            ApiError::ServerError { .. } => "upstream_error",
            ApiError::EdgeServerError { .. } => "edge_error",
            ApiError::UnexpectedStatus { .. } => "unexpected_status",
            ApiError::Transport(_) => "transport_error",
        }
    }

    pub fn is_authorization_rejected(&self) -> bool {
        matches!(self, ApiError::AuthorizationRejected { .. })
    }
}

/// Pull the human-readable part out of an error page.
///
/// The API answers failures with a small HTML document whose `<h1>` carries the
/// message; anything else is returned trimmed.
pub fn extract_error_message(body: &str) -> String {
    let lower = body.to_ascii_lowercase();
    if let Some(open) = lower.find("<h1") {
        if let Some(gt) = lower[open..].find('>') {
            let start = open + gt + 1;
            if let Some(end) = lower[start..].find("</h1>") {
                return body[start..start + end].trim().to_string();
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.len() > 200 {
        let mut cut = 200;
        while !trimmed.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &trimmed[..cut])
    } else {
        trimmed.to_string()
    }
}

fn retry_after(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-retry-after")
        .or_else(|| headers.get(reqwest::header::RETRY_AFTER))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
}

/// Classify a non-success response into an [`ApiError`].
pub fn map_status_to_error(status: StatusCode, headers: &HeaderMap, body: &str) -> ApiError {
    let message = extract_error_message(body);
    match status.as_u16() {
        400 => ApiError::BadRequest { message },
        401 | 403 => ApiError::AuthorizationRejected { message },
        404 => ApiError::NotFound { message },
        409 => ApiError::Conflict { message },
        429 => {
            let retry_after = retry_after(headers);
            let message = if headers.contains_key("x-retry-after") || message.is_empty() {
                "API has temporarily banned this IP for breaking the rate limit.".to_string()
            } else {
                message
            };
            ApiError::RemoteRateLimitBan {
                message,
                retry_after,
            }
        }
        code @ 520..=527 => ApiError::EdgeServerError {
            status: code,
            message,
        },
        code if status.is_server_error() => ApiError::ServerError {
            status: code,
            message,
        },
        code => ApiError::UnexpectedStatus {
            status: code,
            message,
        },
    }
}
