//! Error taxonomy shared by every tier of the gateway.
//!
//! Codes are stable strings that survive failover, stream framing, and the
//! OpenAI error body; classification of raw adapter/page strings lives here
//! so the executor and the transport agree on retryability.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error codes with their HTTP status and OpenAI error type.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    Unauthorized,
    BrowserNotInitialized,
    ServerBusy,
    NoMessages,
    NoUserMessages,
    TooManyImages,
    InvalidModel,
    ImageRequired,
    ImageForbidden,
    Recaptcha,
    InternalError,
    GenerationFailed,
    FailoverExhausted,
    Timeout,
    PageClosed,
    PageCrashed,
    PageInvalid,
    UpstreamHttp,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::BrowserNotInitialized => "BROWSER_NOT_INITIALIZED",
            ErrorCode::ServerBusy => "SERVER_BUSY",
            ErrorCode::NoMessages => "NO_MESSAGES",
            ErrorCode::NoUserMessages => "NO_USER_MESSAGES",
            ErrorCode::TooManyImages => "TOO_MANY_IMAGES",
            ErrorCode::InvalidModel => "INVALID_MODEL",
            ErrorCode::ImageRequired => "IMAGE_REQUIRED",
            ErrorCode::ImageForbidden => "IMAGE_FORBIDDEN",
            ErrorCode::Recaptcha => "RECAPTCHA",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::GenerationFailed => "GENERATION_FAILED",
            ErrorCode::FailoverExhausted => "FAILOVER_EXHAUSTED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::PageClosed => "PAGE_CLOSED",
            ErrorCode::PageCrashed => "PAGE_CRASHED",
            ErrorCode::PageInvalid => "PAGE_INVALID",
            ErrorCode::UpstreamHttp => "UPSTREAM_HTTP",
        }
    }

    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::Unauthorized => 401,
            ErrorCode::Recaptcha => 403,
            ErrorCode::NoMessages
            | ErrorCode::NoUserMessages
            | ErrorCode::TooManyImages
            | ErrorCode::InvalidModel
            | ErrorCode::ImageRequired
            | ErrorCode::ImageForbidden => 400,
            ErrorCode::ServerBusy => 429,
            ErrorCode::InternalError => 500,
            ErrorCode::BrowserNotInitialized => 503,
            ErrorCode::GenerationFailed
            | ErrorCode::FailoverExhausted
            | ErrorCode::Timeout
            | ErrorCode::PageClosed
            | ErrorCode::PageCrashed
            | ErrorCode::PageInvalid
            | ErrorCode::UpstreamHttp => 502,
        }
    }

    /// OpenAI error body `type` field.
    pub fn openai_type(self) -> &'static str {
        match self {
            ErrorCode::Unauthorized
            | ErrorCode::NoMessages
            | ErrorCode::NoUserMessages
            | ErrorCode::TooManyImages
            | ErrorCode::InvalidModel
            | ErrorCode::ImageRequired
            | ErrorCode::ImageForbidden => "invalid_request",
            ErrorCode::ServerBusy => "rate_limit",
            _ => "server_error",
        }
    }

    /// Whether the failover executor may try the same work on another
    /// candidate. Captcha counts as retryable: a different worker may hold a
    /// warmer session.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::Timeout
                | ErrorCode::PageClosed
                | ErrorCode::PageCrashed
                | ErrorCode::PageInvalid
                | ErrorCode::UpstreamHttp
                | ErrorCode::GenerationFailed
                | ErrorCode::Recaptcha
        )
    }

    /// Classify a raw error string surfaced by an adapter or the page layer.
    ///
    /// Adapters are contractually required to surface
    /// `"recaptcha validation failed"`, timeout strings containing `Timeout`,
    /// the `PAGE_*` markers, and upstream statuses as `HTTP <code>`.
    /// Anything unrecognised is `INTERNAL_ERROR`.
    pub fn classify(message: &str) -> ErrorCode {
        if message.contains("recaptcha validation failed") {
            return ErrorCode::Recaptcha;
        }
        if message.contains("PAGE_CLOSED") {
            return ErrorCode::PageClosed;
        }
        if message.contains("PAGE_CRASHED") {
            return ErrorCode::PageCrashed;
        }
        if message.contains("PAGE_INVALID") {
            return ErrorCode::PageInvalid;
        }
        if message.contains("Timeout") {
            return ErrorCode::Timeout;
        }
        if let Some(rest) = message
            .find("HTTP ")
            .map(|idx| &message[idx + "HTTP ".len()..])
        {
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            if digits.len() == 3 {
                return ErrorCode::UpstreamHttp;
            }
        }
        ErrorCode::InternalError
    }
}

/// The error that flows between admission, pool, worker, and transport.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct GatewayError {
    pub code: ErrorCode,
    pub message: String,
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Wrap a raw adapter/page error string, classifying it onto the taxonomy.
    pub fn classified(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            code: ErrorCode::classify(&message),
            message,
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorCode::Unauthorized, "invalid or missing bearer token")
    }

    pub fn browser_not_initialized() -> Self {
        Self::new(
            ErrorCode::BrowserNotInitialized,
            "no worker has been initialized yet",
        )
    }

    pub fn server_busy() -> Self {
        Self::new(ErrorCode::ServerBusy, "all workers are busy and the queue is full")
    }

    pub fn invalid_model(model: &str) -> Self {
        Self::new(
            ErrorCode::InvalidModel,
            format!("no worker supports model '{model}'"),
        )
    }

    pub fn image_required(model: &str) -> Self {
        Self::new(
            ErrorCode::ImageRequired,
            format!("model '{model}' requires at least one image"),
        )
    }

    pub fn image_forbidden(model: &str) -> Self {
        Self::new(
            ErrorCode::ImageForbidden,
            format!("model '{model}' does not accept images"),
        )
    }

    pub fn too_many_images(limit: usize) -> Self {
        Self::new(
            ErrorCode::TooManyImages,
            format!("request exceeds the image limit of {limit}"),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn generation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::GenerationFailed, message)
    }

    pub fn retryable(&self) -> bool {
        self.code.retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_contract_strings() {
        assert_eq!(
            ErrorCode::classify("recaptcha validation failed"),
            ErrorCode::Recaptcha
        );
        assert_eq!(
            ErrorCode::classify("Timeout waiting for upstream response"),
            ErrorCode::Timeout
        );
        assert_eq!(ErrorCode::classify("PAGE_CLOSED"), ErrorCode::PageClosed);
        assert_eq!(
            ErrorCode::classify("navigation failed: PAGE_CRASHED"),
            ErrorCode::PageCrashed
        );
        assert_eq!(ErrorCode::classify("HTTP 503"), ErrorCode::UpstreamHttp);
        assert_eq!(
            ErrorCode::classify("upstream returned HTTP 429 too many requests"),
            ErrorCode::UpstreamHttp
        );
        assert_eq!(
            ErrorCode::classify("something entirely different"),
            ErrorCode::InternalError
        );
    }

    #[test]
    fn http_not_followed_by_status_is_internal() {
        assert_eq!(ErrorCode::classify("HTTP server"), ErrorCode::InternalError);
        assert_eq!(ErrorCode::classify("HTTP 12"), ErrorCode::InternalError);
    }

    #[test]
    fn status_and_type_mapping() {
        assert_eq!(ErrorCode::Unauthorized.http_status(), 401);
        assert_eq!(ErrorCode::Unauthorized.openai_type(), "invalid_request");
        assert_eq!(ErrorCode::ServerBusy.http_status(), 429);
        assert_eq!(ErrorCode::ServerBusy.openai_type(), "rate_limit");
        assert_eq!(ErrorCode::Recaptcha.http_status(), 403);
        assert_eq!(ErrorCode::Recaptcha.openai_type(), "server_error");
        assert_eq!(ErrorCode::GenerationFailed.http_status(), 502);
        assert_eq!(ErrorCode::BrowserNotInitialized.http_status(), 503);
    }

    #[test]
    fn retryability_policy() {
        assert!(ErrorCode::Timeout.retryable());
        assert!(ErrorCode::Recaptcha.retryable());
        assert!(ErrorCode::PageInvalid.retryable());
        assert!(!ErrorCode::InvalidModel.retryable());
        assert!(!ErrorCode::ImageForbidden.retryable());
        assert!(!ErrorCode::Unauthorized.retryable());
        assert!(!ErrorCode::InternalError.retryable());
    }
}
