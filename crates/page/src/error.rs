use tabgate_core_types::{ErrorCode, GatewayError};
use thiserror::Error;

/// High-level failure categories surfaced by the page layer.
///
/// Display output is the contract string the error classifier matches on
/// (`PAGE_CLOSED`, strings containing `Timeout`, …), so these errors can
/// cross the adapter boundary as plain messages without losing their class.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum PageErrorKind {
    #[error("PAGE_CLOSED")]
    Closed,
    #[error("PAGE_CRASHED")]
    Crashed,
    #[error("PAGE_INVALID")]
    Invalid,
    #[error("Timeout: navigation did not settle")]
    NavTimeout,
    #[error("Timeout: upload confirmation did not arrive")]
    UploadTimeout,
    #[error("Timeout: upstream response did not arrive")]
    ResponseTimeout,
    #[error("cdp i/o failure")]
    CdpIo,
    #[error("internal page error")]
    Internal,
}

#[derive(Clone, Debug, Error)]
pub struct PageError {
    pub kind: PageErrorKind,
    pub hint: Option<String>,
}

pub type PageResult<T> = Result<T, PageError>;

impl PageError {
    pub fn new(kind: PageErrorKind) -> Self {
        Self { kind, hint: None }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn retriable(&self) -> bool {
        !matches!(self.kind, PageErrorKind::Internal)
    }
}

impl std::fmt::Display for PageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {hint}")?;
        }
        Ok(())
    }
}

impl From<PageError> for GatewayError {
    fn from(err: PageError) -> Self {
        let code = match err.kind {
            PageErrorKind::Closed => ErrorCode::PageClosed,
            PageErrorKind::Crashed => ErrorCode::PageCrashed,
            PageErrorKind::Invalid => ErrorCode::PageInvalid,
            PageErrorKind::NavTimeout
            | PageErrorKind::UploadTimeout
            | PageErrorKind::ResponseTimeout => ErrorCode::Timeout,
            PageErrorKind::CdpIo => ErrorCode::GenerationFailed,
            PageErrorKind::Internal => ErrorCode::InternalError,
        };
        GatewayError::new(code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabgate_core_types::ErrorCode;

    #[test]
    fn display_matches_classifier_contract() {
        let err = PageError::new(PageErrorKind::Closed);
        assert_eq!(ErrorCode::classify(&err.to_string()), ErrorCode::PageClosed);

        let err = PageError::new(PageErrorKind::ResponseTimeout).with_hint("chat.example.com");
        assert_eq!(ErrorCode::classify(&err.to_string()), ErrorCode::Timeout);
    }

    #[test]
    fn conversion_keeps_the_kind() {
        let gw: GatewayError = PageError::new(PageErrorKind::Crashed).into();
        assert_eq!(gw.code, ErrorCode::PageCrashed);
        let gw: GatewayError = PageError::new(PageErrorKind::NavTimeout).into();
        assert_eq!(gw.code, ErrorCode::Timeout);
    }
}
