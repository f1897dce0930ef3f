use thiserror::Error;

/// Failure talking to a payment gateway.
///
/// Every adapter operation resolves to one of these; callers only need the
/// message, the variant feeds logs and metrics.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network fault or timeout before a gateway answer was received.
    #[error("Payment gateway unreachable: {0}")]
    Transport(String),

    /// The gateway answered and refused the operation.
    #[error("Payment gateway rejected the request ({code}): {message}")]
    Rejected { code: String, message: String },

    /// The gateway answered with something we could not parse or trust.
    #[error("Invalid payment gateway response: {0}")]
    InvalidResponse(String),

    /// An inbound notification failed authenticity checks.
    #[error("Payment gateway signature verification failed: {0}")]
    SignatureMismatch(String),

    /// Local credentials or key material are unusable.
    #[error("Payment provider misconfigured: {0}")]
    Configuration(String),
}

impl GatewayError {
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Stable label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Rejected { .. } => "rejected",
            Self::InvalidResponse(_) => "invalid_response",
            Self::SignatureMismatch(_) => "signature",
            Self::Configuration(_) => "configuration",
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Transport(format!("request timed out: {}", err))
        } else if err.is_decode() {
            GatewayError::InvalidResponse(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::InvalidResponse(err.to_string())
    }
}
