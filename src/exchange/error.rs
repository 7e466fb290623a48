use std::time::Duration;

/// Failure reported by, or while talking to, an exchange.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ExchangeError {
    /// The request never reached the exchange.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The transport failed after the request was sent.
    #[error("HTTP error: {0}")]
    Http(String),

    /// No response arrived in time. The request may or may not have been executed.
    #[error("Request timed out")]
    Timeout,

    /// Too many requests; the exchange did not execute this one.
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Delay suggested by the exchange, if any.
        retry_after: Option<Duration>,
    },

    /// The exchange answered with a 5xx status.
    #[error("Server error {status}: {body}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// The exchange refused the request.
    #[error("Rejected ({code}): {msg}")]
    Rejected {
        /// Exchange error code.
        code: i64,
        /// Exchange error message.
        msg: String,
    },

    /// An order was accepted but nothing was executed.
    #[error("Order not filled: {0}")]
    Unfilled(String),

    /// The exchange does not list the symbol.
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    /// The response could not be understood.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl ExchangeError {
    /// True for failures worth retrying on an idempotent request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Http(_) | Self::Timeout | Self::RateLimited { .. } | Self::Server { .. }
        )
    }

    /// True only when the order certainly was not executed, so resubmitting cannot double it.
    pub fn is_retryable_for_order(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::RateLimited { .. })
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Http(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

#[cfg(test)]
#[test]
fn order_retry_is_stricter() {
    let errors = [
        ExchangeError::Connect("refused".into()),
        ExchangeError::Http("reset".into()),
        ExchangeError::Timeout,
        ExchangeError::RateLimited { retry_after: None },
        ExchangeError::Server {
            status: 503,
            body: String::new(),
        },
        ExchangeError::Rejected {
            code: -2019,
            msg: "Margin is insufficient.".into(),
        },
        ExchangeError::Unfilled("EXPIRED".into()),
    ];
    let retryable = errors.iter().filter(|e| e.is_retryable()).count();
    let order_safe = errors.iter().filter(|e| e.is_retryable_for_order()).count();
    assert_eq!(retryable, 5);
    assert_eq!(order_safe, 2);
    for e in &errors {
        // anything safe to resubmit is also retryable in general
        assert!(!e.is_retryable_for_order() || e.is_retryable());
    }
}
