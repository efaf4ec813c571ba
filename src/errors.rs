use thiserror::Error;

/// Core error taxonomy.
///
/// Validation errors are rejected at the router boundary and never reach a
/// strategy. Config errors degrade the affected bot to a logged no-op.
/// Exchange errors propagate through the strategy call and are caught at
/// the router's per-bot loop, except the "position already closed"
/// condition which callers treat as a successful idempotent close.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("invalid alert: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("exchange error: {message}")]
    Exchange {
        code: Option<String>,
        message: String,
    },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl BotError {
    pub fn exchange(code: Option<String>, message: impl Into<String>) -> Self {
        BotError::Exchange {
            code,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        BotError::Validation(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        BotError::Config(message.into())
    }

    /// Recognizes the exchange's "no position to close" family of failures.
    /// Closing a position that is already flat on the exchange is success.
    pub fn is_position_already_closed(&self) -> bool {
        match self {
            BotError::Exchange { code, message } => {
                if code.as_deref() == Some("22002") {
                    return true;
                }
                let msg = message.to_lowercase();
                msg.contains("no position to close") || msg.contains("position not found")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_closed_recognizer() {
        assert!(BotError::exchange(Some("22002".into()), "whatever")
            .is_position_already_closed());
        assert!(BotError::exchange(None, "No position to close for BTCUSDT")
            .is_position_already_closed());
        assert!(BotError::exchange(None, "Position not found")
            .is_position_already_closed());
        assert!(!BotError::exchange(Some("40001".into()), "insufficient margin")
            .is_position_already_closed());
        assert!(!BotError::validation("bad payload").is_position_already_closed());
    }
}
