// ABOUTME: Error types for escape-airlock
// ABOUTME: Separates transport, protocol, stream, and lifecycle failures

use thiserror::Error;

/// Errors that can occur in airlock operations
#[derive(Debug, Clone, Error)]
pub enum AirlockError {
    /// The request never produced a response (connect, TLS, body read).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The ship answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Encoding error: {0}")]
    Encode(String),

    /// The ship rejected a poke with an err frame.
    #[error("Poke failed: {0}")]
    Poke(String),

    /// The ship rejected a subscription with an err frame.
    #[error("Subscription failed: {0}")]
    Subscription(String),

    #[error("Subscription quit before delivering a fact")]
    SubscriptionQuit,

    #[error("Timed out waiting for a fact")]
    Timeout,

    #[error("Must supply desk to run thread from")]
    MissingDesk,

    /// The channel was reset while the operation was outstanding.
    #[error("Channel was reset")]
    ChannelReset,

    /// The request was cancelled by a channel reset.
    #[error("Request cancelled")]
    Cancelled,

    /// The event stream is unusable until the channel is reset.
    #[error("Event stream failed: {0}")]
    StreamFatal(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl AirlockError {
    /// True for failures that happened before or on the wire rather than in the protocol.
    pub fn is_transport(&self) -> bool {
        matches!(self, AirlockError::Transport(_) | AirlockError::Http { .. })
    }
}

impl From<reqwest::Error> for AirlockError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => AirlockError::Http {
                status: status.as_u16(),
                body: err.to_string(),
            },
            None => AirlockError::Transport(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AirlockError {
    fn from(err: serde_json::Error) -> Self {
        AirlockError::Encode(err.to_string())
    }
}

impl From<url::ParseError> for AirlockError {
    fn from(err: url::ParseError) -> Self {
        AirlockError::InvalidUrl(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_http() {
        let err = AirlockError::Http {
            status: 403,
            body: "forbidden".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 403: forbidden");
    }

    #[test]
    fn test_display_poke() {
        let err = AirlockError::Poke("bad mark".to_string());
        let display = format!("{}", err);
        assert!(display.contains("Poke failed"));
        assert!(display.contains("bad mark"));
    }

    #[test]
    fn test_display_missing_desk() {
        assert_eq!(
            AirlockError::MissingDesk.to_string(),
            "Must supply desk to run thread from"
        );
    }

    #[test]
    fn test_timeout_is_distinct_from_quit() {
        let timeout = AirlockError::Timeout;
        let quit = AirlockError::SubscriptionQuit;
        assert_ne!(timeout.to_string(), quit.to_string());
        assert!(matches!(timeout, AirlockError::Timeout));
    }

    #[test]
    fn test_is_transport() {
        assert!(AirlockError::Transport("refused".into()).is_transport());
        assert!(AirlockError::Http {
            status: 500,
            body: String::new()
        }
        .is_transport());
        assert!(!AirlockError::Poke("nope".into()).is_transport());
        assert!(!AirlockError::StreamFatal("closed".into()).is_transport());
    }

    #[test]
    fn test_from_serde_json_error() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: AirlockError = err.into();
        assert!(matches!(err, AirlockError::Encode(_)));
    }

    #[test]
    fn test_from_url_parse_error() {
        let err = url::Url::parse("not a url").unwrap_err();
        let err: AirlockError = err.into();
        assert!(matches!(err, AirlockError::InvalidUrl(_)));
    }
}
