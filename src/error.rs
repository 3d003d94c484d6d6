//! Error types for the relay.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RelayError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Upstream request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Upstream returned status {status}")]
    Upstream { status: u16, body: String },

    #[error("Failed to decode upstream response: {message}")]
    Decode { message: String, body: String },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RelayError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
        }
    }

    /// Raw upstream body, if a response arrived before the failure.
    #[must_use]
    pub fn raw_body(&self) -> Option<&str> {
        match self {
            Self::Upstream { body, .. } | Self::Decode { body, .. } => Some(body),
            _ => None,
        }
    }

    /// HTTP status reported by the upstream, if any.
    #[must_use]
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Transport { .. } => "transport",
            Self::Timeout { .. } => "timeout",
            Self::Upstream { .. } => "upstream",
            Self::Decode { .. } => "decode",
            Self::Toml(_) => "toml",
        }
    }

    /// Coarse `Error: <description> (<raw body>)` rendering handed to hosts
    /// that only understand a string result.
    #[must_use]
    pub fn pipe_message(&self) -> String {
        format!("Error: {} ({})", self, self.raw_body().unwrap_or(""))
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_message_includes_body() {
        let err = RelayError::Upstream {
            status: 429,
            body: r#"{"error":"rate limited"}"#.to_string(),
        };
        assert_eq!(
            err.pipe_message(),
            r#"Error: Upstream returned status 429 ({"error":"rate limited"})"#
        );
        assert_eq!(err.kind(), "upstream");
        assert_eq!(err.upstream_status(), Some(429));
    }

    #[test]
    fn test_config_errors_convert_from_toml() {
        let err: RelayError = toml::from_str::<toml::Value>("port = ")
            .map_err(RelayError::from)
            .unwrap_err();
        assert_eq!(err.kind(), "toml");
        assert!(err.raw_body().is_none());
        assert!(err.upstream_status().is_none());
    }

    #[test]
    fn test_pipe_message_without_body() {
        let err = RelayError::transport("connection refused");
        assert_eq!(err.pipe_message(), "Error: Transport error: connection refused ()");
        assert!(err.raw_body().is_none());
    }
}
