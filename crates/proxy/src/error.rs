//! Proxy error types.

use pybridge_channel::ChannelError;

/// Errors from the intercept context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    /// The configured path prefix cannot form a reserved route.
    #[error("invalid intercept prefix {prefix:?}: {reason}")]
    InvalidPrefix {
        /// Prefix as configured.
        prefix: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A request hit the reserved route without the required parameters.
    #[error("malformed input request: {0}")]
    BadRequest(String),

    /// The channel rejected the message.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl ProxyError {
    /// Create a [`BadRequest`](Self::BadRequest) error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }
}

impl From<ProxyError> for ChannelError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::Channel(inner) => inner,
            ProxyError::InvalidPrefix { .. } => ChannelError::unavailable(err.to_string()),
            ProxyError::BadRequest(message) => ChannelError::Transport(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pybridge_core::RequestId;

    #[test]
    fn invalid_prefix_becomes_transport_unavailable() {
        let err = ProxyError::InvalidPrefix {
            prefix: String::new(),
            reason: "must not be empty",
        };
        let channel: ChannelError = err.into();
        assert!(matches!(channel, ChannelError::TransportUnavailable(_)));
    }

    #[test]
    fn channel_errors_pass_through() {
        let id = RequestId::v4();
        let channel: ChannelError = ProxyError::from(ChannelError::unresolvable(id)).into();
        assert_eq!(channel, ChannelError::unresolvable(id));
    }
}
