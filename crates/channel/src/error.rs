//! Channel error types.

use pybridge_core::RequestId;

/// Errors from the coordination channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// A response names a request that is not outstanding (never issued,
    /// already answered, or discarded with its session).
    #[error("no outstanding input request with id {request_id}")]
    UnresolvableInput {
        /// The id carried by the rejected response.
        request_id: RequestId,
    },

    /// A request was registered twice under the same id.
    #[error("input request {request_id} is already pending")]
    DuplicateRequest {
        /// The conflicting id.
        request_id: RequestId,
    },

    /// The request was dropped before a response arrived.
    #[error("input request {request_id} was discarded before it was answered")]
    Discarded {
        /// The id of the abandoned request.
        request_id: RequestId,
    },

    /// The selected transport cannot be used in this environment.
    #[error("input transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The transport failed while carrying a message.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ChannelError {
    /// Create an [`UnresolvableInput`](Self::UnresolvableInput) error.
    pub fn unresolvable(request_id: RequestId) -> Self {
        Self::UnresolvableInput { request_id }
    }

    /// Create a [`TransportUnavailable`](Self::TransportUnavailable) error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::TransportUnavailable(reason.into())
    }

    /// Whether a response was rejected because nothing was waiting for it.
    pub fn is_unresolvable(&self) -> bool {
        matches!(self, Self::UnresolvableInput { .. })
    }

    /// Whether the request was torn down without an answer.
    pub fn is_discarded(&self) -> bool {
        matches!(self, Self::Discarded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolvable_display_names_the_id() {
        let id = RequestId::parse("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let err = ChannelError::unresolvable(id);
        assert_eq!(
            err.to_string(),
            "no outstanding input request with id 550e8400-e29b-41d4-a716-446655440000"
        );
        assert!(err.is_unresolvable());
        assert!(!err.is_discarded());
    }

    #[test]
    fn unavailable_display() {
        let err = ChannelError::unavailable("prefix must not be empty");
        assert_eq!(err.to_string(), "input transport unavailable: prefix must not be empty");
    }
}
