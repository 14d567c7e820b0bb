//! [`InputTransport`] over an [`InterceptContext`].

use std::sync::Arc;

use async_trait::async_trait;
use http::{Request, StatusCode};
use pybridge_channel::{
    AwaitingInput, ChannelError, InputResponse, InputTransport, PendingInputRequest, Subscription,
    TransportKind,
};
use pybridge_core::{RequestId, SessionId};
use url::Url;

use crate::error::ProxyError;
use crate::intercept::{InterceptContext, Intercepted};

/// Origin used when none is given.
pub const DEFAULT_ORIGIN: &str = "http://localhost/";

/// Issues input requests as `GET`s to the reserved route and awaits the
/// paused response.
#[derive(Debug, Clone)]
pub struct ProxyTransport {
    context: Arc<InterceptContext>,
    origin: Url,
}

impl ProxyTransport {
    /// Install a fresh intercept context for `prefix`, issuing requests
    /// against [`DEFAULT_ORIGIN`].
    pub fn install(prefix: impl Into<String>) -> Result<Self, ProxyError> {
        let origin = Url::parse(DEFAULT_ORIGIN)
            .map_err(|e| ProxyError::bad_request(format!("bad origin {DEFAULT_ORIGIN}: {e}")))?;
        Ok(Self::new(InterceptContext::install(prefix)?, origin))
    }

    /// Talk through an existing context.
    pub fn new(context: Arc<InterceptContext>, origin: Url) -> Self {
        Self { context, origin }
    }

    /// Issue requests against `origin` instead.
    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = origin;
        self
    }

    /// The intercept context answering requests.
    pub fn context(&self) -> &Arc<InterceptContext> {
        &self.context
    }
}

#[async_trait]
impl InputTransport for ProxyTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Proxied
    }

    async fn request_input(&self, request: PendingInputRequest) -> Result<String, ChannelError> {
        let url = self.context.route().request_url(&self.origin, &request)?;
        let outgoing = Request::get(url.as_str())
            .body(())
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        match self.context.fetch(outgoing) {
            Intercepted::Respond(paused) => {
                let reply = paused.await;
                if reply.status() == StatusCode::OK {
                    Ok(reply.into_body())
                } else {
                    Err(ChannelError::Discarded {
                        request_id: request.request_id,
                    })
                }
            }
            Intercepted::Rejected(reply) => Err(ChannelError::Transport(reply.into_body())),
            Intercepted::PassThrough(_) => Err(ChannelError::Transport(format!(
                "input request to {url} was not intercepted"
            ))),
        }
    }

    fn respond(&self, response: InputResponse) -> Result<(), ChannelError> {
        self.context
            .post_message(response.into())
            .map_err(ChannelError::from)
    }

    fn subscribe(&self) -> Subscription<AwaitingInput> {
        self.context.subscribe_window()
    }

    fn is_outstanding(&self, request_id: RequestId) -> bool {
        self.context.is_waiting(request_id)
    }

    fn discard_session(&self, session_id: SessionId) -> usize {
        self.context.discard_session(session_id)
    }
}
