//! The intercepting proxy context.
//!
//! Sits between an execution context and the network. A `GET` to the
//! reserved input route is never forwarded: the context announces the prompt
//! to every window subscriber and answers with a [`PausedResponse`] that
//! completes only when a matching `InputResponse` is posted back.
//!
//! ```text
//! execution ──GET /{prefix}-get-input/?id=…──► InterceptContext ──AwaitingInput──► windows
//!     ▲                                              │  ▲
//!     └──────────── 200 value ◄──────── waiter ──────┘  └──── InputResponse { id, value }
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use http::{Request, Response, StatusCode};
use pybridge_channel::{AwaitingInput, Broadcaster, ChannelError, CoordinationMessage, Subscription};
use pybridge_core::{RequestId, SessionId};
use tokio::sync::oneshot;

use crate::error::ProxyError;
use crate::route::InputRoute;

struct Waiter {
    session_id: SessionId,
    responder: oneshot::Sender<String>,
}

/// Outcome of offering a request to the intercept context.
#[derive(Debug)]
pub enum Intercepted {
    /// Not the reserved route; forward unchanged.
    PassThrough(Request<()>),
    /// Held open until the matching response is posted.
    Respond(PausedResponse),
    /// The reserved route was hit with unusable parameters.
    Rejected(Response<String>),
}

/// A response that completes once its request is answered.
///
/// Resolves to `200 OK` with the value as body, or `503 Service Unavailable`
/// if the request is discarded first.
#[derive(Debug)]
pub struct PausedResponse {
    request_id: RequestId,
    receiver: oneshot::Receiver<String>,
}

impl PausedResponse {
    /// Id of the request this response waits on.
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }
}

impl Future for PausedResponse {
    type Output = Response<String>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|result| match result {
            Ok(value) => Response::new(value),
            Err(_) => status_response(StatusCode::SERVICE_UNAVAILABLE, String::new()),
        })
    }
}

fn status_response(status: StatusCode, body: String) -> Response<String> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

/// Resolver of proxied input requests.
///
/// Waiters are queued per `request_id` in arrival order; each
/// `InputResponse` releases the oldest live waiter for its id. A fresh
/// context starts with no waiters, so nothing leaks across restarts.
pub struct InterceptContext {
    route: InputRoute,
    waiters: DashMap<RequestId, VecDeque<Waiter>>,
    window: Broadcaster<AwaitingInput>,
}

impl std::fmt::Debug for InterceptContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptContext")
            .field("route", &self.route)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl InterceptContext {
    /// Install a context intercepting `/{prefix}-get-input/`.
    pub fn install(prefix: impl Into<String>) -> Result<Arc<Self>, ProxyError> {
        let route = InputRoute::new(prefix)?;
        tracing::info!(path = route.path(), "input intercept installed");
        Ok(Arc::new(Self {
            route,
            waiters: DashMap::new(),
            window: Broadcaster::default(),
        }))
    }

    /// The reserved route.
    pub fn route(&self) -> &InputRoute {
        &self.route
    }

    /// Offer an outgoing request.
    pub fn fetch(&self, request: Request<()>) -> Intercepted {
        if !self.route.matches(request.method(), request.uri()) {
            return Intercepted::PassThrough(request);
        }

        let params = match self.route.params(request.uri()) {
            Ok(params) => params,
            Err(e) => {
                tracing::warn!(uri = %request.uri(), error = %e, "rejecting input request");
                return Intercepted::Rejected(status_response(StatusCode::BAD_REQUEST, e.to_string()));
            }
        };

        let (responder, receiver) = oneshot::channel();
        self.waiters
            .entry(params.request_id)
            .or_default()
            .push_back(Waiter {
                session_id: params.session_id,
                responder,
            });

        tracing::debug!(request_id = %params.request_id, "input request intercepted");
        self.window.emit(AwaitingInput {
            session_id: params.session_id,
            request_id: params.request_id,
            prompt: params.prompt,
        });

        Intercepted::Respond(PausedResponse {
            request_id: params.request_id,
            receiver,
        })
    }

    /// Deliver a message from a window.
    ///
    /// Only `InputResponse` has an effect. A response with no live waiter
    /// is logged and rejected without touching anything else.
    pub fn post_message(&self, message: CoordinationMessage) -> Result<(), ProxyError> {
        let CoordinationMessage::InputResponse(response) = message else {
            tracing::trace!(kind = message.kind(), "ignoring non-response message");
            return Ok(());
        };
        let request_id = response.request_id;

        let mut delivered = false;
        if let Some(mut queue) = self.waiters.get_mut(&request_id) {
            let mut value = response.value;
            // Waiters whose paused response was dropped are skipped.
            while let Some(waiter) = queue.pop_front() {
                match waiter.responder.send(value) {
                    Ok(()) => {
                        delivered = true;
                        break;
                    }
                    Err(returned) => value = returned,
                }
            }
        }
        self.waiters.remove_if(&request_id, |_, queue| queue.is_empty());

        if delivered {
            tracing::debug!(%request_id, "input request resolved");
            Ok(())
        } else {
            tracing::error!(%request_id, "error handling input: no waiting request");
            Err(ChannelError::unresolvable(request_id).into())
        }
    }

    /// Drop every waiter of `session_id`; their responses complete with `503`.
    pub fn discard_session(&self, session_id: SessionId) -> usize {
        let mut discarded = 0;
        self.waiters.retain(|_, queue| {
            let before = queue.len();
            queue.retain(|waiter| waiter.session_id != session_id);
            discarded += before - queue.len();
            !queue.is_empty()
        });
        discarded
    }

    /// Whether a live paused response waits on `request_id`.
    pub fn is_waiting(&self, request_id: RequestId) -> bool {
        self.waiters.get(&request_id).is_some_and(|queue| {
            queue.iter().any(|waiter| !waiter.responder.is_closed())
        })
    }

    /// Receive `AwaitingInput` broadcasts from now on.
    pub fn subscribe_window(&self) -> Subscription<AwaitingInput> {
        self.window.subscribe()
    }

    /// Number of paused responses.
    pub fn pending_count(&self) -> usize {
        self.waiters.iter().map(|entry| entry.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pybridge_channel::{InputResponse, PendingInputRequest};
    use pretty_assertions::assert_eq;
    use url::Url;

    fn input_request(ctx: &InterceptContext, request: &PendingInputRequest) -> Request<()> {
        let base = Url::parse("http://localhost/").unwrap();
        let url = ctx.route().request_url(&base, request).unwrap();
        Request::get(url.as_str()).body(()).unwrap()
    }

    fn paused(intercepted: Intercepted) -> PausedResponse {
        match intercepted {
            Intercepted::Respond(paused) => paused,
            other => panic!("expected a paused response, got {other:?}"),
        }
    }

    fn response(request_id: RequestId, value: &str) -> CoordinationMessage {
        InputResponse {
            request_id,
            value: value.into(),
        }
        .into()
    }

    #[tokio::test]
    async fn other_requests_pass_through() {
        let ctx = InterceptContext::install("pybridge").unwrap();
        let request = Request::get("http://localhost/index.html").body(()).unwrap();
        assert!(matches!(ctx.fetch(request), Intercepted::PassThrough(_)));
        assert_eq!(ctx.pending_count(), 0);
    }

    #[tokio::test]
    async fn response_releases_paused_request() {
        let ctx = InterceptContext::install("pybridge").unwrap();
        let mut window = ctx.subscribe_window();
        let request = PendingInputRequest::new(SessionId::v4(), "Enter name: ");

        let paused = paused(ctx.fetch(input_request(&ctx, &request)));
        let notice = window.try_recv().unwrap();
        assert_eq!(notice.request_id, request.request_id);
        assert_eq!(notice.prompt, "Enter name: ");
        assert_eq!(notice.session_id, request.session_id);

        assert!(ctx.is_waiting(request.request_id));
        ctx.post_message(response(request.request_id, "Ada")).unwrap();
        assert!(!ctx.is_waiting(request.request_id));
        let reply = paused.await;
        assert_eq!(reply.status(), StatusCode::OK);
        assert_eq!(reply.body(), "Ada");
        assert_eq!(ctx.pending_count(), 0);
    }

    #[tokio::test]
    async fn only_first_response_is_honored() {
        let ctx = InterceptContext::install("pybridge").unwrap();
        let request = PendingInputRequest::new(SessionId::v4(), "");
        let paused = paused(ctx.fetch(input_request(&ctx, &request)));

        ctx.post_message(response(request.request_id, "one")).unwrap();
        let second = ctx.post_message(response(request.request_id, "two"));
        assert!(matches!(
            second,
            Err(ProxyError::Channel(ChannelError::UnresolvableInput { .. }))
        ));
        assert_eq!(paused.await.body(), "one");
    }

    #[tokio::test]
    async fn waiters_for_one_id_are_released_in_order() {
        let ctx = InterceptContext::install("pybridge").unwrap();
        let request = PendingInputRequest::new(SessionId::v4(), "");
        let first = paused(ctx.fetch(input_request(&ctx, &request)));
        let second = paused(ctx.fetch(input_request(&ctx, &request)));
        assert_eq!(ctx.pending_count(), 2);

        ctx.post_message(response(request.request_id, "a")).unwrap();
        ctx.post_message(response(request.request_id, "b")).unwrap();
        assert_eq!(first.await.body(), "a");
        assert_eq!(second.await.body(), "b");
    }

    #[tokio::test]
    async fn every_window_is_notified_once() {
        let ctx = InterceptContext::install("pybridge").unwrap();
        let mut a = ctx.subscribe_window();
        let mut b = ctx.subscribe_window();
        let request = PendingInputRequest::new(SessionId::v4(), "?");
        let _paused = paused(ctx.fetch(input_request(&ctx, &request)));

        for window in [&mut a, &mut b] {
            assert_eq!(window.try_recv().map(|n| n.request_id), Some(request.request_id));
            assert_eq!(window.try_recv(), None);
        }
    }

    #[tokio::test]
    async fn discarded_session_completes_with_unavailable() {
        let ctx = InterceptContext::install("pybridge").unwrap();
        let request = PendingInputRequest::new(SessionId::v4(), "");
        let paused = paused(ctx.fetch(input_request(&ctx, &request)));

        assert_eq!(ctx.discard_session(request.session_id), 1);
        assert_eq!(paused.await.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(ctx.post_message(response(request.request_id, "late")).is_err());
    }

    #[tokio::test]
    async fn dropped_paused_response_is_skipped() {
        let ctx = InterceptContext::install("pybridge").unwrap();
        let request = PendingInputRequest::new(SessionId::v4(), "");
        drop(paused(ctx.fetch(input_request(&ctx, &request))));
        assert!(!ctx.is_waiting(request.request_id));
        let live = paused(ctx.fetch(input_request(&ctx, &request)));

        ctx.post_message(response(request.request_id, "v")).unwrap();
        assert_eq!(live.await.body(), "v");
    }

    #[tokio::test]
    async fn fresh_context_starts_empty() {
        let old = InterceptContext::install("pybridge").unwrap();
        let request = PendingInputRequest::new(SessionId::v4(), "");
        let _paused = paused(old.fetch(input_request(&old, &request)));

        let fresh = InterceptContext::install("pybridge").unwrap();
        assert_eq!(fresh.pending_count(), 0);
        assert!(fresh.post_message(response(request.request_id, "x")).is_err());
    }

    #[test]
    fn malformed_reserved_request_is_rejected() {
        let ctx = InterceptContext::install("pybridge").unwrap();
        let request = Request::get("http://localhost/pybridge-get-input/?prompt=x")
            .body(())
            .unwrap();
        match ctx.fetch(request) {
            Intercepted::Rejected(reply) => assert_eq!(reply.status(), StatusCode::BAD_REQUEST),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn non_response_messages_are_ignored() {
        let ctx = InterceptContext::install("pybridge").unwrap();
        let ready = CoordinationMessage::Ready(pybridge_channel::Ready {
            session_id: SessionId::v4(),
            interpreter_version: "3.12".into(),
        });
        assert!(ctx.post_message(ready).is_ok());
    }
}
