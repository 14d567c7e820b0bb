//! The seam between the execution side and the UI side.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use pybridge_core::{RequestId, SessionId};

use crate::broadcast::{Broadcaster, Subscription};
use crate::error::ChannelError;
use crate::message::{AwaitingInput, InputResponse, PendingInputRequest};
use crate::pending::PendingTable;

/// Which transport carries input requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Shared in-process pending table.
    Direct,
    /// Intercepted network request held open until answered.
    Proxied,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Proxied => write!(f, "proxied"),
        }
    }
}

/// Carries input requests out of an execution context and responses back in.
///
/// Implementations must guarantee that each request is announced once to
/// every subscriber and resolved at most once.
#[async_trait]
pub trait InputTransport: Send + Sync {
    /// Which transport this is.
    fn kind(&self) -> TransportKind;

    /// Announce `request` and wait for its value.
    ///
    /// Suspends only the calling task. Fails with
    /// [`ChannelError::Discarded`] if the request's session is torn down
    /// first.
    async fn request_input(&self, request: PendingInputRequest) -> Result<String, ChannelError>;

    /// Resolve an outstanding request.
    fn respond(&self, response: InputResponse) -> Result<(), ChannelError>;

    /// Receive `AwaitingInput` notices issued from now on.
    fn subscribe(&self) -> Subscription<AwaitingInput>;

    /// Whether `request_id` can still be answered.
    fn is_outstanding(&self, request_id: RequestId) -> bool;

    /// Forget every request of `session_id`; returns how many were dropped.
    fn discard_session(&self, session_id: SessionId) -> usize;
}

/// Shared handle to any transport.
pub type SharedTransport = Arc<dyn InputTransport>;

/// Default transport: one pending table shared by both sides.
#[derive(Debug, Default)]
pub struct DirectTransport {
    table: PendingTable,
    notices: Broadcaster<AwaitingInput>,
}

impl DirectTransport {
    /// Create a transport with an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying pending table.
    pub fn table(&self) -> &PendingTable {
        &self.table
    }
}

/// Removes an abandoned request when the waiting future is dropped.
struct Unregister<'a> {
    table: &'a PendingTable,
    request: &'a PendingInputRequest,
}

impl Drop for Unregister<'_> {
    fn drop(&mut self) {
        self.table.remove(self.request.request_id);
    }
}

#[async_trait]
impl InputTransport for DirectTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Direct
    }

    async fn request_input(&self, request: PendingInputRequest) -> Result<String, ChannelError> {
        let receiver = self.table.register(request.clone())?;
        let _unregister = Unregister {
            table: &self.table,
            request: &request,
        };
        self.notices.emit(request.awaiting());

        receiver.await.map_err(|_| ChannelError::Discarded {
            request_id: request.request_id,
        })
    }

    fn respond(&self, response: InputResponse) -> Result<(), ChannelError> {
        self.table.resolve(response.request_id, response.value).map(|_| ())
    }

    fn subscribe(&self) -> Subscription<AwaitingInput> {
        self.notices.subscribe()
    }

    fn is_outstanding(&self, request_id: RequestId) -> bool {
        self.table.is_outstanding(request_id)
    }

    fn discard_session(&self, session_id: SessionId) -> usize {
        self.table.discard_session(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn transport_is_object_safe() {
        fn assert_object_safe(_: &dyn InputTransport) {}
        assert_object_safe(&DirectTransport::new());
    }

    #[tokio::test]
    async fn request_is_announced_then_resolved() {
        let transport = Arc::new(DirectTransport::new());
        let mut notices = transport.subscribe();
        let session = SessionId::v4();

        let waiter = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                transport
                    .request_input(PendingInputRequest::new(session, "Enter name: "))
                    .await
            })
        };

        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.prompt, "Enter name: ");
        assert_eq!(notice.session_id, session);
        assert!(transport.is_outstanding(notice.request_id));

        transport
            .respond(InputResponse {
                request_id: notice.request_id,
                value: "Ada".into(),
            })
            .unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), "Ada");
        assert!(!transport.is_outstanding(notice.request_id));

        let again = transport.respond(InputResponse {
            request_id: notice.request_id,
            value: "Bob".into(),
        });
        assert!(again.unwrap_err().is_unresolvable());
    }

    #[tokio::test]
    async fn discarded_session_fails_the_waiter() {
        let transport = Arc::new(DirectTransport::new());
        let mut notices = transport.subscribe();
        let session = SessionId::v4();

        let waiter = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                transport
                    .request_input(PendingInputRequest::new(session, ""))
                    .await
            })
        };
        let notice = notices.recv().await.unwrap();

        assert_eq!(transport.discard_session(session), 1);
        assert!(waiter.await.unwrap().unwrap_err().is_discarded());
        assert!(
            transport
                .respond(InputResponse {
                    request_id: notice.request_id,
                    value: "late".into()
                })
                .unwrap_err()
                .is_unresolvable()
        );
    }

    #[tokio::test]
    async fn aborted_waiter_leaves_nothing_behind() {
        let transport = Arc::new(DirectTransport::new());
        let mut notices = transport.subscribe();

        let waiter = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                transport
                    .request_input(PendingInputRequest::new(SessionId::v4(), ""))
                    .await
            })
        };
        notices.recv().await.unwrap();
        assert_eq!(transport.table().len(), 1);

        waiter.abort();
        let _ = waiter.await;
        assert!(transport.table().is_empty());
    }

    #[test]
    fn kind_display() {
        assert_eq!(TransportKind::Direct.to_string(), "direct");
        assert_eq!(TransportKind::Proxied.to_string(), "proxied");
    }
}
