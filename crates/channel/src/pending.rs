//! The authoritative table of outstanding input requests.

use indexmap::IndexMap;
use parking_lot::Mutex;
use pybridge_core::{RequestId, SessionId};
use tokio::sync::oneshot;

use crate::error::ChannelError;
use crate::message::PendingInputRequest;

struct PendingEntry {
    request: PendingInputRequest,
    responder: oneshot::Sender<String>,
}

/// Requests waiting for exactly one response, keyed by `request_id`.
///
/// Resolving removes the entry, so a second response for the same id finds
/// nothing and fails with [`ChannelError::UnresolvableInput`].
#[derive(Default)]
pub struct PendingTable {
    entries: Mutex<IndexMap<RequestId, PendingEntry>>,
}

impl std::fmt::Debug for PendingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTable")
            .field("outstanding", &self.len())
            .finish()
    }
}

impl PendingTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request; the receiver yields the value once resolved.
    pub fn register(
        &self,
        request: PendingInputRequest,
    ) -> Result<oneshot::Receiver<String>, ChannelError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&request.request_id) {
            return Err(ChannelError::DuplicateRequest {
                request_id: request.request_id,
            });
        }
        let (responder, receiver) = oneshot::channel();
        tracing::debug!(
            request_id = %request.request_id,
            session_id = %request.session_id,
            "input request registered"
        );
        entries.insert(request.request_id, PendingEntry { request, responder });
        Ok(receiver)
    }

    /// Deliver `value` to the request and forget it.
    pub fn resolve(
        &self,
        request_id: RequestId,
        value: String,
    ) -> Result<PendingInputRequest, ChannelError> {
        let entry = self
            .entries
            .lock()
            .shift_remove(&request_id)
            .ok_or(ChannelError::UnresolvableInput { request_id })?;

        entry
            .responder
            .send(value)
            .map_err(|_| ChannelError::Discarded { request_id })?;
        tracing::debug!(%request_id, "input request resolved");
        Ok(entry.request)
    }

    /// Drop a single request without resolving it.
    pub fn remove(&self, request_id: RequestId) -> Option<PendingInputRequest> {
        self.entries
            .lock()
            .shift_remove(&request_id)
            .map(|entry| entry.request)
    }

    /// Drop every request of `session_id`; their waiters observe
    /// [`ChannelError::Discarded`].
    pub fn discard_session(&self, session_id: SessionId) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.request.session_id != session_id);
        let discarded = before - entries.len();
        if discarded > 0 {
            tracing::debug!(%session_id, discarded, "pending input requests discarded");
        }
        discarded
    }

    /// Snapshot of outstanding requests, oldest first.
    pub fn outstanding(&self) -> Vec<PendingInputRequest> {
        self.entries
            .lock()
            .values()
            .map(|entry| entry.request.clone())
            .collect()
    }

    /// Whether `request_id` is waiting for a response.
    pub fn is_outstanding(&self, request_id: RequestId) -> bool {
        self.entries.lock().contains_key(&request_id)
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn resolve_delivers_value_once() {
        let table = PendingTable::new();
        let request = PendingInputRequest::new(SessionId::v4(), "Enter name: ");
        let id = request.request_id;
        let rx = table.register(request).unwrap();

        let resolved = table.resolve(id, "Ada".into()).unwrap();
        assert_eq!(resolved.prompt, "Enter name: ");
        assert_eq!(rx.await.unwrap(), "Ada");

        let second = table.resolve(id, "Bob".into()).unwrap_err();
        assert_eq!(second, ChannelError::UnresolvableInput { request_id: id });
        assert!(table.is_empty());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let table = PendingTable::new();
        let request = PendingInputRequest::new(SessionId::v4(), "");
        let _rx = table.register(request.clone()).unwrap();
        assert!(matches!(
            table.register(request),
            Err(ChannelError::DuplicateRequest { .. })
        ));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn unknown_id_is_unresolvable() {
        let table = PendingTable::new();
        let err = table.resolve(RequestId::v4(), "x".into()).unwrap_err();
        assert!(err.is_unresolvable());
    }

    #[tokio::test]
    async fn discard_session_only_touches_that_session() {
        let table = PendingTable::new();
        let old = SessionId::v4();
        let live = SessionId::v4();
        let stale = PendingInputRequest::new(old, "a");
        let kept = PendingInputRequest::new(live, "b");
        let stale_id = stale.request_id;
        let stale_rx = table.register(stale).unwrap();
        let _kept_rx = table.register(kept.clone()).unwrap();

        assert_eq!(table.discard_session(old), 1);
        assert!(stale_rx.await.is_err());
        assert!(!table.is_outstanding(stale_id));
        assert!(table.is_outstanding(kept.request_id));
        assert!(table.resolve(stale_id, "late".into()).unwrap_err().is_unresolvable());
    }

    #[test]
    fn dropped_waiter_reports_discarded() {
        let table = PendingTable::new();
        let request = PendingInputRequest::new(SessionId::v4(), "");
        let id = request.request_id;
        drop(table.register(request).unwrap());
        assert!(table.resolve(id, "v".into()).unwrap_err().is_discarded());
    }

    #[test]
    fn outstanding_is_in_issue_order() {
        let table = PendingTable::new();
        let session = SessionId::v4();
        let first = PendingInputRequest::new(session, "1");
        let second = PendingInputRequest::new(session, "2");
        let _a = table.register(first.clone()).unwrap();
        let _b = table.register(second.clone()).unwrap();
        let prompts: Vec<_> = table.outstanding().into_iter().map(|r| r.prompt).collect();
        assert_eq!(prompts, vec!["1", "2"]);
    }
}
