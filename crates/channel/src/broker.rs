//! UI-side Input Broker.
//!
//! Tracks which requests are waiting for a value and forwards the user's
//! answer back over the transport.
//!
//! ```text
//! execution context        transport             InputBroker            UI
//!        │ request_input       │                      │                  │
//!        ├────────────────────►│ AwaitingInput        │                  │
//!        │                     ├─────────────────────►│ prompt           │
//!        │                     │                      ├─────────────────►│
//!        │                     │                      │   submit(id, v)  │
//!        │                     │ InputResponse        │◄─────────────────┤
//!        │       value         │◄─────────────────────┤                  │
//!        │◄────────────────────┤                      │                  │
//! ```

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use pybridge_core::{RequestId, SessionId};
use tokio::task::JoinHandle;

use crate::broadcast::{Broadcaster, Subscription};
use crate::error::ChannelError;
use crate::message::{AwaitingInput, InputResponse};
use crate::transport::SharedTransport;

/// Outstanding prompts as seen by the UI.
///
/// The transport stays authoritative: any window may answer a request
/// through it directly, so every read first drops entries the transport no
/// longer holds.
pub struct InputBroker {
    transport: SharedTransport,
    outstanding: Mutex<IndexMap<RequestId, AwaitingInput>>,
    notices: Broadcaster<AwaitingInput>,
}

impl std::fmt::Debug for InputBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputBroker")
            .field("transport", &self.transport.kind())
            .field("outstanding", &self.outstanding.lock().len())
            .finish_non_exhaustive()
    }
}

impl InputBroker {
    /// Create a broker answering through `transport`.
    ///
    /// The broker sees nothing until [`attach`](Self::attach) is called or
    /// notices are fed to [`observe`](Self::observe).
    pub fn new(transport: SharedTransport) -> Self {
        Self {
            transport,
            outstanding: Mutex::new(IndexMap::new()),
            notices: Broadcaster::default(),
        }
    }

    /// Listen to the transport's notices on a background task.
    ///
    /// The subscription is taken before this returns, so no notice issued
    /// afterwards is missed. The task stops once the broker is dropped.
    pub fn attach(self: &Arc<Self>) -> JoinHandle<()> {
        let mut subscription = self.transport.subscribe();
        let broker: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(notice) = subscription.recv().await {
                let Some(broker) = broker.upgrade() else {
                    break;
                };
                broker.observe(notice);
            }
            tracing::debug!("input broker detached");
        })
    }

    /// Record an `AwaitingInput` notice.
    ///
    /// Notices the transport can no longer answer (discarded sessions,
    /// requests already resolved elsewhere) and repeats of a known id are
    /// ignored.
    pub fn observe(&self, notice: AwaitingInput) {
        {
            let mut outstanding = self.outstanding.lock();
            if outstanding.contains_key(&notice.request_id) {
                return;
            }
            if !self.transport.is_outstanding(notice.request_id) {
                tracing::debug!(
                    session_id = %notice.session_id,
                    request_id = %notice.request_id,
                    "ignoring input request that is no longer outstanding"
                );
                return;
            }
            outstanding.insert(notice.request_id, notice.clone());
        }
        tracing::debug!(
            session_id = %notice.session_id,
            request_id = %notice.request_id,
            "awaiting input"
        );
        self.notices.emit(notice);
    }

    /// Outstanding entries after dropping those resolved through the
    /// transport.
    fn live(&self) -> parking_lot::MutexGuard<'_, IndexMap<RequestId, AwaitingInput>> {
        let mut outstanding = self.outstanding.lock();
        outstanding.retain(|request_id, notice| {
            let live = self.transport.is_outstanding(*request_id);
            if !live {
                tracing::debug!(
                    session_id = %notice.session_id,
                    %request_id,
                    "input request answered elsewhere"
                );
            }
            live
        });
        outstanding
    }

    /// Answer a request. Only the first submit per id has effect.
    pub fn submit(&self, request_id: RequestId, value: impl Into<String>) -> Result<(), ChannelError> {
        let notice = self.live().shift_remove(&request_id);
        if notice.is_none() {
            tracing::error!(%request_id, "submit for an input request that is not awaiting input");
            return Err(ChannelError::unresolvable(request_id));
        }
        self.transport.respond(InputResponse {
            request_id,
            value: value.into(),
        })
    }

    /// Forget every request of `session_id`.
    ///
    /// Late notices of the session are rejected by [`observe`](Self::observe)
    /// once the transport has discarded them too.
    pub fn discard_session(&self, session_id: SessionId) -> usize {
        let mut outstanding = self.outstanding.lock();
        let before = outstanding.len();
        outstanding.retain(|_, notice| notice.session_id != session_id);
        before - outstanding.len()
    }

    /// Whether any request is waiting.
    pub fn is_awaiting_input(&self) -> bool {
        !self.live().is_empty()
    }

    /// Whether a request of `session_id` is waiting.
    pub fn is_session_awaiting(&self, session_id: SessionId) -> bool {
        self.live()
            .values()
            .any(|notice| notice.session_id == session_id)
    }

    /// Prompt of an outstanding request.
    pub fn prompt(&self, request_id: RequestId) -> Option<String> {
        self.live()
            .get(&request_id)
            .map(|notice| notice.prompt.clone())
    }

    /// All outstanding requests, oldest first.
    pub fn outstanding(&self) -> Vec<AwaitingInput> {
        self.live().values().cloned().collect()
    }

    /// Outstanding requests of one session, oldest first.
    pub fn outstanding_for(&self, session_id: SessionId) -> Vec<AwaitingInput> {
        self.live()
            .values()
            .filter(|notice| notice.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Receive notices accepted by this broker from now on.
    pub fn subscribe(&self) -> Subscription<AwaitingInput> {
        self.notices.subscribe()
    }

    /// Wait until a request (of `session_id`, if given) is outstanding.
    ///
    /// Returns the oldest matching request, or `None` if the broker's notice
    /// bus closes first.
    pub async fn wait_for_request(&self, session_id: Option<SessionId>) -> Option<AwaitingInput> {
        let matches = |notice: &AwaitingInput| session_id.is_none_or(|s| s == notice.session_id);
        let mut subscription = self.subscribe();
        if let Some(notice) = self.outstanding().into_iter().find(|n| matches(n)) {
            return Some(notice);
        }
        while let Some(notice) = subscription.recv().await {
            if matches(&notice) {
                return Some(notice);
            }
        }
        None
    }
}
