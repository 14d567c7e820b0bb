#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # pybridge Channel
//!
//! The input-request coordination protocol shared by the execution side and
//! the UI side.
//!
//! - [`CoordinationMessage`]: the closed, `kind`-tagged message contract
//! - [`PendingTable`]: requests waiting for exactly one response
//! - [`InputTransport`]: the seam both sides talk through, with
//!   [`DirectTransport`] as the in-process default
//! - [`InputBroker`]: UI-side view of outstanding prompts
//! - [`Broadcaster`]: fan-out used for notices and events

pub mod broadcast;
pub mod broker;
pub mod error;
pub mod message;
pub mod pending;
pub mod transport;

pub use broadcast::{Broadcaster, Subscription};
pub use broker::InputBroker;
pub use error::ChannelError;
pub use message::{
    AwaitingInput, CoordinationMessage, InputResponse, OutputChunk, PendingInputRequest, Ready,
};
pub use pending::PendingTable;
pub use transport::{DirectTransport, InputTransport, SharedTransport, TransportKind};
