#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # pybridge Runtime
//!
//! Lifecycle management for Python runners.
//!
//! - [`RunnerController`] drives one execution context through
//!   `Idle → Loading → Ready ⇄ Running`, with timeouts, interrupts, a
//!   single queued run while loading, and input forwarding
//! - [`Provider`] holds process-wide defaults and the shared input broker,
//!   and hands out controllers
//! - [`RunnerEvent`] stream for observers

pub mod controller;
pub mod error;
pub mod event;
pub mod output;
pub mod provider;
pub mod state;

pub use controller::{RunOutcome, RunnerController, RunnerSession};
pub use error::LifecycleError;
pub use event::RunnerEvent;
pub use output::OutputBuffer;
pub use provider::{Provider, transport_for};
pub use state::{RunnerState, can_transition, validate_transition};
