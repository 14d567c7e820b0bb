#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # pybridge Proxy
//!
//! Proxied input mode: the execution side asks for input by issuing
//! `GET /{prefix}-get-input/?id=…&prompt=…`, the [`InterceptContext`] holds
//! that request open as a [`PausedResponse`] and releases it when a window
//! posts the matching `InputResponse`.
//!
//! [`ProxyTransport`] wraps the context as an
//! [`InputTransport`](pybridge_channel::InputTransport), so a runner and an
//! [`InputBroker`](pybridge_channel::InputBroker) can use it interchangeably
//! with the direct transport.

pub mod error;
pub mod intercept;
pub mod route;
pub mod transport;

pub use error::ProxyError;
pub use intercept::{InterceptContext, Intercepted, PausedResponse};
pub use route::{InputRoute, RouteParams};
pub use transport::{DEFAULT_ORIGIN, ProxyTransport};
