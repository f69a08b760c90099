//! Pluton: a scatter-gather RPC engine.
//!
//! A client session queues any number of requests, hands them to a
//! [`transport::Transport`] at once, then collects responses with one of
//! four wait primitives.  A service session pulls requests off the same
//! transport one at a time and answers each with data or a fault.
//!
//! ```text
//!  ┌──────────────┐  add_request   ┌───────────────┐   send/poll   ┌───────────┐
//!  │ClientRequest │───────────────▶│ ClientSession │──────────────▶│           │
//!  └──────────────┘◀── response ───└───────────────┘               │ Transport │
//!                                  ┌───────────────┐ listen/accept │           │
//!                                  │ServiceSession │◀──────────────│           │
//!                                  └───────────────┘               └───────────┘
//! ```
//!
//! Everything is synchronous.  Sessions are single-threaded objects; run
//! one per thread and share a single transport between them.

#![deny(unused_must_use)]

pub mod client;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod fault;
pub mod service;
pub mod service_key;
pub mod transport;

pub use client::{Attribute, Attributes, ClientRequest, ClientSession, RequestState};
pub use config::{ClientConfig, ServiceConfig};
pub use error::{Error, Result};
pub use fault::{FaultCode, FaultInfo};
pub use service::{EchoStats, ServiceSession, ServiceState, run_echo};
pub use service_key::{SerializationType, ServiceKey};
pub use transport::{LocalTransport, Transport};
