//! Directory/Transport port: how sessions reach services.
//!
//! ```text
//!   ClientSession ──resolve/send/poll/cancel──▶ ┌───────────┐
//!                                               │ Transport │
//!   ServiceSession ◀──listen/accept/respond──── └───────────┘
//! ```
//!
//! Sessions only ever see this trait.  A process creates one transport at
//! startup and hands the same `Arc<dyn Transport>` to every session, so
//! implementations must be safe for concurrent use by independent sessions.
//!
//! Frames crossing the port are opaque bytes produced by [`crate::codec`].

pub mod local;

use core::fmt;

use crossbeam::channel::{self, Receiver, Sender};

use crate::fault::FaultInfo;
use crate::service_key::ServiceKey;

pub use local::LocalTransport;

/// Opaque id for one in-flight call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportHandle(pub u64);

impl fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── Endpoint ─────────────────────────────────────────────────

/// Where a request goes: a registered service, optionally pinned to one
/// instance (affinity).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    directory_key: String,
    name: String,
    instance: Option<u64>,
    remote: bool,
}

impl Endpoint {
    pub fn new(directory_key: impl Into<String>, name: impl Into<String>, remote: bool) -> Self {
        Self {
            directory_key: directory_key.into(),
            name: name.into(),
            instance: None,
            remote,
        }
    }

    /// Pin this endpoint to one service instance.
    pub fn pinned(self, instance: u64, name: impl Into<String>) -> Self {
        Self {
            instance: Some(instance),
            name: name.into(),
            ..self
        }
    }

    pub fn directory_key(&self) -> &str {
        &self.directory_key
    }

    /// Human-readable service (or instance) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> Option<u64> {
        self.instance
    }

    /// Reaching this endpoint means leaving the local host.
    pub fn is_remote(&self) -> bool {
        self.remote
    }
}

// ── Completion notification ──────────────────────────────────

/// Wakes a waiting client session when a call changes state.  The session
/// still has to `poll` to learn the outcome.
#[derive(Debug, Clone)]
pub struct CompletionNotifier {
    tx: Sender<TransportHandle>,
}

impl CompletionNotifier {
    /// A notifier and the receiver a session blocks on.
    pub fn channel() -> (Self, Receiver<TransportHandle>) {
        let (tx, rx) = channel::unbounded();
        (Self { tx }, rx)
    }

    pub fn notify(&self, handle: TransportHandle) {
        // The session may be gone already; nothing left to wake.
        let _ = self.tx.send(handle);
    }
}

// ── Outcomes ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The transport as a whole is down.  Fatal for the session.
    Unavailable(FaultInfo),
    /// This one send failed.  `retriable` marks transient failures.
    Failed { fault: FaultInfo, retriable: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    /// Response frame plus the exact instance that produced it.
    Ready { frame: Vec<u8>, responder: Endpoint },
    Failed { fault: FaultInfo, retriable: bool },
}

// ───────────────────────────────────────────────────────────────
// Client side
// ───────────────────────────────────────────────────────────────

pub trait Transport: Send + Sync {
    /// Map a service key to an endpoint.  Fails with `serviceNotFound`
    /// when nothing serves the key.
    fn resolve(&self, key: &ServiceKey) -> Result<Endpoint, FaultInfo>;

    /// Hand a request frame to the endpoint.  `notifier` fires whenever the
    /// returned handle has something to `poll`.
    fn send(
        &self,
        endpoint: &Endpoint,
        frame: Vec<u8>,
        notifier: CompletionNotifier,
    ) -> Result<TransportHandle, SendError>;

    /// Non-blocking.  `Ready` and `Failed` are reported once; the handle is
    /// released afterwards.
    fn poll(&self, handle: TransportHandle) -> PollOutcome;

    /// Forget a call.  A late response is discarded.
    fn cancel(&self, handle: TransportHandle);

    // ── Service side ─────────────────────────────────────────

    /// Register a service instance under `key` and return its listener.
    /// An empty `instance_name` lets the transport pick one.
    fn listen(&self, key: &ServiceKey, instance_name: &str) -> Result<Box<dyn Listener>, FaultInfo>;
}

// ───────────────────────────────────────────────────────────────
// Service side
// ───────────────────────────────────────────────────────────────

/// One registered service instance.  Dropping it deregisters the instance.
pub trait Listener: Send {
    /// Block until a request arrives.  `None` means the service was told
    /// to shut down.
    fn accept(&mut self) -> Option<Inbound>;

    /// The pinned endpoint of this instance.
    fn endpoint(&self) -> &Endpoint;
}

/// A request frame plus the way back to its caller.
pub struct Inbound {
    pub frame: Vec<u8>,
    pub reply: Box<dyn Reply>,
}

/// Return path for one inbound request.  Dropping it without responding
/// reports an incomplete response to the client.
pub trait Reply: Send {
    fn respond(self: Box<Self>, frame: Vec<u8>);
}
