//! One RPC invocation: payload, attributes, context and outcome.
//!
//! ```text
//!            add_request           dispatch            response / fault / timeout
//!   Idle ───────────────▶ Queued ───────────▶ InProgress ──────────────────────▶ Completed
//!    ▲                      │                                                    Faulted
//!    └──── reset ───────────┴─────────────────────── reset / re-add ◀────────────┘
//! ```
//!
//! The caller owns the `ClientRequest`; the session it is added to keeps a
//! second handle on the same slot until the request settles.  Resetting,
//! re-adding or dropping a request while it is InProgress is a usage error.

use core::fmt;
use std::sync::Arc;

use log::{debug, error};
use parking_lot::Mutex;

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::fault::{FaultCode, FaultInfo};
use crate::transport::Endpoint;

// ── Attributes ───────────────────────────────────────────────

/// Per-request behaviour flags.  Bit values are part of the public
/// contract; new attributes must use unused bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Attribute {
    /// Fire and forget: complete as soon as the request is sent.
    NoWait = 0x0001,
    /// Refuse to dispatch to a remote endpoint.
    NoRemote = 0x0002,
    /// Never retry on transient transport failure.
    NoRetry = 0x0004,
    /// Remember the answering instance for later NeedAffinity requests.
    KeepAffinity = 0x0008,
    /// Route to the instance remembered by KeepAffinity.
    NeedAffinity = 0x0010,
}

impl Attribute {
    pub const ALL: [Self; 5] = [
        Self::NoWait,
        Self::NoRemote,
        Self::NoRetry,
        Self::KeepAffinity,
        Self::NeedAffinity,
    ];

    /// Return the bitmask for this attribute.
    pub const fn mask(self) -> u16 {
        self as u16
    }
}

/// Bit-set over [`Attribute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Attributes(u16);

impl Attributes {
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Keeps only known bits.
    pub const fn from_bits_truncate(bits: u16) -> Self {
        let mut known = 0;
        let mut i = 0;
        while i < Attribute::ALL.len() {
            known |= Attribute::ALL[i].mask();
            i += 1;
        }
        Self(bits & known)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, a: Attribute) -> bool {
        self.0 & a.mask() != 0
    }

    pub fn insert(&mut self, a: Attribute) {
        self.0 |= a.mask();
    }

    pub fn remove(&mut self, a: Attribute) {
        self.0 &= !a.mask();
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether the session may resend this request after a transient failure.
    pub const fn allows_retry(self) -> bool {
        !self.contains(Attribute::NoRetry) && !self.contains(Attribute::NeedAffinity)
    }
}

impl From<Attribute> for Attributes {
    fn from(a: Attribute) -> Self {
        Self(a.mask())
    }
}

// ── State ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Queued,
    InProgress,
    Completed,
    Faulted,
}

impl RequestState {
    /// Bound to a session and not yet settled.
    pub const fn is_outstanding(self) -> bool {
        matches!(self, Self::Queued | Self::InProgress)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Queued => "queued",
            Self::InProgress => "in progress",
            Self::Completed => "completed",
            Self::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

/// State shared between the caller's `ClientRequest` and the session that
/// drives it.
#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) state: RequestState,
    pub(crate) payload: Vec<u8>,
    pub(crate) attributes: Attributes,
    pub(crate) context: RequestContext,
    pub(crate) handle: u64,
    pub(crate) timeout_ms: Option<u32>,
    pub(crate) response: Vec<u8>,
    pub(crate) fault: FaultInfo,
    pub(crate) service_name: String,
    pub(crate) affinity: Option<Endpoint>,
    /// Bumped on every add and reset so a session can tell a stale binding
    /// from the current one.
    pub(crate) epoch: u64,
    /// The owner dropped the request while the session still held it.
    pub(crate) abandoned: bool,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: RequestState::Idle,
            payload: Vec::new(),
            attributes: Attributes::empty(),
            context: RequestContext::new(),
            handle: 0,
            timeout_ms: None,
            response: Vec::new(),
            fault: FaultInfo::none(),
            service_name: String::new(),
            affinity: None,
            epoch: 0,
            abandoned: false,
        }
    }
}

pub(crate) type SharedSlot = Arc<Mutex<Slot>>;

// ── ClientRequest ────────────────────────────────────────────

/// Caller-owned handle on one request.
#[derive(Debug)]
pub struct ClientRequest {
    slot: SharedSlot,
}

impl Default for ClientRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRequest {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::new())),
        }
    }

    pub(crate) fn slot(&self) -> &SharedSlot {
        &self.slot
    }

    // ── Lifecycle ────────────────────────────────────────────

    /// Back to Idle: handle, attributes, context, payload, response, fault,
    /// timeout and affinity are all cleared.
    pub fn reset(&self) -> Result<()> {
        let mut s = self.slot.lock();
        if s.state == RequestState::InProgress {
            return Err(in_progress("reset"));
        }
        let epoch = s.epoch + 1;
        *s = Slot::new();
        s.epoch = epoch;
        Ok(())
    }

    pub fn state(&self) -> RequestState {
        self.slot.lock().state
    }

    pub fn in_progress(&self) -> bool {
        self.state() == RequestState::InProgress
    }

    // ── Inputs ───────────────────────────────────────────────

    /// Replace the payload.  Refused once the request has been dispatched.
    pub fn set_request_data(&self, data: &[u8]) -> Result<()> {
        let mut s = self.slot.lock();
        if s.state == RequestState::InProgress {
            return Err(in_progress("set_request_data"));
        }
        s.payload.clear();
        s.payload.extend_from_slice(data);
        Ok(())
    }

    pub fn request_data(&self) -> Vec<u8> {
        self.slot.lock().payload.clone()
    }

    pub fn set_attribute(&self, a: Attribute) {
        self.slot.lock().attributes.insert(a);
    }

    pub fn clear_attribute(&self, a: Attribute) {
        self.slot.lock().attributes.remove(a);
    }

    pub fn get_attribute(&self, a: Attribute) -> bool {
        self.slot.lock().attributes.contains(a)
    }

    pub fn attributes(&self) -> Attributes {
        self.slot.lock().attributes
    }

    /// Fails for reserved (`pluton.`) or empty keys and leaves the context
    /// unchanged.
    pub fn set_context(&self, key: &str, value: &str) -> Result<()> {
        self.slot.lock().context.set(key, value)
    }

    pub fn context(&self, key: &str) -> Option<String> {
        self.slot.lock().context.get(key).map(str::to_owned)
    }

    pub fn set_client_handle(&self, handle: u64) {
        self.slot.lock().handle = handle;
    }

    pub fn client_handle(&self) -> u64 {
        self.slot.lock().handle
    }

    /// Override the session's default timeout for this request.
    pub fn set_timeout_ms(&self, ms: u32) {
        self.slot.lock().timeout_ms = (ms > 0).then_some(ms);
    }

    pub fn timeout_ms(&self) -> Option<u32> {
        self.slot.lock().timeout_ms
    }

    // ── Outcome ──────────────────────────────────────────────

    pub fn has_fault(&self) -> bool {
        self.state() == RequestState::Faulted
    }

    pub fn fault(&self) -> FaultInfo {
        self.slot.lock().fault.clone()
    }

    pub fn fault_code(&self) -> FaultCode {
        self.slot.lock().fault.code()
    }

    pub fn fault_text(&self) -> String {
        self.slot.lock().fault.text().to_owned()
    }

    /// The response payload.  Only a Completed request has one; a Faulted
    /// request returns its fault as a transport error.
    pub fn response_data(&self) -> Result<Vec<u8>> {
        let s = self.slot.lock();
        match s.state {
            RequestState::Completed => Ok(s.response.clone()),
            RequestState::Faulted => Err(Error::Transport(s.fault.clone())),
            RequestState::Idle => Err(Error::usage(
                FaultCode::REQUEST_NOT_ADDED,
                "response requested from a request that was never added",
            )),
            RequestState::Queued | RequestState::InProgress => Err(Error::usage(
                FaultCode::RESPONSE_IN_PROGRESS,
                "response requested before the request completed",
            )),
        }
    }

    /// Name of the service instance bound at dispatch; empty before.
    pub fn service_name(&self) -> String {
        self.slot.lock().service_name.clone()
    }

    /// A previous KeepAffinity request left an instance to route to.
    pub fn has_affinity(&self) -> bool {
        self.slot.lock().affinity.is_some()
    }
}

impl Drop for ClientRequest {
    fn drop(&mut self) {
        let mut s = self.slot.lock();
        match s.state {
            RequestState::InProgress => {
                error!(
                    "client request (handle {}) dropped while in progress; abandoning it",
                    s.handle
                );
                s.abandoned = true;
            }
            RequestState::Queued => {
                debug!("client request (handle {}) dropped while queued", s.handle);
                s.abandoned = true;
            }
            _ => {}
        }
    }
}

fn in_progress(op: &str) -> Error {
    Error::usage(
        FaultCode::REQUEST_IN_PROGRESS,
        format!("{op} called while the request is in progress"),
    )
}
