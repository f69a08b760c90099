//! Scatter-gather client session.
//!
//! A session collects requests with [`ClientSession::add_request`] and then
//! drives them through the transport under one of four join disciplines:
//!
//! | call                       | returns when                                   |
//! |----------------------------|------------------------------------------------|
//! | `execute_and_wait_sent`    | every queued request has been handed over      |
//! | `execute_and_wait_one(r)`  | `r` is Completed or Faulted                    |
//! | `execute_and_wait_any`     | some request settled (its handle), or none left|
//! | `execute_and_wait_all`     | every non-NoWait request settled               |
//!
//! Each wait runs the same pass: send whatever still needs sending, poll
//! every in-flight call, expire those past their deadline, then block on the
//! completion channel until the earliest deadline.  Per-request faults land
//! on the request; only transport-wide failures surface as `Err`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::Receiver;
use log::{debug, warn};

use super::request::{Attribute, Attributes, ClientRequest, RequestState, SharedSlot};
use crate::codec::{self, PACKET_OVERHEAD, RequestPacket, ResponseBody, ResponsePacket};
use crate::config::{ClientConfig, DEFAULT_TIMEOUT_MS};
use crate::error::{Error, Result};
use crate::fault::{FaultCode, FaultInfo};
use crate::service_key::ServiceKey;
use crate::transport::{CompletionNotifier, Endpoint, PollOutcome, SendError, Transport, TransportHandle};

const DEFAULT_CLIENT_NAME: &str = "client";

// ── Bookkeeping ──────────────────────────────────────────────

/// A request bound to this session and not yet settled.
struct Outstanding {
    slot: SharedSlot,
    epoch: u64,
    key: ServiceKey,
    endpoint: Endpoint,
    request_id: u32,
    attributes: Attributes,
    /// Encoded on first dispatch; reused by retries.
    frame: Option<Vec<u8>>,
    call: Option<TransportHandle>,
    timeout: Duration,
    deadline: Option<Instant>,
    tries: u32,
}

impl Outstanding {
    /// The owner reset, re-added or dropped the request behind our back.
    fn is_stale(&self) -> bool {
        let s = self.slot.lock();
        s.epoch != self.epoch || s.abandoned
    }

    fn owned_by(&self, slot: &SharedSlot, epoch: u64) -> bool {
        Arc::ptr_eq(&self.slot, slot) && self.epoch == epoch
    }
}

/// Settled, not yet reported by `execute_and_wait_any`.
struct Finished {
    slot: SharedSlot,
    epoch: u64,
    handle: u64,
}

enum Settle {
    Completed {
        response: Vec<u8>,
        service_name: String,
        responder: Option<Endpoint>,
    },
    Faulted(FaultInfo),
    /// Stale binding: drop silently.
    Discard,
}

enum Dispatched {
    Sent,
    Settle(Settle),
}

// ── ClientSession ────────────────────────────────────────────

pub struct ClientSession {
    name: String,
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    notifier: CompletionNotifier,
    completions: Receiver<TransportHandle>,
    outstanding: Vec<Outstanding>,
    finished: VecDeque<Finished>,
    fault: FaultInfo,
    next_request_id: u32,
}

impl ClientSession {
    /// `default_timeout_ms == 0` selects the 4 s default.
    pub fn new(transport: Arc<dyn Transport>, name: &str, default_timeout_ms: u32) -> Self {
        let config = ClientConfig {
            default_timeout_ms: if default_timeout_ms == 0 {
                DEFAULT_TIMEOUT_MS
            } else {
                default_timeout_ms
            },
            ..ClientConfig::default()
        };
        Self::build(transport, name, config)
    }

    pub fn with_config(transport: Arc<dyn Transport>, name: &str, config: ClientConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::validation(FaultCode::INVALID_ARGUMENT, e.to_string()))?;
        Ok(Self::build(transport, name, config))
    }

    fn build(transport: Arc<dyn Transport>, name: &str, config: ClientConfig) -> Self {
        let (notifier, completions) = CompletionNotifier::channel();
        let name = if name.is_empty() { DEFAULT_CLIENT_NAME } else { name };
        debug!("client '{name}': session created");
        Self {
            name: name.to_owned(),
            config,
            transport,
            notifier,
            completions,
            outstanding: Vec::new(),
            finished: VecDeque::new(),
            fault: FaultInfo::none(),
            next_request_id: 1,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn timeout_ms(&self) -> u32 {
        self.config.default_timeout_ms
    }

    /// Applies to requests dispatched from now on.  0 restores the default.
    pub fn set_timeout_ms(&mut self, ms: u32) {
        self.config.default_timeout_ms = if ms == 0 { DEFAULT_TIMEOUT_MS } else { ms };
    }

    /// Requests still Queued or InProgress.  Entries whose request was
    /// reset, re-added elsewhere or dropped are not counted.
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.iter().filter(|o| !o.is_stale()).count()
    }

    // ── Session fault ────────────────────────────────────────

    pub fn has_fault(&self) -> bool {
        self.fault.has_fault()
    }

    pub fn fault(&self) -> &FaultInfo {
        &self.fault
    }

    pub fn fault_code(&self) -> FaultCode {
        self.fault.code()
    }

    pub fn fault_text(&self) -> &str {
        self.fault.text()
    }

    /// Clears the session fault only; outstanding requests are untouched.
    pub fn reset(&mut self) {
        self.fault = FaultInfo::none();
    }

    // ── Adding requests ──────────────────────────────────────

    /// Bind `request` to `service_key` and queue it.  Returns the request's
    /// client handle.  On any error the request and the session are left
    /// exactly as they were.
    pub fn add_request(&mut self, service_key: &str, request: &ClientRequest) -> Result<u64> {
        let key = ServiceKey::parse_client(service_key)?;
        let slot = Arc::clone(request.slot());
        let mut s = slot.lock();

        match s.state {
            RequestState::Queued => {
                return Err(Error::usage(
                    FaultCode::REQUEST_ALREADY_ADDED,
                    "request is already queued on a session",
                ));
            }
            RequestState::InProgress => {
                return Err(Error::usage(
                    FaultCode::REQUEST_IN_PROGRESS,
                    "request is in progress and cannot be re-added",
                ));
            }
            RequestState::Idle | RequestState::Completed | RequestState::Faulted => {}
        }

        let attributes = s.attributes;
        if attributes.contains(Attribute::KeepAffinity) {
            if !attributes.contains(Attribute::NoRetry) {
                return Err(Error::validation(
                    FaultCode::NEED_NO_RETRY,
                    "keepAffinity requires noRetry",
                ));
            }
            if attributes.contains(Attribute::NoWait) {
                return Err(Error::validation(
                    FaultCode::NO_WAIT_NOT_ALLOWED,
                    "keepAffinity cannot be combined with noWait",
                ));
            }
        }
        if s.payload.len() > self.config.max_request_size {
            return Err(Error::validation(
                FaultCode::BAD_REQUEST_LENGTH,
                format!(
                    "request of {} bytes exceeds the {} byte limit",
                    s.payload.len(),
                    self.config.max_request_size
                ),
            ));
        }

        let endpoint = if attributes.contains(Attribute::NeedAffinity) {
            s.affinity.clone().ok_or_else(|| {
                Error::validation(FaultCode::NO_AFFINITY, "needAffinity set but no affinity is held")
            })?
        } else {
            match self.transport.resolve(&key) {
                Ok(ep) => ep,
                Err(fault) => return Err(self.resolve_failed(fault)),
            }
        };

        s.epoch += 1;
        s.state = RequestState::Queued;
        s.response.clear();
        s.fault = FaultInfo::none();
        s.service_name.clear();
        s.abandoned = false;
        let (epoch, handle) = (s.epoch, s.handle);
        drop(s);

        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
        debug!("client '{}': queued #{request_id} for {key} (handle {handle})", self.name);

        self.outstanding.push(Outstanding {
            slot,
            epoch,
            key,
            endpoint,
            request_id,
            attributes,
            frame: None,
            call: None,
            timeout: Duration::ZERO,
            deadline: None,
            tries: 0,
        });
        Ok(handle)
    }

    fn resolve_failed(&mut self, fault: FaultInfo) -> Error {
        if fault.code() == FaultCode::TRANSPORT_UNAVAILABLE {
            self.fault = fault.clone();
            Error::Transport(fault)
        } else {
            Error::Validation(fault)
        }
    }

    // ── Wait primitives ──────────────────────────────────────

    /// Send every queued request and return without waiting for responses.
    /// Returns how many requests were handed to the transport.  A transport
    /// that cannot send at all sets the session fault and returns `Err`.
    pub fn execute_and_wait_sent(&mut self) -> Result<usize> {
        let mut sent = 0;
        loop {
            sent += self.dispatch()?;
            self.collect();
            if self.outstanding.iter().all(|o| o.call.is_some()) {
                return Ok(sent);
            }
        }
    }

    /// Block until `request` settles, driving every other outstanding
    /// request along the way.
    pub fn execute_and_wait_one(&mut self, request: &ClientRequest) -> Result<()> {
        let slot = request.slot();
        let epoch = slot.lock().epoch;
        let pending = |o: &Outstanding| o.owned_by(slot, epoch);
        let reported = |f: &Finished| Arc::ptr_eq(&f.slot, slot) && f.epoch == epoch;

        if !self.outstanding.iter().any(pending) && !self.finished.iter().any(reported) {
            return Err(Error::usage(
                FaultCode::REQUEST_NOT_ADDED,
                format!("request is not owned by client session '{}'", self.name),
            ));
        }

        loop {
            self.dispatch()?;
            self.collect();
            if !self.outstanding.iter().any(pending) {
                break;
            }
            self.wait_for_progress();
        }
        self.finished.retain(|f| !reported(f));
        Ok(())
    }

    /// Block until some request settles and return its client handle.
    /// `None` only when nothing is outstanding.
    pub fn execute_and_wait_any(&mut self) -> Result<Option<u64>> {
        loop {
            while let Some(f) = self.finished.pop_front() {
                let s = f.slot.lock();
                if s.epoch == f.epoch && !s.abandoned {
                    return Ok(Some(f.handle));
                }
            }
            if self.outstanding.is_empty() {
                return Ok(None);
            }
            self.dispatch()?;
            self.collect();
            if self.finished.is_empty() {
                self.wait_for_progress();
            }
        }
    }

    /// Block until every outstanding request not flagged NoWait has
    /// settled.  Returns how many settled requests this reports.
    pub fn execute_and_wait_all(&mut self) -> Result<usize> {
        loop {
            self.dispatch()?;
            self.collect();
            if self
                .outstanding
                .iter()
                .all(|o| o.attributes.contains(Attribute::NoWait))
            {
                break;
            }
            self.wait_for_progress();
        }
        let n = self.finished.len();
        self.finished.clear();
        Ok(n)
    }

    // ── Engine ───────────────────────────────────────────────

    /// Send everything that has no call in flight.
    fn dispatch(&mut self) -> Result<usize> {
        let mut sent = 0;
        let mut i = 0;
        while i < self.outstanding.len() {
            if self.outstanding[i].call.is_some() {
                i += 1;
                continue;
            }
            match self.send_one(i) {
                Ok(Dispatched::Sent) => {
                    sent += 1;
                    i += 1;
                }
                Ok(Dispatched::Settle(outcome)) => {
                    if matches!(outcome, Settle::Completed { .. }) {
                        sent += 1;
                    }
                    self.finish(i, outcome);
                }
                Err(fault) => {
                    self.fail_unsent(&fault);
                    return Err(Error::Transport(fault));
                }
            }
        }
        Ok(sent)
    }

    /// `Err` only for a transport that is unavailable as a whole.
    fn send_one(&mut self, i: usize) -> core::result::Result<Dispatched, FaultInfo> {
        let max_frame = self.config.max_request_size + PACKET_OVERHEAD;
        let max_try_count = self.config.max_try_count;
        let default_timeout = self.config.default_timeout_ms;
        let o = &mut self.outstanding[i];

        if o.frame.is_none() {
            let mut s = o.slot.lock();
            if s.epoch != o.epoch || s.abandoned {
                return Ok(Dispatched::Settle(Settle::Discard));
            }
            let packet = RequestPacket {
                request_id: o.request_id,
                client_name: self.name.clone(),
                service_key: o.key.clone(),
                no_wait: o.attributes.contains(Attribute::NoWait),
                context: s.context.clone(),
                payload: s.payload.clone(),
            };
            let frame = match codec::encode_frame(&packet, max_frame) {
                Ok(frame) => frame,
                Err(e) => {
                    return Ok(Dispatched::Settle(Settle::Faulted(FaultInfo::new(
                        FaultCode::BAD_REQUEST_LENGTH,
                        e.to_string(),
                    ))));
                }
            };
            o.frame = Some(frame);
            o.timeout = Duration::from_millis(u64::from(s.timeout_ms.unwrap_or(default_timeout)));
            s.state = RequestState::InProgress;
            s.service_name = o.endpoint.name().to_owned();
        }

        loop {
            if o.tries > 0 && o.endpoint.instance().is_none() {
                match self.transport.resolve(&o.key) {
                    Ok(ep) => o.endpoint = ep,
                    Err(fault) if fault.code() == FaultCode::TRANSPORT_UNAVAILABLE => return Err(fault),
                    Err(fault) => return Ok(Dispatched::Settle(Settle::Faulted(fault))),
                }
            }
            if o.attributes.contains(Attribute::NoRemote) && o.endpoint.is_remote() {
                return Ok(Dispatched::Settle(Settle::Faulted(FaultInfo::new(
                    FaultCode::REMOTE_NOT_ALLOWED,
                    format!("'{}' is remote and the request is noRemote", o.endpoint.name()),
                ))));
            }

            let Some(frame) = o.frame.clone() else {
                return Ok(Dispatched::Settle(Settle::Discard));
            };
            o.tries += 1;
            match self.transport.send(&o.endpoint, frame, self.notifier.clone()) {
                Ok(handle) => {
                    if o.attributes.contains(Attribute::NoWait) {
                        self.transport.cancel(handle);
                        return Ok(Dispatched::Settle(Settle::Completed {
                            response: Vec::new(),
                            service_name: String::new(),
                            responder: None,
                        }));
                    }
                    o.call = Some(handle);
                    let timeout = o.timeout;
                    o.deadline.get_or_insert_with(|| Instant::now() + timeout);
                    return Ok(Dispatched::Sent);
                }
                Err(SendError::Unavailable(fault)) => return Err(fault),
                Err(SendError::Failed { fault, retriable }) => {
                    if retriable && o.attributes.allows_retry() && o.tries < max_try_count {
                        warn!(
                            "client '{}': send #{} to '{}' failed ({}), retrying",
                            self.name,
                            o.request_id,
                            o.endpoint.name(),
                            fault.text()
                        );
                        continue;
                    }
                    return Ok(Dispatched::Settle(Settle::Faulted(fault)));
                }
            }
        }
    }

    /// Poll every in-flight call; settle, retry or expire as needed.
    fn collect(&mut self) {
        let now = Instant::now();
        let mut i = 0;
        while i < self.outstanding.len() {
            let Some(handle) = self.outstanding[i].call else {
                i += 1;
                continue;
            };
            if self.outstanding[i].is_stale() {
                self.transport.cancel(handle);
                self.finish(i, Settle::Discard);
                continue;
            }

            match self.transport.poll(handle) {
                PollOutcome::Pending => {
                    let o = &self.outstanding[i];
                    if o.deadline.is_some_and(|d| now >= d) {
                        self.transport.cancel(handle);
                        let fault = FaultInfo::new(
                            FaultCode::SERVICE_TIMEOUT,
                            format!(
                                "no response from '{}' within {}ms",
                                o.endpoint.name(),
                                o.timeout.as_millis()
                            ),
                        );
                        debug!("client '{}': #{} timed out", self.name, o.request_id);
                        self.finish(i, Settle::Faulted(fault));
                    } else {
                        i += 1;
                    }
                }
                PollOutcome::Ready { frame, responder } => {
                    let outcome = self.decode_response(&self.outstanding[i], &frame, responder);
                    self.finish(i, outcome);
                }
                PollOutcome::Failed { fault, retriable } => {
                    let o = &mut self.outstanding[i];
                    if retriable && o.attributes.allows_retry() && o.tries < self.config.max_try_count {
                        warn!(
                            "client '{}': #{} failed in flight ({}), retrying",
                            self.name,
                            o.request_id,
                            fault.text()
                        );
                        o.call = None;
                        i += 1;
                    } else {
                        self.finish(i, Settle::Faulted(fault));
                    }
                }
            }
        }
    }

    /// Decode a response frame and check it is really ours.
    fn decode_response(&self, o: &Outstanding, frame: &[u8], responder: Endpoint) -> Settle {
        let max_frame = self.config.max_response_size + PACKET_OVERHEAD;
        let packet: ResponsePacket = match codec::decode_frame(frame, max_frame) {
            Ok(p) => p,
            Err(e) => {
                return Settle::Faulted(FaultInfo::new(
                    FaultCode::RESPONSE_PACKET_FORMAT_ERROR,
                    e.to_string(),
                ));
            }
        };
        let misrouted = packet.request_id != o.request_id || packet.client_name != self.name;
        // A service that cannot decode a request cannot address its answer;
        // the transport call alone ties it to this request.
        let unaddressed = packet.request_id == 0
            && packet.client_name.is_empty()
            && matches!(&packet.body, ResponseBody::Fault(f) if f.code() == FaultCode::REQUEST_DECODE_FAILED);
        if misrouted && !unaddressed {
            warn!(
                "client '{}': response for '{}' #{} arrived on #{}",
                self.name, packet.client_name, packet.request_id, o.request_id
            );
            return Settle::Faulted(FaultInfo::new(
                FaultCode::SERIOUS_INTERNAL_ROUTING_ERROR,
                format!(
                    "response routed to the wrong request: got '{}' #{}, expected '{}' #{}",
                    packet.client_name, packet.request_id, self.name, o.request_id
                ),
            ));
        }
        let service_name = if packet.service_name.is_empty() {
            responder.name().to_owned()
        } else {
            packet.service_name
        };
        match packet.body {
            ResponseBody::Data(response) => Settle::Completed {
                response,
                service_name,
                responder: Some(responder),
            },
            ResponseBody::Fault(fault) if fault.has_fault() => Settle::Faulted(fault),
            ResponseBody::Fault(_) => Settle::Faulted(FaultInfo::new(
                FaultCode::RESPONSE_PACKET_FORMAT_ERROR,
                "fault response without a fault code",
            )),
        }
    }

    /// Remove `outstanding[i]` and publish its outcome on the request.
    fn finish(&mut self, i: usize, outcome: Settle) {
        let o = self.outstanding.remove(i);
        let mut s = o.slot.lock();
        if s.epoch != o.epoch || s.abandoned {
            return;
        }
        match outcome {
            Settle::Discard => return,
            Settle::Completed {
                response,
                service_name,
                responder,
            } => {
                s.state = RequestState::Completed;
                s.response = response;
                s.fault = FaultInfo::none();
                if !service_name.is_empty() {
                    s.service_name = service_name;
                }
                if o.attributes.contains(Attribute::KeepAffinity) {
                    if let Some(ep) = responder.filter(|r| r.instance().is_some()) {
                        s.affinity = Some(ep);
                    }
                }
            }
            Settle::Faulted(fault) => {
                debug!(
                    "client '{}': #{} faulted: {}",
                    self.name,
                    o.request_id,
                    fault.short_message("")
                );
                s.state = RequestState::Faulted;
                s.response.clear();
                s.fault = fault;
            }
        }
        let handle = s.handle;
        drop(s);

        if !o.attributes.contains(Attribute::NoWait) {
            self.finished.push_back(Finished {
                slot: o.slot,
                epoch: o.epoch,
                handle,
            });
        }
    }

    /// The transport is gone: everything not yet sent faults with it.
    fn fail_unsent(&mut self, fault: &FaultInfo) {
        warn!("client '{}': {}", self.name, fault.long_message("transport failure"));
        self.fault = fault.clone();
        let mut i = 0;
        while i < self.outstanding.len() {
            if self.outstanding[i].call.is_none() {
                self.finish(i, Settle::Faulted(fault.clone()));
            } else {
                i += 1;
            }
        }
    }

    /// Block until a call changes state or the earliest deadline passes.
    fn wait_for_progress(&mut self) {
        if self.outstanding.iter().any(|o| o.call.is_none()) {
            return;
        }
        let Some(deadline) = self.outstanding.iter().filter_map(|o| o.deadline).min() else {
            return;
        };
        if self.completions.recv_deadline(deadline).is_ok() {
            while self.completions.try_recv().is_ok() {}
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        for o in self.outstanding.drain(..) {
            if let Some(handle) = o.call {
                self.transport.cancel(handle);
            }
            let mut s = o.slot.lock();
            if s.epoch == o.epoch && !s.abandoned && s.state.is_outstanding() {
                s.state = RequestState::Faulted;
                s.fault = FaultInfo::new(
                    FaultCode::SESSION_CLOSED,
                    "client session dropped with the request outstanding",
                );
            }
        }
    }
}
