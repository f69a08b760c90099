//! In-process Directory/Transport.
//!
//! Services and clients living in one process meet through a shared
//! directory of registrations.  Each registration owns one shared request
//! queue (any instance may take a request) and one private queue per
//! instance (affinity routing):
//!
//! ```text
//!   client ──send──▶ shared queue ──┬──▶ instance 1 ──reply──┐
//!                                   └──▶ instance 2 ──reply──┤
//!   client ──send(pinned)──▶ private queue 2 ─▶ instance 2   │
//!   client ◀──notify + poll──── call table ◀─────────────────┘
//! ```
//!
//! A registration lives while at least one listener does.  Requests still
//! queued when the last listener goes away fail with a retriable
//! `connectFailed`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, info};
use parking_lot::Mutex;

use super::{CompletionNotifier, Endpoint, Inbound, Listener, PollOutcome, Reply, SendError, Transport, TransportHandle};
use crate::error::Error;
use crate::fault::{FaultCode, FaultInfo};
use crate::service_key::ServiceKey;

// ── Internal tables ──────────────────────────────────────────

struct Delivery {
    frame: Vec<u8>,
    handle: TransportHandle,
}

struct Registration {
    key: ServiceKey,
    remote: bool,
    shared_tx: Sender<Delivery>,
    shared_rx: Receiver<Delivery>,
    /// Dropped to tell every listener to stop.
    shutdown_tx: Option<Sender<()>>,
    shutdown_rx: Receiver<()>,
    instances: HashMap<u64, Sender<Delivery>>,
}

impl Registration {
    fn new(key: ServiceKey) -> Self {
        let (shared_tx, shared_rx) = channel::unbounded();
        let (shutdown_tx, shutdown_rx) = channel::bounded(0);
        Self {
            key,
            remote: false,
            shared_tx,
            shared_rx,
            shutdown_tx: Some(shutdown_tx),
            shutdown_rx,
            instances: HashMap::new(),
        }
    }
}

enum CallState {
    Pending,
    Ready { frame: Vec<u8>, responder: Endpoint },
    Failed { fault: FaultInfo, retriable: bool },
}

struct Call {
    state: CallState,
    notifier: CompletionNotifier,
}

struct Inner {
    available: AtomicBool,
    next_handle: AtomicU64,
    next_instance: AtomicU64,
    services: Mutex<HashMap<String, Registration>>,
    calls: Mutex<HashMap<TransportHandle, Call>>,
}

impl Inner {
    /// Settle a pending call and wake its session.  Calls already settled
    /// or cancelled are left alone.
    fn complete(&self, handle: TransportHandle, state: CallState) {
        let mut calls = self.calls.lock();
        if let Some(call) = calls.get_mut(&handle) {
            if matches!(call.state, CallState::Pending) {
                call.state = state;
                call.notifier.notify(handle);
            }
        }
    }

    fn fail(&self, handle: TransportHandle, code: FaultCode, text: &str, retriable: bool) {
        self.complete(
            handle,
            CallState::Failed {
                fault: FaultInfo::new(code, text),
                retriable,
            },
        );
    }

    fn deregister(&self, directory_key: &str, instance: u64) {
        let orphaned: Vec<Delivery> = {
            let mut services = self.services.lock();
            let Some(reg) = services.get_mut(directory_key) else {
                return;
            };
            reg.instances.remove(&instance);
            if !reg.instances.is_empty() {
                return;
            }
            match services.remove(directory_key) {
                Some(reg) => reg.shared_rx.try_iter().collect(),
                None => Vec::new(),
            }
        };

        debug!("local: '{directory_key}' has no instances left, deregistered");
        for d in orphaned {
            self.fail(d.handle, FaultCode::CONNECT_FAILED, "service went away before accepting", true);
        }
    }
}

// ── LocalTransport ───────────────────────────────────────────

/// Thread-safe, cheaply cloneable in-process transport.
#[derive(Clone)]
pub struct LocalTransport {
    inner: Arc<Inner>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                available: AtomicBool::new(true),
                next_handle: AtomicU64::new(1),
                next_instance: AtomicU64::new(1),
                services: Mutex::new(HashMap::new()),
                calls: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The same transport behind the port trait, ready to hand to sessions.
    pub fn shared(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }

    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::Acquire)
    }

    /// Number of live instances registered under a service key.
    pub fn instance_count(&self, key: &str) -> usize {
        let Ok(key) = ServiceKey::parse_service(key) else {
            return 0;
        };
        self.inner
            .services
            .lock()
            .get(&key.search_key())
            .map_or(0, |reg| reg.instances.len())
    }

    /// Mark a registered service as living on another host.
    pub fn set_remote(&self, key: &str, remote: bool) -> Result<(), Error> {
        let key = ServiceKey::parse_service(key)?;
        let mut services = self.inner.services.lock();
        let reg = services
            .get_mut(&key.search_key())
            .ok_or_else(|| not_registered(&key))?;
        reg.remote = remote;
        Ok(())
    }

    /// Tell every instance of a service to stop; their `accept` returns
    /// `None` and the registration disappears once they are gone.
    pub fn shutdown_service(&self, key: &str) -> Result<(), Error> {
        let key = ServiceKey::parse_service(key)?;
        let mut services = self.inner.services.lock();
        let reg = services
            .get_mut(&key.search_key())
            .ok_or_else(|| not_registered(&key))?;
        reg.shutdown_tx = None;
        info!("local: shutting down service '{key}'");
        Ok(())
    }

    /// Take the whole transport down.  Pending calls fail, new sends are
    /// refused, every listener is told to stop.
    pub fn shutdown(&self) {
        self.inner.available.store(false, Ordering::Release);
        for reg in self.inner.services.lock().values_mut() {
            reg.shutdown_tx = None;
        }
        let mut calls = self.inner.calls.lock();
        for (handle, call) in calls.iter_mut() {
            if matches!(call.state, CallState::Pending) {
                call.state = CallState::Failed {
                    fault: unavailable(),
                    retriable: false,
                };
                call.notifier.notify(*handle);
            }
        }
        info!("local: transport shut down");
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn unavailable() -> FaultInfo {
    FaultInfo::new(FaultCode::TRANSPORT_UNAVAILABLE, "local transport is shut down")
}

fn not_registered(key: &ServiceKey) -> Error {
    Error::validation(
        FaultCode::SERVICE_NOT_FOUND,
        format!("no service registered for '{key}'"),
    )
}

impl Transport for LocalTransport {
    fn resolve(&self, key: &ServiceKey) -> Result<Endpoint, FaultInfo> {
        if !self.is_available() {
            return Err(unavailable());
        }
        let services = self.inner.services.lock();
        for directory_key in [key.search_key(), key.wildcard().search_key()] {
            if let Some(reg) = services.get(&directory_key) {
                return Ok(Endpoint::new(directory_key, reg.key.to_string(), reg.remote));
            }
        }
        Err(FaultInfo::new(
            FaultCode::SERVICE_NOT_FOUND,
            format!("no service registered for '{key}'"),
        ))
    }

    fn send(
        &self,
        endpoint: &Endpoint,
        frame: Vec<u8>,
        notifier: CompletionNotifier,
    ) -> Result<TransportHandle, SendError> {
        if !self.is_available() {
            return Err(SendError::Unavailable(unavailable()));
        }

        let handle = TransportHandle(self.inner.next_handle.fetch_add(1, Ordering::Relaxed));
        self.inner.calls.lock().insert(
            handle,
            Call {
                state: CallState::Pending,
                notifier,
            },
        );

        // Delivered under the directory lock: a listener that deregisters
        // later drains everything sent before it.
        let delivered = {
            let services = self.inner.services.lock();
            match services.get(endpoint.directory_key()) {
                None => Err((
                    FaultInfo::new(
                        FaultCode::CONNECT_FAILED,
                        format!("'{}' is no longer registered", endpoint.name()),
                    ),
                    true,
                )),
                Some(reg) => {
                    let tx = match endpoint.instance() {
                        None => Some(&reg.shared_tx),
                        Some(id) => reg.instances.get(&id),
                    };
                    match tx {
                        None => Err((
                            FaultInfo::new(
                                FaultCode::CONNECT_FAILED,
                                format!("instance '{}' is gone", endpoint.name()),
                            ),
                            false,
                        )),
                        Some(tx) => tx.send(Delivery { frame, handle }).map_err(|_| {
                            (
                                FaultInfo::new(
                                    FaultCode::CONNECT_FAILED,
                                    format!("'{}' stopped accepting requests", endpoint.name()),
                                ),
                                true,
                            )
                        }),
                    }
                }
            }
        };

        if let Err((fault, retriable)) = delivered {
            self.inner.calls.lock().remove(&handle);
            return Err(SendError::Failed { fault, retriable });
        }
        Ok(handle)
    }

    fn poll(&self, handle: TransportHandle) -> PollOutcome {
        let mut calls = self.inner.calls.lock();
        let Some(call) = calls.get(&handle) else {
            return PollOutcome::Failed {
                fault: FaultInfo::new(
                    FaultCode::SERIOUS_INTERNAL_ROUTING_ERROR,
                    format!("unknown transport handle {handle}"),
                ),
                retriable: false,
            };
        };
        if matches!(call.state, CallState::Pending) {
            return PollOutcome::Pending;
        }
        match calls.remove(&handle).map(|c| c.state) {
            Some(CallState::Ready { frame, responder }) => PollOutcome::Ready { frame, responder },
            Some(CallState::Failed { fault, retriable }) => PollOutcome::Failed { fault, retriable },
            Some(CallState::Pending) | None => PollOutcome::Pending,
        }
    }

    fn cancel(&self, handle: TransportHandle) {
        self.inner.calls.lock().remove(&handle);
    }

    fn listen(&self, key: &ServiceKey, instance_name: &str) -> Result<Box<dyn Listener>, FaultInfo> {
        if !self.is_available() {
            return Err(unavailable());
        }

        let instance = self.inner.next_instance.fetch_add(1, Ordering::Relaxed);
        let name = if instance_name.is_empty() {
            format!("{key}/{instance}")
        } else {
            instance_name.to_owned()
        };
        let directory_key = key.search_key();
        let (private_tx, private_rx) = channel::unbounded();

        let mut services = self.inner.services.lock();
        let reg = services
            .entry(directory_key.clone())
            .or_insert_with(|| Registration::new(key.clone()));
        if reg.shutdown_tx.is_none() {
            return Err(FaultInfo::new(
                FaultCode::CONNECT_FAILED,
                format!("'{}' is shutting down", reg.key),
            ));
        }
        reg.instances.insert(instance, private_tx);

        let endpoint = Endpoint::new(directory_key, reg.key.to_string(), reg.remote).pinned(instance, name);
        debug!("local: '{}' listening as {}", reg.key, endpoint.name());

        Ok(Box::new(LocalListener {
            inner: Arc::clone(&self.inner),
            endpoint,
            shared: reg.shared_rx.clone(),
            private: private_rx,
            shutdown: reg.shutdown_rx.clone(),
        }))
    }
}

// ── Listener and reply ───────────────────────────────────────

struct LocalListener {
    inner: Arc<Inner>,
    endpoint: Endpoint,
    shared: Receiver<Delivery>,
    private: Receiver<Delivery>,
    shutdown: Receiver<()>,
}

impl Listener for LocalListener {
    fn accept(&mut self) -> Option<Inbound> {
        let delivery: Option<Delivery> = crossbeam::select! {
            recv(self.private) -> msg => msg.ok(),
            recv(self.shared) -> msg => msg.ok(),
            recv(self.shutdown) -> _ => None,
        };
        let delivery = delivery?;

        Some(Inbound {
            frame: delivery.frame,
            reply: Box::new(LocalReply {
                inner: Arc::clone(&self.inner),
                handle: delivery.handle,
                responder: self.endpoint.clone(),
                responded: false,
            }),
        })
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Drop for LocalListener {
    fn drop(&mut self) {
        // Deregister before draining; no send reaches the private queue
        // once its sender is gone.
        if let Some(instance) = self.endpoint.instance() {
            self.inner.deregister(self.endpoint.directory_key(), instance);
        }
        for d in self.private.try_iter() {
            self.inner
                .fail(d.handle, FaultCode::CONNECT_FAILED, "instance went away before accepting", false);
        }
    }
}

struct LocalReply {
    inner: Arc<Inner>,
    handle: TransportHandle,
    responder: Endpoint,
    responded: bool,
}

impl Reply for LocalReply {
    fn respond(mut self: Box<Self>, frame: Vec<u8>) {
        self.responded = true;
        self.inner.complete(
            self.handle,
            CallState::Ready {
                frame,
                responder: self.responder.clone(),
            },
        );
    }
}

impl Drop for LocalReply {
    fn drop(&mut self) {
        if !self.responded {
            self.inner.fail(
                self.handle,
                FaultCode::INCOMPLETE_RESPONSE,
                "service dropped the request without responding",
                true,
            );
        }
    }
}
