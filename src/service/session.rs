//! Service-side request loop.
//!
//! ```text
//!                initialize          get_request
//!   Uninitialized ─────────▶ Ready ─────────────▶ Processing
//!                              ▲                     │
//!                              └── send_response ────┤
//!                              └── send_fault ───────┘
//!   Ready / Processing ── terminate or shutdown ──▶ Terminated
//! ```
//!
//! Exactly one of `send_response` / `send_fault` answers each request.  Any
//! call out of order is a usage fault: it is returned as `Err` and also
//! recorded in the session fault.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::codec::{self, PACKET_OVERHEAD, RequestPacket, ResponseBody, ResponsePacket};
use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::fault::{FaultCode, FaultInfo};
use crate::service_key::{SerializationType, ServiceKey};
use crate::transport::{Listener, Reply, Transport};

/// Inbound frames larger than this are refused before decoding.
const MAX_INBOUND_FRAME: usize = crate::config::DEFAULT_MAX_PAYLOAD + PACKET_OVERHEAD;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Uninitialized,
    Ready,
    Processing,
    Terminated,
}

struct Current {
    packet: RequestPacket,
    reply: Box<dyn Reply>,
}

pub struct ServiceSession {
    key: ServiceKey,
    config: ServiceConfig,
    transport: Arc<dyn Transport>,
    listener: Option<Box<dyn Listener>>,
    state: ServiceState,
    current: Option<Current>,
    fault: FaultInfo,
    instance_name: String,
}

impl ServiceSession {
    /// `service_key` may leave the function empty to serve every function.
    pub fn new(transport: Arc<dyn Transport>, service_key: &str) -> Result<Self> {
        Self::with_config(transport, service_key, ServiceConfig::default())
    }

    pub fn with_config(transport: Arc<dyn Transport>, service_key: &str, config: ServiceConfig) -> Result<Self> {
        let key = ServiceKey::parse_service(service_key)?;
        config
            .validate()
            .map_err(|e| Error::validation(FaultCode::INVALID_ARGUMENT, e.to_string()))?;
        Ok(Self {
            key,
            config,
            transport,
            listener: None,
            state: ServiceState::Uninitialized,
            current: None,
            fault: FaultInfo::none(),
            instance_name: String::new(),
        })
    }

    // ── Lifecycle ────────────────────────────────────────────

    /// Register with the transport.  Only valid once.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state != ServiceState::Uninitialized {
            return Err(self.usage(
                FaultCode::ALREADY_INITIALIZED,
                format!("initialize called while {:?}", self.state),
            ));
        }
        let listener = match self.transport.listen(&self.key, &self.config.instance_name) {
            Ok(l) => l,
            Err(fault) => {
                self.fault = fault.clone();
                return Err(Error::Transport(fault));
            }
        };
        self.instance_name = listener.endpoint().name().to_owned();
        self.listener = Some(listener);
        self.state = ServiceState::Ready;
        info!("service '{}': ready as {}", self.key, self.instance_name);
        Ok(())
    }

    /// Block for the next request.  `Ok(false)` means the service was shut
    /// down and the session is now Terminated.
    pub fn get_request(&mut self) -> Result<bool> {
        match self.state {
            ServiceState::Ready => {}
            ServiceState::Terminated => return Ok(false),
            ServiceState::Uninitialized => {
                return Err(self.usage(FaultCode::NOT_INITIALIZED, "get_request before initialize"));
            }
            ServiceState::Processing => {
                return Err(self.usage(
                    FaultCode::GET_REQUEST_NOT_NEXT,
                    "get_request called before the current request was answered",
                ));
            }
        }

        loop {
            let inbound = match self.listener.as_mut().and_then(|l| l.accept()) {
                Some(inbound) => inbound,
                None => {
                    debug!("service '{}': shutdown signalled", self.instance_name);
                    self.terminate();
                    return Ok(false);
                }
            };

            match codec::decode_frame::<RequestPacket>(&inbound.frame, MAX_INBOUND_FRAME) {
                Ok(packet) => {
                    self.current = Some(Current {
                        packet,
                        reply: inbound.reply,
                    });
                    self.state = ServiceState::Processing;
                    return Ok(true);
                }
                Err(e) => {
                    warn!("service '{}': dropping undecodable request: {e}", self.instance_name);
                    let response = ResponsePacket {
                        request_id: 0,
                        client_name: String::new(),
                        service_name: self.instance_name.clone(),
                        body: ResponseBody::Fault(FaultInfo::new(
                            FaultCode::REQUEST_DECODE_FAILED,
                            e.to_string(),
                        )),
                    };
                    if let Ok(frame) = codec::encode_frame(&response, PACKET_OVERHEAD) {
                        inbound.reply.respond(frame);
                    }
                }
            }
        }
    }

    /// Answer the current request with `payload`.
    ///
    /// A payload above `max_response_size` is replaced by a
    /// `requestTooLarge` fault to the client; the cycle still completes and
    /// this returns a validation error.
    pub fn send_response(&mut self, payload: &[u8]) -> Result<()> {
        let current = self.take_current("send_response")?;
        if payload.len() > self.config.max_response_size {
            let fault = FaultInfo::new(
                FaultCode::REQUEST_TOO_LARGE,
                format!(
                    "response of {} bytes exceeds the {} byte limit",
                    payload.len(),
                    self.config.max_response_size
                ),
            );
            self.respond(current, ResponseBody::Fault(fault.clone()));
            return Err(Error::Validation(fault));
        }
        self.respond(current, ResponseBody::Data(payload.to_vec()));
        Ok(())
    }

    /// Answer the current request with a service fault.  `code` must be
    /// non-zero and fit a signed 32-bit fault code.
    pub fn send_fault(&mut self, code: u32, text: &str) -> Result<()> {
        let Ok(code) = i32::try_from(code) else {
            return Err(Error::validation(
                FaultCode::INVALID_ARGUMENT,
                format!("fault code {code} is out of range"),
            ));
        };
        if code == 0 {
            return Err(Error::validation(
                FaultCode::INVALID_ARGUMENT,
                "fault code must be non-zero",
            ));
        }
        let current = self.take_current("send_fault")?;
        self.respond(current, ResponseBody::Fault(FaultInfo::new(code, text)));
        Ok(())
    }

    /// Stop serving and release the listener.  A request still being
    /// processed is answered with `sessionClosed`.  Idempotent.
    pub fn terminate(&mut self) {
        if self.state == ServiceState::Terminated {
            return;
        }
        if let Some(current) = self.current.take() {
            self.respond(
                current,
                ResponseBody::Fault(FaultInfo::new(
                    FaultCode::SESSION_CLOSED,
                    "service terminated while processing the request",
                )),
            );
        }
        self.listener = None;
        self.state = ServiceState::Terminated;
        debug!("service '{}': terminated", self.key);
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    /// Name reported to clients; set by `initialize`.
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn has_fault(&self) -> bool {
        self.fault.has_fault()
    }

    pub fn fault(&self) -> &FaultInfo {
        &self.fault
    }

    // ── Current request accessors ────────────────────────────

    fn current(&self) -> Result<&RequestPacket> {
        self.current.as_ref().map(|c| &c.packet).ok_or_else(|| {
            Error::usage(
                FaultCode::REQUEST_NOT_ADDED,
                "no request is being processed",
            )
        })
    }

    /// The key the client asked for, e.g. `system.echo.0.raw`.
    pub fn service_key(&self) -> Result<String> {
        Ok(self.current()?.service_key.to_string())
    }

    pub fn service_application(&self) -> Result<&str> {
        Ok(self.current()?.service_key.application())
    }

    pub fn service_function(&self) -> Result<&str> {
        Ok(self.current()?.service_key.function())
    }

    pub fn service_version(&self) -> Result<u32> {
        Ok(self.current()?.service_key.version())
    }

    pub fn serialization_type(&self) -> Result<SerializationType> {
        Ok(self.current()?.service_key.serialization())
    }

    pub fn client_name(&self) -> Result<&str> {
        Ok(&self.current()?.client_name)
    }

    pub fn request_payload(&self) -> Result<&[u8]> {
        Ok(&self.current()?.payload)
    }

    pub fn context(&self, key: &str) -> Result<Option<&str>> {
        Ok(self.current()?.context.get(key))
    }

    // ── Internals ────────────────────────────────────────────

    fn usage(&mut self, code: FaultCode, text: impl Into<String>) -> Error {
        let err = Error::usage(code, text);
        warn!("service '{}': {err}", self.key);
        self.fault = err.fault().clone();
        err
    }

    fn take_current(&mut self, op: &str) -> Result<Current> {
        match self.current.take() {
            Some(c) if self.state == ServiceState::Processing => Ok(c),
            other => {
                self.current = other;
                Err(self.usage(
                    FaultCode::SEND_RESPONSE_NOT_NEXT,
                    format!("{op} called while {:?}", self.state),
                ))
            }
        }
    }

    fn respond(&mut self, current: Current, body: ResponseBody) {
        let packet = ResponsePacket {
            request_id: current.packet.request_id,
            client_name: current.packet.client_name,
            service_name: self.instance_name.clone(),
            body,
        };
        // The reply is dropped without a frame if encoding fails, which the
        // client sees as an incomplete response.
        match codec::encode_frame(&packet, self.config.max_response_size + PACKET_OVERHEAD) {
            Ok(frame) => current.reply.respond(frame),
            Err(e) => warn!("service '{}': cannot encode response: {e}", self.instance_name),
        }
        if self.state == ServiceState::Processing {
            self.state = ServiceState::Ready;
        }
    }
}

impl Drop for ServiceSession {
    fn drop(&mut self) {
        self.terminate();
    }
}
