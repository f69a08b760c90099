//! Fault codes and the immutable [`FaultInfo`] value.
//!
//! Every failure the engine reports, whether raised locally by a client
//! session or returned by a remote service, ends up as a `FaultInfo`:
//!
//! ```text
//!   code == 0      no fault, text is empty
//!   code 1..=10    reserved user faults (service side)
//!   code > 10      service-defined faults (e.g. echo's 111)
//!   code < 0       client/library faults (timeouts, usage, routing)
//! ```
//!
//! The numeric values are a stable public enumeration: new codes must use
//! unused numbers.

use core::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Fault codes
// ---------------------------------------------------------------------------

/// Numeric fault code.  Wraps an `i32` so service-defined codes outside the
/// well-known set still round-trip unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaultCode(pub i32);

impl FaultCode {
    pub const NONE: Self = Self(0);

    // Reserved user faults, available to services.
    pub const DESERIALIZE_FAILED: Self = Self(1);
    pub const UNKNOWN_FUNCTION: Self = Self(2);
    pub const REQUEST_TOO_LARGE: Self = Self(3);
    pub const REMOTE_CONNECT_FAILED: Self = Self(4);
    pub const REMOTE_TRANSFER_FAILED: Self = Self(5);

    /// Highest code in the reserved user range.
    pub const MAX_RESERVED_USER: i32 = 10;

    // Client and library faults.
    pub const ALREADY_INITIALIZED: Self = Self(-1);
    pub const NOT_INITIALIZED: Self = Self(-2);
    pub const REQUEST_NOT_ADDED: Self = Self(-3);
    pub const REQUEST_ALREADY_ADDED: Self = Self(-4);
    pub const REQUEST_IN_PROGRESS: Self = Self(-5);
    pub const RESPONSE_IN_PROGRESS: Self = Self(-6);
    pub const BAD_REQUEST_LENGTH: Self = Self(-8);
    pub const NO_AFFINITY: Self = Self(-9);
    pub const NO_WAIT_NOT_ALLOWED: Self = Self(-10);
    pub const NEED_NO_RETRY: Self = Self(-11);
    pub const SESSION_CLOSED: Self = Self(-12);
    pub const CONNECT_FAILED: Self = Self(-16);
    pub const SERVICE_TIMEOUT: Self = Self(-19);
    pub const INCOMPLETE_RESPONSE: Self = Self(-20);
    pub const RESPONSE_PACKET_FORMAT_ERROR: Self = Self(-21);
    pub const CONTEXT_FORMAT_ERROR: Self = Self(-22);
    pub const CONTEXT_RESERVED_NAMESPACE: Self = Self(-23);
    pub const INVALID_ARGUMENT: Self = Self(-24);
    pub const SERVICE_NOT_FOUND: Self = Self(-30);
    pub const SERVICE_KEY_BAD: Self = Self(-31);
    pub const EXCEEDED_RETRY_LIMIT: Self = Self(-43);
    pub const RETRY_NOT_ALLOWED: Self = Self(-44);
    pub const REMOTE_NOT_ALLOWED: Self = Self(-45);
    pub const GET_REQUEST_NOT_NEXT: Self = Self(-53);
    pub const REQUEST_DECODE_FAILED: Self = Self(-57);
    pub const SEND_RESPONSE_NOT_NEXT: Self = Self(-59);
    pub const TRANSPORT_UNAVAILABLE: Self = Self(-997);
    pub const SERIOUS_INTERNAL_OS_ERROR: Self = Self(-998);
    pub const SERIOUS_INTERNAL_ROUTING_ERROR: Self = Self(-999);

    pub const fn value(self) -> i32 {
        self.0
    }

    pub const fn is_fault(self) -> bool {
        self.0 != 0
    }

    /// Codes raised by the library itself rather than by a service.
    pub const fn is_client_fault(self) -> bool {
        self.0 < 0
    }

    /// English name of the code, used by the long rendering.
    pub fn describe(self) -> &'static str {
        match self {
            Self::NONE => "noFault",
            Self::DESERIALIZE_FAILED => "deserializeFailed",
            Self::UNKNOWN_FUNCTION => "unknownFunction",
            Self::REQUEST_TOO_LARGE => "requestTooLarge",
            Self::REMOTE_CONNECT_FAILED => "remoteConnectFailed",
            Self::REMOTE_TRANSFER_FAILED => "remoteTransferFailed",
            Self::ALREADY_INITIALIZED => "alreadyInitialized",
            Self::NOT_INITIALIZED => "notInitialized",
            Self::REQUEST_NOT_ADDED => "requestNotAdded",
            Self::REQUEST_ALREADY_ADDED => "requestAlreadyAdded",
            Self::REQUEST_IN_PROGRESS => "requestInProgress",
            Self::RESPONSE_IN_PROGRESS => "responseInProgress",
            Self::BAD_REQUEST_LENGTH => "badRequestLength",
            Self::NO_AFFINITY => "noAffinity",
            Self::NO_WAIT_NOT_ALLOWED => "noWaitNotAllowed",
            Self::NEED_NO_RETRY => "needNoRetry",
            Self::SESSION_CLOSED => "sessionClosed",
            Self::CONNECT_FAILED => "connectFailed",
            Self::SERVICE_TIMEOUT => "serviceTimeout",
            Self::INCOMPLETE_RESPONSE => "incompleteResponse",
            Self::RESPONSE_PACKET_FORMAT_ERROR => "responsePacketFormatError",
            Self::CONTEXT_FORMAT_ERROR => "contextFormatError",
            Self::CONTEXT_RESERVED_NAMESPACE => "contextReservedNamespace",
            Self::INVALID_ARGUMENT => "invalidArgument",
            Self::SERVICE_NOT_FOUND => "serviceNotFound",
            Self::SERVICE_KEY_BAD => "serviceKeyBad",
            Self::EXCEEDED_RETRY_LIMIT => "exceededRetryLimit",
            Self::RETRY_NOT_ALLOWED => "retryNotAllowed",
            Self::REMOTE_NOT_ALLOWED => "remoteNotAllowed",
            Self::GET_REQUEST_NOT_NEXT => "getRequestNotNext",
            Self::REQUEST_DECODE_FAILED => "requestDecodeFailed",
            Self::SEND_RESPONSE_NOT_NEXT => "sendResponseNotNext",
            Self::TRANSPORT_UNAVAILABLE => "transportUnavailable",
            Self::SERIOUS_INTERNAL_OS_ERROR => "seriousInternalOSError",
            Self::SERIOUS_INTERNAL_ROUTING_ERROR => "seriousInternalRoutingError",
            Self(c) if c > 0 && c <= Self::MAX_RESERVED_USER => "reservedUserFault",
            Self(c) if c > 0 => "serviceFault",
            Self(_) => "unknownClientFault",
        }
    }
}

impl From<i32> for FaultCode {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// FaultInfo
// ---------------------------------------------------------------------------

/// A reported failure: numeric code plus descriptive text.
///
/// `code == 0` if and only if `text` is empty; the constructors enforce it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FaultInfo {
    code: FaultCode,
    text: String,
}

impl FaultInfo {
    /// The "no fault" value.
    pub fn none() -> Self {
        Self::default()
    }

    /// Build a fault.  A zero code yields [`FaultInfo::none`]; an empty
    /// text on a real fault falls back to the code's English name.
    pub fn new(code: impl Into<FaultCode>, text: impl Into<String>) -> Self {
        let code = code.into();
        if !code.is_fault() {
            return Self::none();
        }
        let mut text = text.into();
        if text.is_empty() {
            text = code.describe().to_owned();
        }
        Self { code, text }
    }

    pub fn has_fault(&self) -> bool {
        self.code.is_fault()
    }

    pub fn code(&self) -> FaultCode {
        self.code
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// `"[prefix ]pluton::Fault=<code> '<text>'"`, or empty with no fault.
    pub fn short_message(&self, prefix: &str) -> String {
        self.render(prefix, false)
    }

    /// Like [`short_message`](Self::short_message) with the code's English
    /// name inserted after the number.
    pub fn long_message(&self, prefix: &str) -> String {
        self.render(prefix, true)
    }

    fn render(&self, prefix: &str, long: bool) -> String {
        if !self.has_fault() {
            return String::new();
        }
        let mut out = String::new();
        if !prefix.is_empty() {
            out.push_str(prefix);
            out.push(' ');
        }
        out.push_str("pluton::Fault=");
        out.push_str(&self.code.to_string());
        if long {
            out.push_str(" (");
            out.push_str(self.code.describe());
            out.push(')');
        }
        out.push_str(" '");
        out.push_str(&self.text);
        out.push('\'');
        out
    }
}

impl fmt::Display for FaultInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.long_message(""))
    }
}
