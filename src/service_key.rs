//! Service key grammar: `Application.Function.Version.Serialization`.
//!
//! ```text
//!   system . echo . 0 . raw
//!   ──┬───   ──┬─   ┬   ─┬─
//!     │        │    │    └─ serialization type (long or one-letter form)
//!     │        │    └────── 1-6 digits, no leading zero unless "0"
//!     │        └─────────── 1-32 chars (may be empty for a service wildcard)
//!     └──────────────────── 1-32 chars
//! ```
//!
//! Clients must name every component.  Services may register with an empty
//! function, which then matches every function of that application.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::fault::FaultCode;

const MAX_NAME_LEN: usize = 32;
const MAX_VERSION_DIGITS: usize = 6;

// ── Serialization type ───────────────────────────────────────

/// Payload serialization advertised by a service key.  The engine treats
/// payloads as opaque bytes; this only takes part in routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SerializationType {
    Cobol,
    Html,
    Jms,
    Json,
    NetString,
    Php,
    Soap,
    Xml,
    Raw,
}

impl SerializationType {
    pub const ALL: [Self; 9] = [
        Self::Cobol,
        Self::Html,
        Self::Jms,
        Self::Json,
        Self::NetString,
        Self::Php,
        Self::Soap,
        Self::Xml,
        Self::Raw,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Cobol => "cobol",
            Self::Html => "html",
            Self::Jms => "jms",
            Self::Json => "json",
            Self::NetString => "netstring",
            Self::Php => "php",
            Self::Soap => "soap",
            Self::Xml => "xml",
            Self::Raw => "raw",
        }
    }

    pub fn letter(self) -> char {
        match self {
            Self::Cobol => 'c',
            Self::Html => 'h',
            Self::Jms => 'm',
            Self::Json => 'j',
            Self::NetString => 'n',
            Self::Php => 'p',
            Self::Soap => 's',
            Self::Xml => 'x',
            Self::Raw => 'r',
        }
    }

    /// Accepts the long name or the one-letter form, case-insensitively.
    pub fn from_token(token: &str) -> Option<Self> {
        let mut chars = token.chars();
        let letter = match (chars.next(), chars.next()) {
            (Some(c), None) => Some(c.to_ascii_lowercase()),
            _ => None,
        };
        Self::ALL
            .into_iter()
            .find(|t| token.eq_ignore_ascii_case(t.name()) || letter == Some(t.letter()))
    }
}

impl fmt::Display for SerializationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Service key ──────────────────────────────────────────────

/// A parsed, validated service key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceKey {
    application: String,
    function: String,
    version: u32,
    serialization: SerializationType,
}

impl ServiceKey {
    /// Parse a key as a client names it: every component required.
    pub fn parse_client(key: &str) -> Result<Self, Error> {
        Self::parse(key, true)
    }

    /// Parse a key as a service registers it: the function may be empty.
    pub fn parse_service(key: &str) -> Result<Self, Error> {
        Self::parse(key, false)
    }

    fn parse(key: &str, client: bool) -> Result<Self, Error> {
        let bad = |why: &str| Error::validation(FaultCode::SERVICE_KEY_BAD, format!("'{key}': {why}"));

        let tokens: Vec<&str> = key.split('.').collect();
        if tokens.len() < 4 {
            return Err(bad("need four dot-separated tokens"));
        }
        if tokens.len() > 4 {
            return Err(bad("more than four dot-separated tokens"));
        }
        let (application, function, version, serialization) = (tokens[0], tokens[1], tokens[2], tokens[3]);

        if application.is_empty() || application.len() > MAX_NAME_LEN {
            return Err(bad("application name length is not in the range 1-32"));
        }
        if client && function.is_empty() {
            return Err(bad("function name is zero length"));
        }
        if function.len() > MAX_NAME_LEN {
            return Err(bad("function name is longer than 32 characters"));
        }
        if version.is_empty() || version.len() > MAX_VERSION_DIGITS {
            return Err(bad("version length is not in the range 1-6"));
        }
        if version.len() > 1 && version.starts_with('0') {
            return Err(bad("version has ambiguous leading zero"));
        }
        if !version.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad("version is not a positive integer"));
        }
        let version: u32 = version
            .parse()
            .map_err(|_| bad("version is not a positive integer"))?;
        if serialization.is_empty() {
            return Err(bad("serialization is zero length"));
        }
        let serialization =
            SerializationType::from_token(serialization).ok_or_else(|| bad("serialization type is unrecognized"))?;

        Ok(Self {
            application: application.to_owned(),
            function: function.to_owned(),
            version,
            serialization,
        })
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn serialization(&self) -> SerializationType {
        self.serialization
    }

    /// True for a service registration that serves every function.
    pub fn is_wildcard(&self) -> bool {
        self.function.is_empty()
    }

    /// Directory lookup key: `app.serialization.version[.function]`.
    pub fn search_key(&self) -> String {
        let mut sk = format!("{}.{}.{}", self.application, self.serialization, self.version);
        if !self.function.is_empty() {
            sk.push('.');
            sk.push_str(&self.function);
        }
        sk
    }

    /// The same key with the function dropped, for wildcard lookups.
    pub fn wildcard(&self) -> Self {
        Self {
            function: String::new(),
            ..self.clone()
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.application, self.function, self.version, self.serialization
        )
    }
}

impl FromStr for ServiceKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_client(s)
    }
}
