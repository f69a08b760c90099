//! Namespaced key/value context attached to a request.
//!
//! Keys beginning with [`RESERVED_PREFIX`] belong to the engine; callers
//! cannot set them.  A rejected `set` leaves the map untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::fault::FaultCode;

/// Namespace reserved for internal use.
pub const RESERVED_PREFIX: &str = "pluton.";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    entries: BTreeMap<String, String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `key`.  Fails with `invalidArgument`-class
    /// validation errors for empty or reserved keys, naming the key.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), Error> {
        if key.is_empty() {
            return Err(Error::validation(
                FaultCode::CONTEXT_FORMAT_ERROR,
                "context key is empty",
            ));
        }
        if key.starts_with(RESERVED_PREFIX) {
            return Err(Error::validation(
                FaultCode::CONTEXT_RESERVED_NAMESPACE,
                format!("context key '{key}' is in the reserved '{RESERVED_PREFIX}' namespace"),
            ));
        }
        self.entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
