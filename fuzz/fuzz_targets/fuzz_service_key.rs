//! Fuzz target: `ServiceKey` parsing
//!
//! Any accepted key renders back to text that parses to the same key, and
//! every client-valid key is also service-valid.
//!
//! cargo fuzz run fuzz_service_key

#![no_main]

use libfuzzer_sys::fuzz_target;
use pluton::ServiceKey;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(key) = ServiceKey::parse_client(text) {
        assert!(ServiceKey::parse_service(text).is_ok());
        let again = ServiceKey::parse_client(&key.to_string()).expect("rendered key must parse");
        assert_eq!(key, again);
    }
    if let Ok(key) = ServiceKey::parse_service(text) {
        let again = ServiceKey::parse_service(&key.to_string()).expect("rendered key must parse");
        assert_eq!(key, again);
        assert_eq!(key.is_wildcard(), key.function().is_empty());
    }
});
