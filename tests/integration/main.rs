//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below exercises one side of the engine end to end over a
//! shared `LocalTransport`, with echo workers running on their own threads.

mod client_tests;
mod concurrency_tests;
mod service_tests;
mod support;
