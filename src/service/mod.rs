//! Service side: the request loop and the reference echo service.

pub mod echo;
pub mod session;

pub use echo::{EchoStats, run_echo};
pub use session::{ServiceSession, ServiceState};
