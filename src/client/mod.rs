//! Client side: requests and the session that drives them.
//!
//! ```text
//!   ClientRequest ──add_request──▶ ClientSession ──send/poll──▶ Transport
//!        ▲                              │
//!        └──── state, response, fault ◀─┘
//! ```

pub mod request;
pub mod session;

pub use request::{Attribute, Attributes, ClientRequest, RequestState};
pub use session::ClientSession;
