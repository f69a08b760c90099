//! Reference echo service.
//!
//! Returns every payload unchanged.  Clients steer it through context:
//!
//! | key               | effect                                       |
//! |-------------------|----------------------------------------------|
//! | `echo.sleepMS`    | sleep before answering (negative: fault 111) |
//! | `echo.sleepAfter` | sleep this many seconds after answering      |
//! | `echo.log`        | log the request at debug level               |

use std::thread;
use std::time::Duration;

use log::{Level, debug, log};

use super::session::ServiceSession;
use crate::error::Result;

/// Fault raised for a negative `echo.sleepMS`.
pub const SLEEP_NEGATIVE_FAULT: u32 = 111;

pub const CTX_SLEEP_MS: &str = "echo.sleepMS";
pub const CTX_SLEEP_AFTER: &str = "echo.sleepAfter";
pub const CTX_LOG: &str = "echo.log";

/// Level of the per-request line enabled by `echo.log`.
pub const REQUEST_LOG_LEVEL: Level = Level::Debug;

/// What one `run_echo` loop handled before its service was shut down.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EchoStats {
    pub requests: u64,
    pub bytes: u64,
    pub faults: u64,
}

/// Serve `session` until it is terminated.  The session must already be
/// initialized.
pub fn run_echo(session: &mut ServiceSession) -> Result<EchoStats> {
    let mut stats = EchoStats::default();

    while session.get_request()? {
        stats.requests += 1;

        let sleep_ms = context_int(session, CTX_SLEEP_MS)?;
        let sleep_after = context_int(session, CTX_SLEEP_AFTER)?;
        let payload = session.request_payload()?.to_vec();

        if session.context(CTX_LOG)?.is_some() {
            log!(
                REQUEST_LOG_LEVEL,
                "echo: {} bytes from '{}' via {}",
                payload.len(),
                session.client_name()?,
                session.service_key()?
            );
        }

        if sleep_ms < 0 {
            session.send_fault(SLEEP_NEGATIVE_FAULT, "sleep time negative")?;
            stats.faults += 1;
            continue;
        }
        if sleep_ms > 0 {
            thread::sleep(Duration::from_millis(sleep_ms.unsigned_abs()));
        }

        match session.send_response(&payload) {
            Ok(()) => stats.bytes += payload.len() as u64,
            // Oversize: the client already got requestTooLarge.
            Err(e) if e.is_validation() => {
                debug!("echo '{}': {e}", session.instance_name());
                stats.faults += 1;
            }
            Err(e) => return Err(e),
        }

        if sleep_after > 0 {
            thread::sleep(Duration::from_secs(sleep_after.unsigned_abs()));
        }
    }

    debug!(
        "echo '{}': stopped after {} requests",
        session.instance_name(),
        stats.requests
    );
    Ok(stats)
}

/// Unparseable values count as 0.
fn context_int(session: &ServiceSession, key: &str) -> Result<i64> {
    Ok(session
        .context(key)?
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0))
}
