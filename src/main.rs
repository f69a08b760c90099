//! Pluton demo: echo round trips over the in-process transport.
//!
//! ```text
//!   client thread 0 ─┐                      ┌─ echo worker 0
//!   client thread 1 ─┼──▶ LocalTransport ───┼─ echo worker 1
//!   client thread N ─┘   (shared queue)     └─ echo worker M
//! ```
//!
//! Each client thread runs `--cycles` scatter-gather rounds of
//! `--requests` echo calls and checks every payload comes back intact.

use std::thread;
use std::time::Instant;

use anyhow::{Context, Result, bail, ensure};
use clap::Parser;
use log::{info, warn};

use pluton::service::echo::CTX_SLEEP_MS;
use pluton::{
    ClientConfig, ClientRequest, ClientSession, EchoStats, LocalTransport, ServiceSession, run_echo,
};

#[derive(Parser, Debug)]
#[command(name = "pluton")]
#[command(about = "Scatter-gather echo round trips over the in-process transport")]
struct Cli {
    /// Echo service worker threads
    #[arg(short = 'w', long, default_value = "4")]
    workers: usize,

    /// Client threads
    #[arg(short = 't', long, default_value = "7")]
    threads: usize,

    /// Rounds per client thread
    #[arg(short = 'c', long, default_value = "100")]
    cycles: usize,

    /// Requests added per round
    #[arg(short = 'r', long, default_value = "8")]
    requests: usize,

    /// Request payload size in bytes
    #[arg(short = 's', long, default_value = "64")]
    payload_size: usize,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value = "4000")]
    timeout_ms: u32,

    /// Milliseconds the echo service sleeps per request
    #[arg(long, default_value = "0")]
    service_sleep_ms: u32,

    /// Service key the workers register and the clients call
    #[arg(short = 'k', long, default_value = "system.echo.0.raw")]
    key: String,

    /// Client session configuration as JSON; missing fields take defaults
    #[arg(long)]
    client_config: Option<String>,
}

#[derive(Debug, Default, Clone, Copy)]
struct ClientStats {
    ok: u64,
    faults: u64,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    ensure!(cli.workers > 0, "--workers must be at least 1");
    ensure!(cli.requests > 0, "--requests must be at least 1");

    let client_config = match &cli.client_config {
        Some(json) => ClientConfig::from_json_str(json).context("--client-config")?,
        None => ClientConfig {
            default_timeout_ms: cli.timeout_ms,
            ..ClientConfig::default()
        },
    };

    info!("pluton v{}", env!("CARGO_PKG_VERSION"));
    let transport = LocalTransport::new();

    // ── Echo workers ──────────────────────────────────────────
    //
    // Sessions register in this thread so no client can race ahead of the
    // first registration.
    let mut workers = Vec::with_capacity(cli.workers);
    for i in 0..cli.workers {
        let mut session = ServiceSession::new(transport.shared(), &cli.key)
            .with_context(|| format!("service key '{}'", cli.key))?;
        session
            .initialize()
            .with_context(|| format!("initializing echo worker {i}"))?;
        workers.push(
            thread::Builder::new()
                .name(format!("echo-{i}"))
                .spawn(move || run_echo(&mut session))
                .context("spawning echo worker")?,
        );
    }

    // ── Clients ───────────────────────────────────────────────
    let started = Instant::now();
    let mut clients = Vec::with_capacity(cli.threads);
    for i in 0..cli.threads {
        let transport = transport.shared();
        let config = client_config.clone();
        let key = cli.key.clone();
        let (cycles, requests, size, sleep) =
            (cli.cycles, cli.requests, cli.payload_size, cli.service_sleep_ms);
        clients.push(
            thread::Builder::new()
                .name(format!("client-{i}"))
                .spawn(move || -> Result<ClientStats> {
                    let mut session = ClientSession::with_config(transport, &format!("client-{i}"), config)?;
                    run_client(&mut session, &key, i, cycles, requests, size, sleep)
                })
                .context("spawning client thread")?,
        );
    }

    let mut totals = ClientStats::default();
    let mut failed = 0;
    for handle in clients {
        match handle.join() {
            Ok(Ok(stats)) => {
                totals.ok += stats.ok;
                totals.faults += stats.faults;
            }
            Ok(Err(e)) => {
                warn!("client: {e:#}");
                failed += 1;
            }
            Err(_) => {
                warn!("client: thread panicked");
                failed += 1;
            }
        }
    }
    let elapsed = started.elapsed();

    transport
        .shutdown_service(&cli.key)
        .context("stopping echo workers")?;
    let mut served = EchoStats::default();
    for handle in workers {
        let stats = match handle.join() {
            Ok(stats) => stats.context("echo worker")?,
            Err(_) => bail!("echo worker panicked"),
        };
        served.requests += stats.requests;
        served.bytes += stats.bytes;
        served.faults += stats.faults;
    }

    let rate = totals.ok as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    info!(
        "done: {} ok, {} faulted, {} served ({} bytes) in {:.3}s ({rate:.0} req/s)",
        totals.ok,
        totals.faults,
        served.requests,
        served.bytes,
        elapsed.as_secs_f64()
    );
    println!(
        "{} round trips, {} faults, {:.3}s, {rate:.0} req/s",
        totals.ok,
        totals.faults,
        elapsed.as_secs_f64()
    );

    ensure!(failed == 0, "{failed} client thread(s) failed");
    Ok(())
}

/// Run `cycles` rounds of `requests` echo calls.  Every response must match
/// the payload that was sent.
fn run_client(
    session: &mut ClientSession,
    key: &str,
    thread: usize,
    cycles: usize,
    requests: usize,
    size: usize,
    sleep_ms: u32,
) -> Result<ClientStats> {
    let mut stats = ClientStats::default();
    let batch: Vec<ClientRequest> = (0..requests).map(|_| ClientRequest::new()).collect();

    for cycle in 0..cycles {
        for (n, req) in batch.iter().enumerate() {
            req.reset()?;
            req.set_request_data(&payload(thread, cycle, n, size))?;
            if sleep_ms > 0 {
                req.set_context(CTX_SLEEP_MS, &sleep_ms.to_string())?;
            }
            req.set_client_handle(n as u64);
            session.add_request(key, req)?;
        }

        session.execute_and_wait_all()?;

        for (n, req) in batch.iter().enumerate() {
            match req.response_data() {
                Ok(data) => {
                    if data != payload(thread, cycle, n, size) {
                        bail!("cycle {cycle}: request {n} came back corrupted");
                    }
                    stats.ok += 1;
                }
                Err(e) => {
                    warn!("client-{thread}: cycle {cycle} request {n}: {e}");
                    stats.faults += 1;
                }
            }
        }
    }

    if session.has_fault() {
        warn!("client-{thread}: {}", session.fault());
    }
    Ok(stats)
}

/// Deterministic per-request payload so responses can be checked.
fn payload(thread: usize, cycle: usize, n: usize, size: usize) -> Vec<u8> {
    let seed = (thread * 31 + cycle * 7 + n) as u8;
    (0..size).map(|i| seed.wrapping_add(i as u8)).collect()
}
