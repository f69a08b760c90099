//! Many client threads against a shared echo pool.  No response may leak
//! into another thread's session or another request.

use std::thread;

use pluton::service::echo::CTX_SLEEP_MS;
use pluton::{ClientRequest, ClientSession, FaultCode, LocalTransport, RequestState};

use crate::support::{ECHO, EchoPool};

const THREADS: usize = 7;
const CYCLES: usize = 100;
const BATCH: usize = 4;

fn payload(thread: usize, cycle: usize, n: usize) -> Vec<u8> {
    format!("t{thread}-c{cycle}-r{n}").into_bytes()
}

#[test]
fn seven_threads_hundred_cycles_no_leakage() {
    let t = LocalTransport::new();
    let pool = EchoPool::start(&t, ECHO, 3);

    let clients: Vec<_> = (0..THREADS)
        .map(|id| {
            let transport = t.shared();
            thread::spawn(move || {
                let mut c = ClientSession::new(transport, &format!("client-{id}"), 4000);
                let batch: Vec<ClientRequest> = (0..BATCH).map(|_| ClientRequest::new()).collect();
                for cycle in 0..CYCLES {
                    for (n, r) in batch.iter().enumerate() {
                        r.reset().unwrap();
                        r.set_request_data(&payload(id, cycle, n)).unwrap();
                        r.set_client_handle(n as u64);
                        c.add_request(ECHO, r).unwrap();
                    }
                    let mut seen = [false; BATCH];
                    while let Some(handle) = c.execute_and_wait_any().unwrap() {
                        let n = handle as usize;
                        assert!(!seen[n], "handle {n} reported twice");
                        seen[n] = true;
                        assert_eq!(batch[n].response_data().unwrap(), payload(id, cycle, n));
                    }
                    assert!(seen.iter().all(|s| *s));
                }
                assert!(!c.has_fault());
            })
        })
        .collect();

    for c in clients {
        c.join().unwrap();
    }
    let stats = pool.stop();
    assert_eq!(stats.requests, (THREADS * CYCLES * BATCH) as u64);
    assert_eq!(stats.faults, 0);
}

#[test]
fn abandoned_requests_do_not_disturb_the_session() {
    let t = LocalTransport::new();
    let pool = EchoPool::start(&t, ECHO, 2);
    let mut c = ClientSession::new(t.shared(), "leaky", 2000);

    let keep = ClientRequest::new();
    keep.set_request_data(b"kept").unwrap();
    keep.set_client_handle(1);
    c.add_request(ECHO, &keep).unwrap();
    {
        let lost = ClientRequest::new();
        lost.set_client_handle(2);
        lost.set_context(CTX_SLEEP_MS, "20").unwrap();
        c.add_request(ECHO, &lost).unwrap();
        c.execute_and_wait_sent().unwrap();
    }

    assert_eq!(c.execute_and_wait_any().unwrap(), Some(1));
    assert_eq!(c.execute_and_wait_any().unwrap(), None);
    assert_eq!(keep.response_data().unwrap(), b"kept");
    pool.stop();
}

#[test]
fn dropping_session_mid_flight_faults_its_requests() {
    let t = LocalTransport::new();
    let pool = EchoPool::start(&t, ECHO, 1);

    let r = ClientRequest::new();
    r.set_context(CTX_SLEEP_MS, "50").unwrap();
    {
        let mut c = ClientSession::new(t.shared(), "short-lived", 2000);
        c.add_request(ECHO, &r).unwrap();
        c.execute_and_wait_sent().unwrap();
    }
    assert_eq!(r.state(), RequestState::Faulted);
    assert_eq!(r.fault_code(), FaultCode::SESSION_CLOSED);

    // The late answer is discarded by the transport.
    pool.stop();
    assert_eq!(r.fault_code(), FaultCode::SESSION_CLOSED);
}
