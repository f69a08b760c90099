//! Service sessions driven by real clients: dispatch on function, multiple
//! instances, shutdown, and undecodable input.

use std::thread;
use std::time::Duration;

use pluton::codec::ResponseBody;
use pluton::service::echo::CTX_SLEEP_MS;
use pluton::transport::{CompletionNotifier, PollOutcome, Transport};
use pluton::config::DEFAULT_MAX_PAYLOAD;
use pluton::{
    ClientConfig, ClientRequest, ClientSession, FaultCode, LocalTransport, RequestState,
    ServiceKey, ServiceSession, ServiceState,
};

use crate::support::{ECHO, EchoPool, decode_response};

#[test]
fn wildcard_service_dispatches_on_function() {
    let t = LocalTransport::new();
    let mut s = ServiceSession::new(t.shared(), "text..1.raw").unwrap();
    s.initialize().unwrap();
    let worker = thread::spawn(move || {
        let mut served = 0;
        while s.get_request().unwrap() {
            let data = s.request_payload().unwrap().to_vec();
            let function = s.service_function().unwrap().to_owned();
            let out = match function.as_str() {
                "upper" => data.to_ascii_uppercase(),
                "lower" => data.to_ascii_lowercase(),
                _ => {
                    s.send_fault(2, "no such function").unwrap();
                    continue;
                }
            };
            s.send_response(&out).unwrap();
            served += 1;
        }
        served
    });

    let mut c = ClientSession::new(t.shared(), "text", 2000);
    let up = ClientRequest::new();
    let down = ClientRequest::new();
    let bad = ClientRequest::new();
    for r in [&up, &down, &bad] {
        r.set_request_data(b"MiXeD").unwrap();
    }
    c.add_request("text.upper.1.raw", &up).unwrap();
    c.add_request("text.lower.1.raw", &down).unwrap();
    c.add_request("text.reverse.1.raw", &bad).unwrap();
    assert_eq!(c.execute_and_wait_all().unwrap(), 3);

    assert_eq!(up.response_data().unwrap(), b"MIXED");
    assert_eq!(down.response_data().unwrap(), b"mixed");
    assert_eq!(bad.fault_code(), FaultCode::UNKNOWN_FUNCTION);

    // Other versions are not served by the wildcard.
    let other = ClientRequest::new();
    let err = c.add_request("text.upper.2.raw", &other).unwrap_err();
    assert_eq!(err.code(), FaultCode::SERVICE_NOT_FOUND);

    t.shutdown_service("text..1.raw").unwrap();
    assert_eq!(worker.join().unwrap(), 2);
}

#[test]
fn exact_registration_wins_over_wildcard() {
    let t = LocalTransport::new();
    let wildcard = EchoPool::start(&t, "system..0.raw", 1);
    let exact = EchoPool::start(&t, ECHO, 1);
    let mut c = ClientSession::new(t.shared(), "pick", 2000);

    let r = ClientRequest::new();
    c.add_request(ECHO, &r).unwrap();
    c.execute_and_wait_one(&r).unwrap();
    assert_eq!(r.service_name(), exact.names()[0]);

    let w = ClientRequest::new();
    c.add_request("system.other.0.raw", &w).unwrap();
    c.execute_and_wait_one(&w).unwrap();
    assert_eq!(w.service_name(), wildcard.names()[0]);

    exact.stop();
    wildcard.stop();
}

#[test]
fn instance_names_follow_the_key() {
    let t = LocalTransport::new();
    let pool = EchoPool::start(&t, ECHO, 3);
    assert_eq!(t.instance_count(ECHO), 3);
    for name in pool.names() {
        assert!(name.starts_with("system.echo.0.raw/"), "{name}");
    }
    let mut unique = pool.names().to_vec();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 3);
    pool.stop();
    assert_eq!(t.instance_count(ECHO), 0);
}

#[test]
fn shutdown_lets_in_flight_work_finish() {
    let t = LocalTransport::new();
    let pool = EchoPool::start(&t, ECHO, 1);
    let mut c = ClientSession::new(t.shared(), "drain", 2000);

    let r = ClientRequest::new();
    r.set_context(CTX_SLEEP_MS, "100").unwrap();
    r.set_request_data(b"late").unwrap();
    c.add_request(ECHO, &r).unwrap();
    c.execute_and_wait_sent().unwrap();

    // Give the worker time to pick the request up before stopping it.
    thread::sleep(Duration::from_millis(30));
    let stopper = thread::spawn(move || pool.stop());
    c.execute_and_wait_one(&r).unwrap();
    assert_eq!(r.response_data().unwrap(), b"late");
    assert_eq!(stopper.join().unwrap().requests, 1);

    // Nothing serves the key any more.
    let after = ClientRequest::new();
    assert_eq!(
        c.add_request(ECHO, &after).unwrap_err().code(),
        FaultCode::SERVICE_NOT_FOUND
    );
}

#[test]
fn dropping_a_processing_session_answers_session_closed() {
    let t = LocalTransport::new();
    let mut s = ServiceSession::new(t.shared(), ECHO).unwrap();
    s.initialize().unwrap();
    let mut c = ClientSession::new(t.shared(), "closed", 2000);

    let r = ClientRequest::new();
    c.add_request(ECHO, &r).unwrap();
    c.execute_and_wait_sent().unwrap();
    assert!(s.get_request().unwrap());
    assert_eq!(s.state(), ServiceState::Processing);
    drop(s);

    c.execute_and_wait_one(&r).unwrap();
    assert_eq!(r.fault_code(), FaultCode::SESSION_CLOSED);
}

#[test]
fn undecodable_request_is_answered_and_skipped() {
    let t = LocalTransport::new();
    let pool = EchoPool::start(&t, ECHO, 1);

    let endpoint = t.resolve(&ServiceKey::parse_client(ECHO).unwrap()).unwrap();
    let (notifier, rx) = CompletionNotifier::channel();
    let handle = t.send(&endpoint, vec![1, 0, 0, 0, 0xff], notifier).unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), handle);

    let PollOutcome::Ready { frame, .. } = t.poll(handle) else {
        panic!("expected a response");
    };
    match decode_response(&frame).body {
        ResponseBody::Fault(f) => assert_eq!(f.code(), FaultCode::REQUEST_DECODE_FAILED),
        ResponseBody::Data(_) => panic!("garbage was echoed"),
    }

    // The worker keeps serving.
    let mut c = ClientSession::new(t.shared(), "after", 2000);
    let r = ClientRequest::new();
    r.set_request_data(b"still here").unwrap();
    c.add_request(ECHO, &r).unwrap();
    c.execute_and_wait_one(&r).unwrap();
    assert_eq!(r.response_data().unwrap(), b"still here");
    assert_eq!(pool.stop().requests, 1);
}

#[test]
fn request_beyond_the_service_limit_faults_as_undecodable() {
    let t = LocalTransport::new();
    let pool = EchoPool::start(&t, ECHO, 1);
    let config = ClientConfig {
        max_request_size: DEFAULT_MAX_PAYLOAD * 12 / 10,
        ..ClientConfig::default()
    };
    let mut c = ClientSession::with_config(t.shared(), "big", config).unwrap();

    let r = ClientRequest::new();
    r.set_request_data(&vec![7u8; DEFAULT_MAX_PAYLOAD + 200_000]).unwrap();
    c.add_request(ECHO, &r).unwrap();
    c.execute_and_wait_one(&r).unwrap();

    assert_eq!(r.state(), RequestState::Faulted);
    assert_eq!(r.fault_code(), FaultCode::REQUEST_DECODE_FAILED);
    assert!(!c.has_fault());
    assert_eq!(pool.stop().requests, 0);
}
