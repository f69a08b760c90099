//! Client-side behaviour against live echo workers and hand-driven raw
//! listeners.

use std::thread;
use std::time::{Duration, Instant};

use pluton::service::echo::{CTX_SLEEP_MS, SLEEP_NEGATIVE_FAULT};
use pluton::transport::{Listener, Reply, Transport};
use pluton::{
    Attribute, ClientRequest, ClientSession, FaultCode, LocalTransport, RequestState, ServiceKey,
};

use crate::support::{ECHO, EchoPool, data_response, decode_request};

fn listen_raw(t: &LocalTransport, name: &str) -> Box<dyn Listener> {
    t.listen(&ServiceKey::parse_service(ECHO).unwrap(), name).unwrap()
}

// ── Wait primitives ──────────────────────────────────────────

#[test]
fn wait_all_echoes_every_payload() {
    let t = LocalTransport::new();
    let pool = EchoPool::start(&t, ECHO, 2);
    let mut c = ClientSession::new(t.shared(), "all", 2000);

    let reqs: Vec<ClientRequest> = (0..10).map(|_| ClientRequest::new()).collect();
    for (i, r) in reqs.iter().enumerate() {
        r.set_request_data(format!("payload-{i}").as_bytes()).unwrap();
        c.add_request(ECHO, r).unwrap();
        assert_eq!(r.state(), RequestState::Queued);
    }
    assert_eq!(c.execute_and_wait_all().unwrap(), 10);
    assert_eq!(c.outstanding_count(), 0);

    for (i, r) in reqs.iter().enumerate() {
        assert_eq!(r.state(), RequestState::Completed);
        assert_eq!(r.response_data().unwrap(), format!("payload-{i}").into_bytes());
        assert!(pool.names().contains(&r.service_name()));
    }
    assert!(!c.has_fault());
    assert_eq!(pool.stop().requests, 10);
}

#[test]
fn wait_any_reports_in_completion_order() {
    let t = LocalTransport::new();
    let pool = EchoPool::start(&t, ECHO, 3);
    let mut c = ClientSession::new(t.shared(), "any", 2000);

    let slow = ClientRequest::new();
    let medium = ClientRequest::new();
    let fast = ClientRequest::new();
    for (r, handle, sleep) in [(&slow, 3, "400"), (&medium, 2, "200"), (&fast, 1, "0")] {
        r.set_client_handle(handle);
        r.set_context(CTX_SLEEP_MS, sleep).unwrap();
        assert_eq!(c.add_request(ECHO, r).unwrap(), handle);
    }

    assert_eq!(c.execute_and_wait_any().unwrap(), Some(1));
    assert_eq!(c.execute_and_wait_any().unwrap(), Some(2));
    assert_eq!(c.execute_and_wait_any().unwrap(), Some(3));
    assert_eq!(c.execute_and_wait_any().unwrap(), None);
    pool.stop();
}

#[test]
fn wait_one_leaves_others_for_wait_any() {
    let t = LocalTransport::new();
    let pool = EchoPool::start(&t, ECHO, 2);
    let mut c = ClientSession::new(t.shared(), "one", 2000);

    let a = ClientRequest::new();
    let b = ClientRequest::new();
    a.set_client_handle(10);
    b.set_client_handle(20);
    c.add_request(ECHO, &a).unwrap();
    c.add_request(ECHO, &b).unwrap();

    c.execute_and_wait_one(&b).unwrap();
    assert_eq!(b.state(), RequestState::Completed);

    // `b` was reported by wait_one; only `a` is left for wait_any.
    assert_eq!(c.execute_and_wait_any().unwrap(), Some(10));
    assert_eq!(c.execute_and_wait_any().unwrap(), None);
    pool.stop();
}

#[test]
fn wait_sent_returns_before_responses() {
    let t = LocalTransport::new();
    let pool = EchoPool::start(&t, ECHO, 1);
    let mut c = ClientSession::new(t.shared(), "sent", 2000);

    let r = ClientRequest::new();
    r.set_context(CTX_SLEEP_MS, "200").unwrap();
    c.add_request(ECHO, &r).unwrap();

    let started = Instant::now();
    assert_eq!(c.execute_and_wait_sent().unwrap(), 1);
    assert!(started.elapsed() < Duration::from_millis(150));
    assert!(r.in_progress());
    assert_eq!(
        r.response_data().unwrap_err().code(),
        FaultCode::RESPONSE_IN_PROGRESS
    );

    c.execute_and_wait_one(&r).unwrap();
    assert_eq!(r.state(), RequestState::Completed);
    pool.stop();
}

// ── Faults ───────────────────────────────────────────────────

#[test]
fn service_fault_is_delivered_verbatim() {
    let t = LocalTransport::new();
    let pool = EchoPool::start(&t, ECHO, 1);
    let mut c = ClientSession::new(t.shared(), "fault", 2000);

    let r = ClientRequest::new();
    r.set_context(CTX_SLEEP_MS, "-1").unwrap();
    c.add_request(ECHO, &r).unwrap();
    c.execute_and_wait_all().unwrap();

    assert_eq!(r.state(), RequestState::Faulted);
    assert!(r.has_fault());
    assert_eq!(r.fault_code(), FaultCode(SLEEP_NEGATIVE_FAULT as i32));
    assert_eq!(r.fault_text(), "sleep time negative");
    assert!(
        r.fault()
            .short_message("")
            .starts_with("pluton::Fault=111 'sleep time negative'")
    );
    assert!(r.response_data().is_err());
    // A service fault never marks the session.
    assert!(!c.has_fault());
    assert_eq!(pool.stop().faults, 1);
}

#[test]
fn timeout_does_not_touch_siblings() {
    let t = LocalTransport::new();
    let pool = EchoPool::start(&t, ECHO, 2);
    let mut c = ClientSession::new(t.shared(), "siblings", 2000);

    let slow = ClientRequest::new();
    slow.set_context(CTX_SLEEP_MS, "300").unwrap();
    slow.set_timeout_ms(50);
    let quick = ClientRequest::new();
    quick.set_request_data(b"on time").unwrap();
    c.add_request(ECHO, &slow).unwrap();
    c.add_request(ECHO, &quick).unwrap();

    assert_eq!(c.execute_and_wait_all().unwrap(), 2);
    assert_eq!(slow.fault_code(), FaultCode::SERVICE_TIMEOUT);
    assert_eq!(quick.state(), RequestState::Completed);
    assert_eq!(quick.response_data().unwrap(), b"on time");
    assert!(!c.has_fault());
    pool.stop();
}

#[test]
fn faulted_request_can_be_readded() {
    let t = LocalTransport::new();
    let pool = EchoPool::start(&t, ECHO, 1);
    let mut c = ClientSession::new(t.shared(), "again", 2000);

    let r = ClientRequest::new();
    r.set_context(CTX_SLEEP_MS, "-1").unwrap();
    c.add_request(ECHO, &r).unwrap();
    c.execute_and_wait_one(&r).unwrap();
    assert_eq!(r.state(), RequestState::Faulted);

    r.set_context(CTX_SLEEP_MS, "0").unwrap();
    r.set_request_data(b"second try").unwrap();
    c.add_request(ECHO, &r).unwrap();
    assert!(!r.has_fault());
    c.execute_and_wait_one(&r).unwrap();
    assert_eq!(r.response_data().unwrap(), b"second try");
    pool.stop();
}

#[test]
fn no_remote_refuses_remote_service() {
    let t = LocalTransport::new();
    let pool = EchoPool::start(&t, ECHO, 1);
    t.set_remote(ECHO, true).unwrap();
    let mut c = ClientSession::new(t.shared(), "local-only", 2000);

    let refused = ClientRequest::new();
    refused.set_attribute(Attribute::NoRemote);
    let allowed = ClientRequest::new();
    allowed.set_request_data(b"far away").unwrap();
    c.add_request(ECHO, &refused).unwrap();
    c.add_request(ECHO, &allowed).unwrap();
    c.execute_and_wait_all().unwrap();

    assert_eq!(refused.fault_code(), FaultCode::REMOTE_NOT_ALLOWED);
    assert_eq!(allowed.response_data().unwrap(), b"far away");
    assert_eq!(pool.stop().requests, 1);
}

#[test]
fn no_wait_completes_on_send() {
    let t = LocalTransport::new();
    let pool = EchoPool::start(&t, ECHO, 1);
    let mut c = ClientSession::new(t.shared(), "fire", 2000);

    let fire = ClientRequest::new();
    fire.set_attribute(Attribute::NoWait);
    fire.set_request_data(b"ignored").unwrap();
    fire.set_client_handle(7);
    c.add_request(ECHO, &fire).unwrap();

    assert_eq!(c.execute_and_wait_all().unwrap(), 0);
    assert_eq!(fire.state(), RequestState::Completed);
    assert!(fire.response_data().unwrap().is_empty());
    assert_eq!(c.execute_and_wait_any().unwrap(), None);

    // One worker drains the shared queue in order, so once this answer is
    // back the fire-and-forget request has been served too.
    let follow = ClientRequest::new();
    c.add_request(ECHO, &follow).unwrap();
    c.execute_and_wait_one(&follow).unwrap();
    assert_eq!(pool.stop().requests, 2);
}

// ── Retry ────────────────────────────────────────────────────

#[test]
fn dropped_reply_is_retried_on_another_instance() {
    let t = LocalTransport::new();
    let mut flaky = listen_raw(&t, "flaky");
    let mut c = ClientSession::new(t.shared(), "retry", 2000);

    let r = ClientRequest::new();
    r.set_request_data(b"again").unwrap();
    c.add_request(ECHO, &r).unwrap();
    assert_eq!(c.execute_and_wait_sent().unwrap(), 1);

    drop(flaky.accept().unwrap());
    let pool = EchoPool::start(&t, ECHO, 1);
    drop(flaky);

    c.execute_and_wait_one(&r).unwrap();
    assert_eq!(r.response_data().unwrap(), b"again");
    assert_eq!(r.service_name(), pool.names()[0]);
    pool.stop();
}

#[test]
fn no_retry_surfaces_the_first_failure() {
    let t = LocalTransport::new();
    let mut flaky = listen_raw(&t, "flaky");
    let mut c = ClientSession::new(t.shared(), "no-retry", 2000);

    let r = ClientRequest::new();
    r.set_attribute(Attribute::NoRetry);
    c.add_request(ECHO, &r).unwrap();
    c.execute_and_wait_sent().unwrap();

    drop(flaky.accept().unwrap());
    c.execute_and_wait_one(&r).unwrap();
    assert_eq!(r.fault_code(), FaultCode::INCOMPLETE_RESPONSE);
}

#[test]
fn retries_stop_at_the_try_limit() {
    let t = LocalTransport::new();
    let mut flaky = listen_raw(&t, "flaky");
    let dropper = thread::spawn(move || {
        for _ in 0..2 {
            drop(flaky.accept().unwrap());
        }
        flaky
    });

    let mut c = ClientSession::new(t.shared(), "limit", 2000);
    let r = ClientRequest::new();
    c.add_request(ECHO, &r).unwrap();
    c.execute_and_wait_one(&r).unwrap();
    assert_eq!(r.fault_code(), FaultCode::INCOMPLETE_RESPONSE);
    drop(dropper.join().unwrap());
}

#[test]
fn shutdown_before_dispatch_faults_queued_requests() {
    let t = LocalTransport::new();
    let _listener = listen_raw(&t, "idle");
    let mut c = ClientSession::new(t.shared(), "down", 2000);

    let r = ClientRequest::new();
    c.add_request(ECHO, &r).unwrap();
    t.shutdown();

    let err = c.execute_and_wait_all().unwrap_err();
    assert_eq!(err.code(), FaultCode::TRANSPORT_UNAVAILABLE);
    assert!(c.has_fault());
    assert_eq!(r.fault_code(), FaultCode::TRANSPORT_UNAVAILABLE);

    c.reset();
    assert!(!c.has_fault());
}

// ── Affinity ─────────────────────────────────────────────────

#[test]
fn keep_then_need_affinity_sticks_to_one_instance() {
    let t = LocalTransport::new();
    let pool = EchoPool::start(&t, ECHO, 3);
    let mut c = ClientSession::new(t.shared(), "sticky", 2000);

    let r = ClientRequest::new();
    r.set_attribute(Attribute::KeepAffinity);
    r.set_attribute(Attribute::NoRetry);
    c.add_request(ECHO, &r).unwrap();
    c.execute_and_wait_one(&r).unwrap();
    assert!(r.has_affinity());
    let pinned = r.service_name();

    r.clear_attribute(Attribute::KeepAffinity);
    r.set_attribute(Attribute::NeedAffinity);
    for i in 0..6 {
        r.set_request_data(format!("{i}").as_bytes()).unwrap();
        c.add_request(ECHO, &r).unwrap();
        c.execute_and_wait_one(&r).unwrap();
        assert_eq!(r.service_name(), pinned);
        assert_eq!(r.response_data().unwrap(), format!("{i}").into_bytes());
    }
    pool.stop();
}

#[test]
fn need_affinity_to_a_gone_instance_faults() {
    let t = LocalTransport::new();
    let mut first = listen_raw(&t, "first");
    let mut c = ClientSession::new(t.shared(), "orphan", 2000);

    let r = ClientRequest::new();
    r.set_attribute(Attribute::KeepAffinity);
    r.set_attribute(Attribute::NoRetry);
    c.add_request(ECHO, &r).unwrap();
    c.execute_and_wait_sent().unwrap();
    let inbound = first.accept().unwrap();
    let req = decode_request(&inbound.frame);
    inbound.reply.respond(data_response(&req, req.request_id, b"pinned"));
    c.execute_and_wait_one(&r).unwrap();
    assert!(r.has_affinity());
    assert_eq!(r.service_name(), "rogue");

    // Keep the service registered while the pinned instance goes away.
    let pool = EchoPool::start(&t, ECHO, 1);
    drop(first);

    r.clear_attribute(Attribute::KeepAffinity);
    r.set_attribute(Attribute::NeedAffinity);
    c.add_request(ECHO, &r).unwrap();
    c.execute_and_wait_one(&r).unwrap();
    assert_eq!(r.fault_code(), FaultCode::CONNECT_FAILED);
    pool.stop();
}

// ── Routing ──────────────────────────────────────────────────

#[test]
fn misrouted_response_is_a_routing_fault() {
    let t = LocalTransport::new();
    let mut raw = listen_raw(&t, "raw");
    let mut c = ClientSession::new(t.shared(), "route", 2000);

    let r = ClientRequest::new();
    c.add_request(ECHO, &r).unwrap();
    c.execute_and_wait_sent().unwrap();

    let inbound = raw.accept().unwrap();
    let req = decode_request(&inbound.frame);
    assert_eq!(req.client_name, "route");
    inbound
        .reply
        .respond(data_response(&req, req.request_id.wrapping_add(1), b"x"));

    c.execute_and_wait_one(&r).unwrap();
    assert_eq!(r.fault_code(), FaultCode::SERIOUS_INTERNAL_ROUTING_ERROR);
}

#[test]
fn garbage_response_is_a_format_fault() {
    let t = LocalTransport::new();
    let mut raw = listen_raw(&t, "raw");
    let mut c = ClientSession::new(t.shared(), "garbage", 2000);

    let r = ClientRequest::new();
    c.add_request(ECHO, &r).unwrap();
    c.execute_and_wait_sent().unwrap();
    raw.accept().unwrap().reply.respond(vec![0xff; 3]);

    c.execute_and_wait_one(&r).unwrap();
    assert_eq!(r.fault_code(), FaultCode::RESPONSE_PACKET_FORMAT_ERROR);
}

#[test]
fn unaddressed_data_is_still_a_routing_fault() {
    let t = LocalTransport::new();
    let mut raw = listen_raw(&t, "raw");
    let mut c = ClientSession::new(t.shared(), "anon", 2000);

    let r = ClientRequest::new();
    c.add_request(ECHO, &r).unwrap();
    c.execute_and_wait_sent().unwrap();

    let inbound = raw.accept().unwrap();
    let mut req = decode_request(&inbound.frame);
    req.client_name.clear();
    inbound.reply.respond(data_response(&req, 0, b"x"));

    c.execute_and_wait_one(&r).unwrap();
    assert_eq!(r.fault_code(), FaultCode::SERIOUS_INTERNAL_ROUTING_ERROR);
}
