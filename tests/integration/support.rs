//! Shared fixtures: echo worker pools and raw-frame helpers.

use std::thread::{self, JoinHandle};

use pluton::codec::{self, RequestPacket, ResponseBody, ResponsePacket};
use pluton::{EchoStats, LocalTransport, ServiceSession, run_echo};

pub const ECHO: &str = "system.echo.0.raw";

/// A set of echo workers registered under one key.
pub struct EchoPool {
    transport: LocalTransport,
    key: String,
    workers: Vec<JoinHandle<EchoStats>>,
    names: Vec<String>,
}

impl EchoPool {
    /// Registers every worker before returning, so requests added right
    /// after this resolve.
    pub fn start(transport: &LocalTransport, key: &str, workers: usize) -> Self {
        let mut handles = Vec::with_capacity(workers);
        let mut names = Vec::with_capacity(workers);
        for _ in 0..workers {
            let mut session = ServiceSession::new(transport.shared(), key).unwrap();
            session.initialize().unwrap();
            names.push(session.instance_name().to_owned());
            handles.push(thread::spawn(move || run_echo(&mut session).unwrap()));
        }
        Self {
            transport: transport.clone(),
            key: key.to_owned(),
            workers: handles,
            names,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Shut the service down and sum what the workers served.
    pub fn stop(self) -> EchoStats {
        self.transport.shutdown_service(&self.key).unwrap();
        let mut total = EchoStats::default();
        for w in self.workers {
            let s = w.join().unwrap();
            total.requests += s.requests;
            total.bytes += s.bytes;
            total.faults += s.faults;
        }
        total
    }
}

pub fn decode_request(frame: &[u8]) -> RequestPacket {
    codec::decode_frame(frame, usize::MAX).unwrap()
}

pub fn decode_response(frame: &[u8]) -> ResponsePacket {
    codec::decode_frame(frame, usize::MAX).unwrap()
}

/// Encode a data response to `req`, optionally tampering with the id.
pub fn data_response(req: &RequestPacket, request_id: u32, data: &[u8]) -> Vec<u8> {
    let packet = ResponsePacket {
        request_id,
        client_name: req.client_name.clone(),
        service_name: "rogue".to_owned(),
        body: ResponseBody::Data(data.to_vec()),
    };
    codec::encode_frame(&packet, usize::MAX).unwrap()
}
