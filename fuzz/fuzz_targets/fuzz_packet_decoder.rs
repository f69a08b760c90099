//! Fuzz target: `codec::decode_frame`
//!
//! Arbitrary bytes must never panic the packet decoder, whatever the length
//! prefix claims.  Anything that does decode must re-encode to a frame that
//! decodes to the same packet.
//!
//! cargo fuzz run fuzz_packet_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use pluton::codec::{self, RequestPacket, ResponsePacket};

const LIMIT: usize = 1 << 20;

fuzz_target!(|data: &[u8]| {
    if let Ok(req) = codec::decode_frame::<RequestPacket>(data, LIMIT) {
        let frame = codec::encode_frame(&req, LIMIT).expect("decoded packet must re-encode");
        let again: RequestPacket = codec::decode_frame(&frame, LIMIT).expect("re-encoded frame must decode");
        assert_eq!(req, again);
    }
    if let Ok(resp) = codec::decode_frame::<ResponsePacket>(data, LIMIT) {
        let frame = codec::encode_frame(&resp, LIMIT).expect("decoded packet must re-encode");
        let again: ResponsePacket = codec::decode_frame(&frame, LIMIT).expect("re-encoded frame must decode");
        assert_eq!(resp, again);
    }
});
