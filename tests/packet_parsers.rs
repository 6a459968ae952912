//! Property tests for the ICMP and DNS reply parsers

use network_prober::models::FailureReason;
use network_prober::probe::dns::{build_query, check_response};
use network_prober::probe::icmp::{checksum, match_reply, EchoRequest, ReplyMatch};
use proptest::prelude::*;

fn arb_request() -> impl Strategy<Value = EchoRequest> {
    (any::<u16>(), any::<u16>(), any::<[u8; 8]>()).prop_map(|(identifier, sequence, token)| EchoRequest {
        identifier,
        sequence,
        token,
    })
}

/// The echo reply a well-behaved host would send back
fn reply_to(request: &EchoRequest) -> Vec<u8> {
    let mut packet = request.encode();
    packet[0] = 0;
    packet[2] = 0;
    packet[3] = 0;
    let sum = checksum(&packet);
    packet[2..4].copy_from_slice(&sum.to_be_bytes());
    packet
}

/// Minimal IPv4 header carrying ICMP
fn ipv4_header() -> Vec<u8> {
    let mut header = vec![0u8; 20];
    header[0] = 0x45;
    header[8] = 64;
    header[9] = 1;
    header
}

proptest! {
    #[test]
    fn checksum_of_checksummed_data_is_zero(mut data in prop::collection::vec(any::<u8>(), 0..256)) {
        if data.len() % 2 == 1 {
            data.pop();
        }
        let sum = checksum(&data);
        data.extend_from_slice(&sum.to_be_bytes());
        prop_assert_eq!(checksum(&data), 0);
    }

    #[test]
    fn match_reply_never_panics(packet in prop::collection::vec(any::<u8>(), 0..128), request in arb_request(), check_id in any::<bool>()) {
        let _ = match_reply(&packet, &request, check_id);
    }

    #[test]
    fn genuine_reply_matches(request in arb_request(), with_ip_header in any::<bool>()) {
        let mut packet = if with_ip_header { ipv4_header() } else { Vec::new() };
        packet.extend_from_slice(&reply_to(&request));
        prop_assert_eq!(match_reply(&packet, &request, true), ReplyMatch::Reply);
    }

    #[test]
    fn own_request_is_never_a_reply(request in arb_request()) {
        prop_assert_eq!(match_reply(&request.encode(), &request, true), ReplyMatch::Unrelated);
    }

    #[test]
    fn corrupted_token_is_malformed(request in arb_request(), index in 8usize..16, flip in 1u8..=255) {
        let mut packet = reply_to(&request);
        packet[index] ^= flip;
        prop_assert_eq!(match_reply(&packet, &request, true), ReplyMatch::Malformed);
    }

    #[test]
    fn foreign_sequence_is_unrelated(request in arb_request(), other in any::<u16>()) {
        prop_assume!(other != request.sequence);
        let foreign = EchoRequest { sequence: other, ..request };
        prop_assert_eq!(match_reply(&reply_to(&foreign), &request, false), ReplyMatch::Unrelated);
    }

    #[test]
    fn check_response_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..128), id in any::<u16>()) {
        let _ = check_response(&bytes, id);
    }

    #[test]
    fn dns_response_must_carry_our_id(id in any::<u16>(), other in any::<u16>()) {
        let query = build_query(id).unwrap();
        prop_assert_eq!(check_response(&query, id), Err(FailureReason::MalformedResponse));

        let mut response = query;
        response[2] |= 0x80;
        prop_assert_eq!(check_response(&response, id), Ok(()));

        prop_assume!(other != id);
        prop_assert_eq!(check_response(&response, other), Err(FailureReason::MalformedResponse));
    }
}
