//! Master-server wire protocol
//!
//! Framing shared with existing game clients, so the byte layout is fixed:
//! every packet starts with a 16-bit big-endian type code followed by a
//! type-specific payload. Strings on the wire are NUL-terminated UTF-8 and
//! multi-byte integers are big-endian.
//!
//! Two packet-type namespaces are in play. The master types below are what
//! clients and servers send to the public socket. The game types are the
//! in-game protocol the master speaks on the verification socket when it
//! poses as an ordinary querying client.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Master protocol packet types
pub const MASTER_PACKET_ADD: u16 = 0;
pub const MASTER_PACKET_ADD_RESPONSE: u16 = 1;
pub const MASTER_PACKET_QUERY: u16 = 2;
pub const MASTER_PACKET_QUERY_RESPONSE: u16 = 3;
pub const MASTER_PACKET_GET_METADATA: u16 = 4;
pub const MASTER_PACKET_GET_METADATA_RESPONSE: u16 = 5;
pub const MASTER_PACKET_SIGN_START: u16 = 6;
pub const MASTER_PACKET_SIGN_START_RESPONSE: u16 = 7;
pub const MASTER_PACKET_SIGN_END: u16 = 8;
pub const MASTER_PACKET_SIGN_END_RESPONSE: u16 = 9;
pub const MASTER_PACKET_NAT_HOLE_PUNCH: u16 = 10;
pub const MASTER_PACKET_NAT_HOLE_PUNCH_ALL: u16 = 11;

/// Game protocol packet types (verification socket)
pub const GAME_PACKET_QUERY: u16 = 13;
pub const GAME_PACKET_QUERY_RESPONSE: u16 = 14;
pub const GAME_PACKET_NAT_HOLE_PUNCH: u16 = 16;

/// Largest payload emitted in a single response packet
pub const MAX_RESPONSE_LEN: usize = 1400;

/// Length of the SHA-1 demo checksum carried in SIGN_END
pub const DEMO_HASH_LEN: usize = 20;

/// Port game servers listen on when a hole-punch target omits one
pub const DEFAULT_GAME_PORT: u16 = 2342;

/// Build a packet: type code followed by the payload.
pub fn build_packet(packet_type: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(2 + payload.len());
    packet.extend_from_slice(&packet_type.to_be_bytes());
    packet.extend_from_slice(payload);
    packet
}

/// Split a datagram into its type code and payload.
///
/// Returns `None` if the datagram is shorter than the header.
pub fn split_packet(data: &[u8]) -> Option<(u16, &[u8])> {
    if data.len() < 2 {
        return None;
    }
    let packet_type = u16::from_be_bytes([data[0], data[1]]);
    Some((packet_type, &data[2..]))
}

/// Read one NUL-terminated UTF-8 string, returning it and the remainder.
///
/// Fails if no NUL terminator is present or the bytes are not UTF-8; the
/// caller drops the packet in that case.
pub fn read_string(data: &[u8]) -> Option<(&str, &[u8])> {
    let nul = data.iter().position(|&b| b == 0)?;
    let s = std::str::from_utf8(&data[..nul]).ok()?;
    Some((s, &data[nul + 1..]))
}

/// Append a string and its NUL terminator.
pub fn put_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

/// Decode a payload of concatenated NUL-terminated strings.
pub fn decode_string_list(mut data: &[u8]) -> Option<Vec<String>> {
    let mut strings = Vec::new();
    while !data.is_empty() {
        let (s, rest) = read_string(data)?;
        strings.push(s.to_string());
        data = rest;
    }
    Some(strings)
}

/// Pack a string list into the fewest payloads of at most `max_len` bytes
/// each, never splitting a string across payloads.
///
/// Always yields at least one payload, so a request against an empty list
/// still gets a (zero-string) response packet.
pub fn chunk_strings(strings: &[String], max_len: usize) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    let mut current: Vec<u8> = Vec::new();
    for s in strings {
        let encoded_len = s.len() + 1;
        if !current.is_empty() && current.len() + encoded_len > max_len {
            chunks.push(std::mem::take(&mut current));
        }
        put_string(&mut current, s);
    }
    chunks.push(current);
    chunks
}

/// Metadata block a game server returns when queried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryInfo {
    pub version: String,
    pub max_players: u8,
    pub name: String,
}

/// Parse a game-server QUERY_RESPONSE payload: version string, five raw
/// bytes (state, players, max players, mode, mission), server name string.
/// Only `max_players` is retained from the fixed block.
pub fn parse_query_info(payload: &[u8]) -> Option<QueryInfo> {
    let (version, rest) = read_string(payload)?;
    if rest.len() < 5 {
        return None;
    }
    let max_players = rest[2];
    let (name, _) = read_string(&rest[5..])?;
    Some(QueryInfo {
        version: version.to_string(),
        max_players,
        name: name.to_string(),
    })
}

/// Parse a hole-punch target string of the form `host[:port]`.
///
/// The port defaults to [`DEFAULT_GAME_PORT`] when absent. The host is an
/// IPv4 literal; nothing beyond the directory lookup validates it.
pub fn parse_target_addr(s: &str) -> Option<SocketAddr> {
    let (host, port) = match s.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().ok()?),
        None => (s, DEFAULT_GAME_PORT),
    };
    let ip: Ipv4Addr = host.parse().ok()?;
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_roundtrip() {
        let packet = build_packet(MASTER_PACKET_ADD_RESPONSE, &1u16.to_be_bytes());
        assert_eq!(packet, vec![0x00, 0x01, 0x00, 0x01]);

        let (packet_type, payload) = split_packet(&packet).unwrap();
        assert_eq!(packet_type, MASTER_PACKET_ADD_RESPONSE);
        assert_eq!(payload, &1u16.to_be_bytes());
    }

    #[test]
    fn test_split_packet_too_short() {
        assert!(split_packet(&[]).is_none());
        assert!(split_packet(&[0x00]).is_none());
    }

    #[test]
    fn test_read_string() {
        let data = b"hello\0rest";
        let (s, rest) = read_string(data).unwrap();
        assert_eq!(s, "hello");
        assert_eq!(rest, b"rest");
    }

    #[test]
    fn test_read_string_requires_terminator() {
        assert!(read_string(b"no terminator").is_none());
    }

    #[test]
    fn test_string_list_roundtrip() {
        let strings = vec!["a:1".to_string(), "b:2".to_string(), "c:3".to_string()];
        let mut buf = Vec::new();
        for s in &strings {
            put_string(&mut buf, s);
        }
        assert_eq!(decode_string_list(&buf).unwrap(), strings);
    }

    #[test]
    fn test_chunking_respects_limit_and_order() {
        let strings: Vec<String> = (0..200).map(|i| format!("192.0.2.{}:2342", i)).collect();
        let chunks = chunk_strings(&strings, 100);

        let mut decoded = Vec::new();
        for chunk in &chunks {
            assert!(chunk.len() <= 100);
            decoded.extend(decode_string_list(chunk).unwrap());
        }
        assert_eq!(decoded, strings);
        assert!(chunks.len() > 1);
    }

    #[test]
    fn test_chunking_exact_fit() {
        // Two 7-byte strings encode to 8 bytes each; both fit a 16-byte payload.
        let strings = vec!["a".repeat(7), "b".repeat(7)];
        let chunks = chunk_strings(&strings, 16);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 16);
    }

    #[test]
    fn test_chunking_empty_list_yields_one_payload() {
        let chunks = chunk_strings(&[], MAX_RESPONSE_LEN);
        assert_eq!(chunks, vec![Vec::<u8>::new()]);
        assert_eq!(decode_string_list(&chunks[0]).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_parse_query_info() {
        let mut payload = Vec::new();
        put_string(&mut payload, "Chocolate Doom 3.0.1");
        payload.extend_from_slice(&[0, 2, 4, 1, 1]);
        put_string(&mut payload, "Arena");

        let info = parse_query_info(&payload).unwrap();
        assert_eq!(info.version, "Chocolate Doom 3.0.1");
        assert_eq!(info.max_players, 4);
        assert_eq!(info.name, "Arena");
    }

    #[test]
    fn test_parse_query_info_truncated() {
        let mut payload = Vec::new();
        put_string(&mut payload, "v1");
        payload.extend_from_slice(&[0, 0]);
        assert!(parse_query_info(&payload).is_none());
    }

    #[test]
    fn test_parse_target_addr() {
        assert_eq!(
            parse_target_addr("203.0.113.5:5000").unwrap(),
            "203.0.113.5:5000".parse().unwrap()
        );
        assert_eq!(
            parse_target_addr("203.0.113.5").unwrap(),
            "203.0.113.5:2342".parse().unwrap()
        );
        assert!(parse_target_addr("not an address").is_none());
        assert!(parse_target_addr("203.0.113.5:notaport").is_none());
    }
}
