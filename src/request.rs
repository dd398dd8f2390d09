//! SOCKS5 request parsing (CONNECT/BIND/UDP ASSOCIATE) and reply encoding.

use crate::address::Address;

pub const VERSION: u8 = 0x05;

pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_BIND: u8 = 0x02;
pub const CMD_UDP_ASSOCIATE: u8 = 0x03;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

pub const REP_SUCCESS: u8 = 0x00;
pub const REP_GENERAL_FAILURE: u8 = 0x01;
pub const REP_NETWORK_UNREACHABLE: u8 = 0x03;
pub const REP_HOST_UNREACHABLE: u8 = 0x04;
pub const REP_CONNECTION_REFUSED: u8 = 0x05;
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REP_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Result of inspecting one decrypted request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Incomplete,
    /// CONNECT to the given destination; the caller should start an outbound connect.
    Connect(Address),
    /// The request is rejected outright; caller replies with this REP code and
    /// destroys the Tunnel without attempting a connection.
    Reject(u8),
}

/// Parses one complete decrypted request frame.
pub fn parse_request(data: &[u8]) -> RequestOutcome {
    if data.len() < 4 {
        return RequestOutcome::Incomplete;
    }
    let version = data[0];
    let command = data[1];
    let address_type = data[3];

    if version != VERSION {
        return RequestOutcome::Reject(REP_GENERAL_FAILURE);
    }

    let address = match read_address(address_type, data) {
        Ok(AddressRead::Incomplete) => return RequestOutcome::Incomplete,
        Ok(AddressRead::Address(address)) => address,
        Err(rep) => return RequestOutcome::Reject(rep),
    };

    match command {
        CMD_CONNECT => RequestOutcome::Connect(address),
        CMD_BIND | CMD_UDP_ASSOCIATE => RequestOutcome::Reject(REP_COMMAND_NOT_SUPPORTED),
        _ => RequestOutcome::Reject(REP_COMMAND_NOT_SUPPORTED),
    }
}

enum AddressRead {
    Incomplete,
    Address(Address),
}

fn read_address(address_type: u8, data: &[u8]) -> Result<AddressRead, u8> {
    match address_type {
        ATYP_IPV4 => {
            if data.len() < 10 {
                return Ok(AddressRead::Incomplete);
            }
            if data.len() > 10 {
                return Err(REP_GENERAL_FAILURE);
            }
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&data[4..8]);
            let port = u16::from_be_bytes([data[8], data[9]]);
            Ok(AddressRead::Address(Address::Ipv4(raw, port)))
        }
        ATYP_IPV6 => {
            if data.len() < 22 {
                return Ok(AddressRead::Incomplete);
            }
            if data.len() > 22 {
                return Err(REP_GENERAL_FAILURE);
            }
            let mut raw = [0u8; 16];
            raw.copy_from_slice(&data[4..20]);
            let port = u16::from_be_bytes([data[20], data[21]]);
            Ok(AddressRead::Address(Address::Ipv6(raw, port)))
        }
        ATYP_DOMAIN => {
            if data.len() < 5 {
                return Ok(AddressRead::Incomplete);
            }
            let domain_length = data[4] as usize;
            let needed = 5 + domain_length + 2;
            if data.len() < needed {
                return Ok(AddressRead::Incomplete);
            }
            if data.len() > needed {
                return Err(REP_GENERAL_FAILURE);
            }
            let domain = std::str::from_utf8(&data[5..5 + domain_length])
                .map_err(|_| REP_GENERAL_FAILURE)?
                .to_string();
            let port = u16::from_be_bytes([data[5 + domain_length], data[6 + domain_length]]);
            let address = Address::Domain(domain, port);
            if !address.is_valid() {
                return Err(REP_GENERAL_FAILURE);
            }
            Ok(AddressRead::Address(address))
        }
        _ => Err(REP_ADDRESS_TYPE_NOT_SUPPORTED),
    }
}

/// Encodes a SOCKS5 reply. On success `bound` is the outbound socket's local
/// address; on any non-success REP code the reply always carries IPv4 `0.0.0.0:0`.
pub fn encode_reply(rep: u8, bound: Option<&Address>) -> Vec<u8> {
    let mut reply = vec![VERSION, rep, 0x00];

    let use_address = if rep == REP_SUCCESS { bound } else { None };

    match use_address {
        Some(address @ Address::Ipv4(..)) => {
            reply.push(ATYP_IPV4);
            reply.extend_from_slice(&address.to_raw_ipv4());
            reply.extend_from_slice(&address.raw_port_network_order());
        }
        Some(address @ Address::Ipv6(..)) => {
            reply.push(ATYP_IPV6);
            reply.extend_from_slice(&address.to_raw_ipv6());
            reply.extend_from_slice(&address.raw_port_network_order());
        }
        _ => {
            reply.push(ATYP_IPV4);
            reply.extend_from_slice(&[0, 0, 0, 0]);
            reply.extend_from_slice(&[0, 0]);
        }
    }

    reply
}

/// Maps an outbound connect failure to the SOCKS5 REP code the spec requires.
pub fn rep_for_connect_error(err: &std::io::Error) -> u8 {
    match err.raw_os_error() {
        Some(code) if code == libc::ENETUNREACH => REP_NETWORK_UNREACHABLE,
        Some(code) if code == libc::ECONNREFUSED => REP_CONNECTION_REFUSED,
        _ => REP_HOST_UNREACHABLE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_to_ipv4() {
        let request = [0x05, CMD_CONNECT, 0x00, ATYP_IPV4, 127, 0, 0, 1, 0x00, 0x50];
        assert_eq!(
            parse_request(&request),
            RequestOutcome::Connect(Address::Ipv4([127, 0, 0, 1], 80))
        );
    }

    #[test]
    fn connect_to_domain() {
        let mut request = vec![0x05, CMD_CONNECT, 0x00, ATYP_DOMAIN, 11];
        request.extend_from_slice(b"example.com");
        request.extend_from_slice(&[0x00, 0x50]);
        assert_eq!(
            parse_request(&request),
            RequestOutcome::Connect(Address::Domain("example.com".to_string(), 80))
        );
    }

    #[test]
    fn connect_to_ipv6() {
        let mut request = vec![0x05, CMD_CONNECT, 0x00, ATYP_IPV6];
        request.extend_from_slice(&[0u8; 15]);
        request.push(1);
        request.extend_from_slice(&[0x00, 0x50]);
        assert_eq!(
            parse_request(&request),
            RequestOutcome::Connect(Address::Ipv6(
                [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1],
                80
            ))
        );
    }

    #[test]
    fn bind_is_rejected_as_unsupported() {
        let request = [0x05, CMD_BIND, 0x00, ATYP_IPV4, 127, 0, 0, 1, 0x00, 0x50];
        assert_eq!(
            parse_request(&request),
            RequestOutcome::Reject(REP_COMMAND_NOT_SUPPORTED)
        );
    }

    #[test]
    fn udp_associate_is_rejected_as_unsupported() {
        let request = [0x05, CMD_UDP_ASSOCIATE, 0x00, ATYP_IPV4, 127, 0, 0, 1, 0x00, 0x50];
        assert_eq!(
            parse_request(&request),
            RequestOutcome::Reject(REP_COMMAND_NOT_SUPPORTED)
        );
    }

    #[test]
    fn unsupported_address_type_is_rejected() {
        let request = [0x05, CMD_CONNECT, 0x00, 0x7F, 0, 0, 0, 0, 0x00, 0x50];
        assert_eq!(
            parse_request(&request),
            RequestOutcome::Reject(REP_ADDRESS_TYPE_NOT_SUPPORTED)
        );
    }

    #[test]
    fn ipv4_request_exact_length_required() {
        let too_short = [0x05, CMD_CONNECT, 0x00, ATYP_IPV4, 127, 0, 0, 1, 0x00];
        assert_eq!(parse_request(&too_short), RequestOutcome::Incomplete);

        let too_long = [
            0x05, CMD_CONNECT, 0x00, ATYP_IPV4, 127, 0, 0, 1, 0x00, 0x50, 0xFF,
        ];
        assert_eq!(
            parse_request(&too_long),
            RequestOutcome::Reject(REP_GENERAL_FAILURE)
        );
    }

    #[test]
    fn domain_request_requires_exactly_five_plus_domlen_plus_two_bytes() {
        let mut short = vec![0x05, CMD_CONNECT, 0x00, ATYP_DOMAIN, 11];
        short.extend_from_slice(b"example.co"); // one byte short of domain + no port
        assert_eq!(parse_request(&short), RequestOutcome::Incomplete);

        let mut exact = vec![0x05, CMD_CONNECT, 0x00, ATYP_DOMAIN, 11];
        exact.extend_from_slice(b"example.com");
        exact.extend_from_slice(&[0x00, 0x50]);
        assert!(matches!(parse_request(&exact), RequestOutcome::Connect(_)));

        let mut long = exact.clone();
        long.push(0xFF);
        assert_eq!(parse_request(&long), RequestOutcome::Reject(REP_GENERAL_FAILURE));
    }

    #[test]
    fn frame_too_short_for_header_is_incomplete() {
        assert_eq!(parse_request(&[0x05, CMD_CONNECT, 0x00]), RequestOutcome::Incomplete);
    }

    #[test]
    fn encode_reply_success_uses_bound_address() {
        let bound = Address::Ipv4([10, 0, 0, 5], 51234);
        let reply = encode_reply(REP_SUCCESS, Some(&bound));
        assert_eq!(
            reply,
            vec![0x05, 0x00, 0x00, ATYP_IPV4, 10, 0, 0, 5, 0xC8, 0x22]
        );
    }

    #[test]
    fn encode_reply_error_always_uses_ipv4_zero() {
        let reply = encode_reply(REP_COMMAND_NOT_SUPPORTED, None);
        assert_eq!(
            reply,
            vec![0x05, REP_COMMAND_NOT_SUPPORTED, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn rep_for_connect_error_maps_known_errno_values() {
        let refused = std::io::Error::from_raw_os_error(libc::ECONNREFUSED);
        assert_eq!(rep_for_connect_error(&refused), REP_CONNECTION_REFUSED);

        let unreachable = std::io::Error::from_raw_os_error(libc::ENETUNREACH);
        assert_eq!(rep_for_connect_error(&unreachable), REP_NETWORK_UNREACHABLE);

        let other = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(rep_for_connect_error(&other), REP_HOST_UNREACHABLE);
    }
}
