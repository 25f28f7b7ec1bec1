//! Option-name constants and the host-IP-to-option-digit encoding (§4.5).
//!
//! The GB/GBC core owns its own TCP link; this crate never touches a
//! socket for game traffic, only for discovery. Connection is driven
//! entirely by writing core options.

use netcommon::{ErrorType, NetworkError, NetworkResult};
use std::net::Ipv4Addr;

pub const OPTION_LINK_MODE: &str = "link_mode";
pub const OPTION_LINK_NETWORK_PORT: &str = "link_network_port";

pub const LINK_MODE_SERVER: &str = "Network Server";
pub const LINK_MODE_CLIENT: &str = "Network Client";
pub const LINK_MODE_OFF: &str = "Not Connected";

pub const IP_DIGIT_COUNT: usize = 12;

/// Name of the option slot holding decimal digit `index` (0-11) of the
/// host IPv4 address, three zero-padded digits per octet.
pub fn ip_digit_option(index: usize) -> String {
    format!("link_network_ip_digit_{}", index)
}

/// Splits `addr` into 12 single ASCII decimal digits, three per octet
/// (e.g. `192.168.0.4` → `"192" "168" "000" "004"`). Resolves the Open
/// Question on invalid-octet handling by rejecting the unspecified
/// address up front rather than silently writing zeros.
pub fn encode_ip_digits(addr: Ipv4Addr) -> NetworkResult<[u8; IP_DIGIT_COUNT]> {
    if addr.is_unspecified() {
        return Err(NetworkError::Fatal(ErrorType::InvalidArgument));
    }

    let mut digits = [0u8; IP_DIGIT_COUNT];
    for (octet_idx, octet) in addr.octets().iter().enumerate() {
        let text = format!("{:03}", octet);
        for (digit_idx, ch) in text.bytes().enumerate() {
            digits[octet_idx * 3 + digit_idx] = ch - b'0';
        }
    }
    Ok(digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_three_digits_per_octet_zero_padded() {
        let digits = encode_ip_digits(Ipv4Addr::new(192, 168, 0, 4)).unwrap();
        assert_eq!(digits, [1, 9, 2, 1, 6, 8, 0, 0, 0, 0, 0, 4]);
    }

    #[test]
    fn unspecified_address_is_rejected() {
        let err = encode_ip_digits(Ipv4Addr::UNSPECIFIED).unwrap_err();
        assert_eq!(err, NetworkError::Fatal(ErrorType::InvalidArgument));
    }

    #[test]
    fn option_slot_names_are_stable() {
        assert_eq!(ip_digit_option(0), "link_network_ip_digit_0");
        assert_eq!(ip_digit_option(11), "link_network_ip_digit_11");
    }
}
