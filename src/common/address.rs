//! MAC-like and IPv6-like address derivation.
//!
//! Addresses are a pure function of the bound object's id and the configured
//! prefixes, so the same scenario always yields the same addresses. The host
//! part comes from an FNV-1a hash of the object id; the prefix part from the
//! settings. A malformed prefix is a configuration slip, not a reason to stop:
//! it is logged and the default prefix is used instead.

pub const BROADCAST_MAC: &str = "ff:ff:ff:ff:ff:ff";
pub const ALL_NODES_MULTICAST: &str = "ff02::1";

pub const DEFAULT_MAC_PREFIX: &str = "02";
pub const DEFAULT_IPV6_PREFIX: &str = "fd00:0:0:0";

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a hash (stable across platforms and compiler versions).
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn host_bits(object_id: u64, round: u8) -> u64 {
    let mut input = object_id.to_be_bytes().to_vec();
    input.push(round);
    fnv1a64(&input)
}

fn parse_mac_prefix(prefix: &str) -> Option<Vec<u8>> {
    if prefix.is_empty() {
        return Some(Vec::new());
    }
    let bytes: Option<Vec<u8>> = prefix
        .split(':')
        .map(|part| if part.len() == 2 { u8::from_str_radix(part, 16).ok() } else { None })
        .collect();
    bytes.filter(|b| b.len() <= 5)
}

fn parse_ipv6_prefix(prefix: &str) -> Option<Vec<u16>> {
    if prefix.is_empty() {
        return Some(Vec::new());
    }
    let groups: Option<Vec<u16>> = prefix
        .split(':')
        .map(|part| if !part.is_empty() && part.len() <= 4 { u16::from_str_radix(part, 16).ok() } else { None })
        .collect();
    groups.filter(|g| g.len() <= 7)
}

/// Derive the MAC-like address `aa:bb:cc:dd:ee:ff` for an object.
pub fn derive_mac_address(object_id: u64, prefix: &str) -> String {
    let prefix_bytes = match parse_mac_prefix(prefix) {
        Some(bytes) => bytes,
        None => {
            log::warn!("Malformed MAC prefix {:?}, using default {:?}", prefix, DEFAULT_MAC_PREFIX);
            parse_mac_prefix(DEFAULT_MAC_PREFIX).unwrap_or_default()
        }
    };

    let hash = host_bits(object_id, 0).to_be_bytes();
    let mut bytes = prefix_bytes;
    let missing = 6 - bytes.len();
    bytes.extend_from_slice(&hash[8 - missing..]);

    bytes.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(":")
}

/// Derive the IPv6-like address (eight uncompressed groups) for an object.
pub fn derive_ipv6_address(object_id: u64, prefix: &str) -> String {
    let prefix_groups = match parse_ipv6_prefix(prefix) {
        Some(groups) => groups,
        None => {
            log::warn!("Malformed IPv6 prefix {:?}, using default {:?}", prefix, DEFAULT_IPV6_PREFIX);
            parse_ipv6_prefix(DEFAULT_IPV6_PREFIX).unwrap_or_default()
        }
    };

    let mut host_groups: Vec<u16> = Vec::with_capacity(8);
    for round in 0..2 {
        let hash = host_bits(object_id, round);
        for shift in [48, 32, 16, 0] {
            host_groups.push((hash >> shift) as u16);
        }
    }

    let mut groups = prefix_groups;
    let missing = 8 - groups.len();
    groups.extend_from_slice(&host_groups[8 - missing..]);

    groups.iter().map(|g| format!("{:x}", g)).collect::<Vec<_>>().join(":")
}

pub fn is_broadcast_mac(address: &str) -> bool {
    address.eq_ignore_ascii_case(BROADCAST_MAC)
}

pub fn is_multicast_ipv6(address: &str) -> bool {
    address.as_bytes().get(..2).is_some_and(|b| b.eq_ignore_ascii_case(b"ff"))
}
