//! IANA protocol-number resolution for flow-log protocol fields
//!
//! VPC flow logs carry the protocol as its IANA number (6, 17, ...) while lookup
//! tables usually name it ("tcp"). Resolution is opt-in; unknown numbers and
//! non-numeric fields pass through unchanged.

/// Keyword for a protocol number, lower-case
pub fn protocol_name(number: u8) -> Option<&'static str> {
    let name = match number {
        0 => "hopopt",
        1 => "icmp",
        2 => "igmp",
        4 => "ipv4",
        6 => "tcp",
        8 => "egp",
        9 => "igp",
        17 => "udp",
        27 => "rdp",
        41 => "ipv6",
        43 => "ipv6-route",
        44 => "ipv6-frag",
        46 => "rsvp",
        47 => "gre",
        50 => "esp",
        51 => "ah",
        58 => "ipv6-icmp",
        59 => "ipv6-nonxt",
        60 => "ipv6-opts",
        88 => "eigrp",
        89 => "ospf",
        94 => "ipip",
        103 => "pim",
        112 => "vrrp",
        115 => "l2tp",
        132 => "sctp",
        136 => "udplite",
        137 => "mpls-in-ip",
        _ => return None,
    };
    Some(name)
}

/// Resolve a raw protocol field to its keyword when it is a known number
pub fn resolve(field: &str) -> String {
    match field.parse::<u8>().ok().and_then(protocol_name) {
        Some(name) => name.to_string(),
        None => field.to_lowercase(),
    }
}
