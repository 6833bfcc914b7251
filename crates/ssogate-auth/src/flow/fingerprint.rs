use std::net::IpAddr;

/// Leading part of a client address used to pin a session.
///
/// IPv4 addresses keep the first `octets` dotted octets, IPv6 addresses the
/// first `octets` colon-separated groups. Zero, or a count covering the
/// whole address, keeps the full address. IPv4-mapped IPv6 addresses are
/// treated as IPv4.
#[must_use]
pub fn client_fingerprint(addr: IpAddr, octets: u8) -> String {
    let addr = match addr {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(addr, IpAddr::V4),
        v4 => v4,
    };
    let keep = usize::from(octets);
    match addr {
        IpAddr::V4(v4) => {
            let parts = v4.octets();
            let keep = if keep == 0 { parts.len() } else { keep.min(parts.len()) };
            parts[..keep]
                .iter()
                .map(u8::to_string)
                .collect::<Vec<_>>()
                .join(".")
        }
        IpAddr::V6(v6) => {
            let parts = v6.segments();
            let keep = if keep == 0 { parts.len() } else { keep.min(parts.len()) };
            parts[..keep]
                .iter()
                .map(|segment| format!("{segment:x}"))
                .collect::<Vec<_>>()
                .join(":")
        }
    }
}
