//! Mesh addressing helpers
//!
//! Nodes are identified by a 64-bit mac. The mesh stack assigns each node a
//! 16-bit RLOC16 locator; both map onto fixed mesh-local IPv6 forms:
//!
//! ```text
//! EID:  fdde:ad00:beef:0:<mac as 4 words>
//! RLOC: fdde:ad00:beef:0:0:ff:fe00:<rloc16>
//! ```

use std::fmt;
use std::net::Ipv6Addr;

use serde::{Deserialize, Serialize};

/// Node hardware address (only the low bits are significant inside the mesh)
pub type Mac = u64;

/// Fixed UDP port for all mesh-internal protocol traffic
pub const MESH_PORT: u16 = 1234;

/// Mesh-local /64 prefix
pub const MESH_LOCAL_PREFIX: [u16; 4] = [0xfdde, 0xad00, 0xbeef, 0x0000];

/// RLOC16 of the leader anycast locator
pub const LEADER_ALOC16: u16 = 0xfc00;

/// A node reference that the transport can resolve to an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeAddr {
    /// By hardware address
    Mac(Mac),
    /// By mesh locator
    Rloc(u16),
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeAddr::Mac(mac) => write!(f, "mac:{}", format_mac(*mac)),
            NodeAddr::Rloc(rloc) => write!(f, "rloc:{:#06x}", rloc),
        }
    }
}

/// Mesh-local endpoint identifier derived from a mac
pub fn mesh_local_eid(mac: Mac) -> Ipv6Addr {
    let [a, b, c, d] = MESH_LOCAL_PREFIX;
    Ipv6Addr::new(
        a,
        b,
        c,
        d,
        (mac >> 48) as u16,
        (mac >> 32) as u16,
        (mac >> 16) as u16,
        mac as u16,
    )
}

/// Routing locator address for an RLOC16
pub fn rloc_address(rloc16: u16) -> Ipv6Addr {
    let [a, b, c, d] = MESH_LOCAL_PREFIX;
    Ipv6Addr::new(a, b, c, d, 0, 0x00ff, 0xfe00, rloc16)
}

/// Anycast locator of the current leader
pub fn leader_aloc() -> Ipv6Addr {
    rloc_address(LEADER_ALOC16)
}

/// Whether an address lies inside the mesh-local prefix
pub fn is_mesh_local(addr: &Ipv6Addr) -> bool {
    addr.segments()[..4] == MESH_LOCAL_PREFIX
}

/// Extract the RLOC16 from a routing locator address
pub fn rloc16_of(addr: &Ipv6Addr) -> Option<u16> {
    let seg = addr.segments();
    if is_mesh_local(addr) && seg[4] == 0 && seg[5] == 0x00ff && seg[6] == 0xfe00 {
        Some(seg[7])
    } else {
        None
    }
}

/// Extract the mac from a mesh-local EID
///
/// Returns `None` for addresses outside the prefix and for RLOC forms.
pub fn mac_of(addr: &Ipv6Addr) -> Option<Mac> {
    if !is_mesh_local(addr) || rloc16_of(addr).is_some() {
        return None;
    }
    let seg = addr.segments();
    Some(
        (u64::from(seg[4]) << 48)
            | (u64::from(seg[5]) << 32)
            | (u64::from(seg[6]) << 16)
            | u64::from(seg[7]),
    )
}

/// A mac in the width topology records carry on the wire
///
/// Neighbor and router reports pack 16-bit macs, so every topology table
/// keys nodes by the low 16 bits to keep local and received records aligned.
pub fn topology_mac(mac: Mac) -> Mac {
    mac & 0xffff
}

/// Format a mac for logs
pub fn format_mac(mac: Mac) -> String {
    if mac <= 0xffff {
        format!("{:#06x}", mac)
    } else {
        format!("{:#018x}", mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eid_roundtrip() {
        let eid = mesh_local_eid(0x0010);
        assert_eq!(eid.to_string(), "fdde:ad00:beef::10");
        assert_eq!(mac_of(&eid), Some(0x0010));

        let wide = mesh_local_eid(0x70b3_d549_9000_1234);
        assert_eq!(mac_of(&wide), Some(0x70b3_d549_9000_1234));
    }

    #[test]
    fn test_rloc_address() {
        let addr = rloc_address(0x0400);
        assert_eq!(addr.to_string(), "fdde:ad00:beef::ff:fe00:400");
        assert_eq!(rloc16_of(&addr), Some(0x0400));
        assert_eq!(mac_of(&addr), None);
        assert_eq!(rloc16_of(&leader_aloc()), Some(LEADER_ALOC16));
    }

    #[test]
    fn test_foreign_address() {
        let addr: Ipv6Addr = "2001:db8::1".parse().unwrap();
        assert!(!is_mesh_local(&addr));
        assert_eq!(mac_of(&addr), None);
        assert_eq!(rloc16_of(&addr), None);
    }

    #[test]
    fn test_format_mac() {
        assert_eq!(format_mac(0x10), "0x0010");
        assert_eq!(format_mac(0x1_0000), "0x0000000000010000");
        assert_eq!(NodeAddr::Rloc(0x400).to_string(), "rloc:0x0400");
    }
}
