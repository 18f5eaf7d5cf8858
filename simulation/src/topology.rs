//! Mesh layouts for simulations
//!
//! - Star: a leader with routers around it, each router with children
//! - Line: routers in a chain, the first one leading
//! - Custom: explicit node and link lists

use pymesh_core::{Mac, NodeRole};

/// One simulated node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSpec {
    pub mac: Mac,
    pub rloc16: u16,
    pub role: NodeRole,
}

/// A radio link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub a: Mac,
    pub b: Mac,
    pub rssi: i8,
}

/// Nodes, links and the elected leader of a simulated partition
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub nodes: Vec<NodeSpec>,
    pub links: Vec<Link>,
    pub leader: Option<Mac>,
}

/// RLOC16 of the n-th router (router ids start at 1)
fn router_rloc(index: usize) -> u16 {
    ((index as u16) + 1) << 10
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn router(mut self, mac: Mac, rloc16: u16) -> Self {
        self.nodes.push(NodeSpec {
            mac,
            rloc16,
            role: NodeRole::Router,
        });
        self
    }

    /// Add a child attached to `parent`
    pub fn child(mut self, mac: Mac, rloc16: u16, parent: Mac, rssi: i8) -> Self {
        self.nodes.push(NodeSpec {
            mac,
            rloc16,
            role: NodeRole::Child,
        });
        self.link(mac, parent, rssi)
    }

    pub fn link(mut self, a: Mac, b: Mac, rssi: i8) -> Self {
        if a != b {
            self.links.push(Link { a, b, rssi });
        }
        self
    }

    pub fn leader(mut self, mac: Mac) -> Self {
        self.leader = Some(mac);
        self
    }

    /// A leader (0x10) with `routers - 1` routers around it, each router
    /// with `children` children
    pub fn star(routers: usize, children: usize) -> Self {
        let mut topology = Self::new();
        let hub: Mac = 0x10;
        for i in 0..routers.max(1) {
            let mac = hub * (i as Mac + 1);
            let rloc16 = router_rloc(i);
            topology = topology.router(mac, rloc16);
            if i > 0 {
                topology = topology.link(hub, mac, -40 - i as i8);
            }
            for j in 0..children {
                topology = topology.child(mac + j as Mac + 1, rloc16 + j as u16 + 1, mac, -60);
            }
        }
        topology.leader(hub)
    }

    /// `routers` routers in a chain, the first one leading
    pub fn line(routers: usize) -> Self {
        let mut topology = Self::new();
        for i in 0..routers.max(1) {
            let mac = 0x10 * (i as Mac + 1);
            topology = topology.router(mac, router_rloc(i));
            if i > 0 {
                topology = topology.link(mac - 0x10, mac, -50);
            }
        }
        topology.leader(0x10)
    }

    pub fn macs(&self) -> Vec<Mac> {
        self.nodes.iter().map(|node| node.mac).collect()
    }

    /// ASCII rendering of nodes and their links
    pub fn visualize(&self) -> String {
        let mut out = String::from("Mesh topology:\n");
        for node in &self.nodes {
            let marker = if self.leader == Some(node.mac) { "*" } else { " " };
            let peers: Vec<String> = self
                .links
                .iter()
                .filter_map(|link| {
                    if link.a == node.mac {
                        Some(format!("{:#06x}({})", link.b, link.rssi))
                    } else if link.b == node.mac {
                        Some(format!("{:#06x}({})", link.a, link.rssi))
                    } else {
                        None
                    }
                })
                .collect();
            out.push_str(&format!(
                "{} {:#06x} [{:#06x}] {:<7} <-> {}\n",
                marker,
                node.mac,
                node.rloc16,
                node.role.to_string(),
                peers.join(", ")
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_layout() {
        let topology = Topology::star(3, 2);
        assert_eq!(topology.nodes.len(), 9);
        assert_eq!(topology.leader, Some(0x10));
        assert_eq!(topology.macs()[..3], [0x10, 0x11, 0x12]);

        let routers: Vec<_> = topology
            .nodes
            .iter()
            .filter(|n| n.role == NodeRole::Router)
            .map(|n| (n.mac, n.rloc16))
            .collect();
        assert_eq!(routers, vec![(0x10, 0x0400), (0x20, 0x0800), (0x30, 0x0c00)]);
        // 2 hub links + 6 child links
        assert_eq!(topology.links.len(), 8);
    }

    #[test]
    fn test_line_layout() {
        let topology = Topology::line(4);
        assert_eq!(topology.macs(), vec![0x10, 0x20, 0x30, 0x40]);
        assert_eq!(topology.links.len(), 3);
        assert!(topology.visualize().contains("* 0x0010"));
    }
}
