use crate::network::{Hac, PortId};
use crate::service::{SimError, SimResult};

/// Devices per segment are limited by the address nibble.
const SEGMENT_CAPACITY: usize = 16;

/// Topology selected on the command line. `Priority` is the flat layout with
/// random 0/1 frame priorities enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyKind {
    Flat,
    Backbone,
    Tiered,
    Priority,
}

/// One end node: where it listens, where it sends, and who it is. Node ids
/// are 1-based and assigned here, never from shared process state; they name
/// the `node<id>.txt` script and `node<id>output.txt` delivery log.
#[derive(Debug, Clone)]
pub struct NodePlan {
    pub node_id: usize,
    pub address: Hac,
    pub listen_port: PortId,
    pub gateway_port: PortId,
}

/// One switch: its simplex link pairs (input port, paired output port) and
/// whether it enforces the firewall rule set.
#[derive(Debug, Clone)]
pub struct SwitchPlan {
    pub name: String,
    pub pairs: Vec<(PortId, PortId)>,
    pub firewalled: bool,
}

#[derive(Debug, Clone)]
pub struct Topology {
    pub nodes: Vec<NodePlan>,
    pub switches: Vec<SwitchPlan>,
    pub priority_mode: bool,
}

/// Hands out simulated port numbers sequentially; every port is bound by
/// exactly one device and connected to by exactly one peer.
#[derive(Debug, Default)]
struct PortAllocator {
    next: u16,
}

impl PortAllocator {
    fn next(&mut self) -> PortId {
        let port = PortId(self.next);
        self.next += 1;
        port
    }
}

pub fn build(kind: TopologyKind, num_nodes: usize) -> SimResult<Topology> {
    if num_nodes == 0 || num_nodes > 255 {
        return Err(SimError::InvalidValue(format!(
            "node count must be in 1..=255, got {}",
            num_nodes
        )));
    }
    match kind {
        TopologyKind::Flat => flat(num_nodes, false),
        TopologyKind::Priority => flat(num_nodes, true),
        TopologyKind::Backbone => backbone(num_nodes),
        TopologyKind::Tiered => tiered(num_nodes),
    }
}

fn check_segment_capacity(kind: &str, per_segment: usize, segments: usize) -> SimResult<()> {
    if per_segment > SEGMENT_CAPACITY {
        return Err(SimError::InvalidValue(format!(
            "{} topology holds at most {} nodes ({} per segment)",
            kind,
            SEGMENT_CAPACITY * segments,
            SEGMENT_CAPACITY
        )));
    }
    Ok(())
}

/// One switch, every node in segment 1.
fn flat(num_nodes: usize, priority_mode: bool) -> SimResult<Topology> {
    check_segment_capacity("flat", num_nodes, 1)?;
    let mut alloc = PortAllocator::default();
    let mut nodes = Vec::with_capacity(num_nodes);
    let mut pairs = Vec::with_capacity(num_nodes);
    for i in 0..num_nodes {
        let node = node_plan(&mut alloc, i + 1, Hac::new(1, i as u8)?);
        pairs.push((node.gateway_port, node.listen_port));
        nodes.push(node);
    }
    Ok(Topology {
        nodes,
        switches: vec![SwitchPlan {
            name: "switch1".to_string(),
            pairs,
            firewalled: false,
        }],
        priority_mode,
    })
}

/// Two segment switches joined by a firewall-enforcing backbone switch.
fn backbone(num_nodes: usize) -> SimResult<Topology> {
    if num_nodes % 2 != 0 {
        return Err(SimError::InvalidValue(format!(
            "the backbone topology pairs two segments: node count must be even, got {}",
            num_nodes
        )));
    }
    check_segment_capacity("backbone", num_nodes / 2, 2)?;

    let mut alloc = PortAllocator::default();
    let mut nodes = Vec::with_capacity(num_nodes);
    let mut switches = Vec::with_capacity(3);
    let mut core_pairs = Vec::with_capacity(2);

    let half = num_nodes / 2;
    for (segment, name) in [(1u8, "switch-seg1"), (2u8, "switch-seg2")] {
        let mut pairs = Vec::with_capacity(half + 1);
        for i in 0..half {
            let node_id = (segment as usize - 1) * half + i + 1;
            let node = node_plan(&mut alloc, node_id, Hac::new(segment, i as u8)?);
            pairs.push((node.gateway_port, node.listen_port));
            nodes.push(node);
        }
        // trunk link: the segment switch hears the backbone on `down` and
        // talks to it on `up`, the backbone mirrors the pair
        let up = alloc.next();
        let down = alloc.next();
        pairs.push((down, up));
        core_pairs.push((up, down));
        switches.push(SwitchPlan {
            name: name.to_string(),
            pairs,
            firewalled: false,
        });
    }

    switches.push(SwitchPlan {
        name: "backbone".to_string(),
        pairs: core_pairs,
        firewalled: true,
    });

    Ok(Topology {
        nodes,
        switches,
        priority_mode: false,
    })
}

/// Two backbone-style clusters joined by a firewall-enforcing core: four edge
/// segments, two mid switches, one core.
fn tiered(num_nodes: usize) -> SimResult<Topology> {
    if num_nodes % 4 != 0 {
        return Err(SimError::InvalidValue(format!(
            "the tiered topology spreads four segments: node count must be divisible by 4, got {}",
            num_nodes
        )));
    }
    check_segment_capacity("tiered", num_nodes / 4, 4)?;

    let mut alloc = PortAllocator::default();
    let mut nodes = Vec::with_capacity(num_nodes);
    let mut switches = Vec::new();
    let mut core_pairs = Vec::with_capacity(2);

    let quarter = num_nodes / 4;
    for mid in 0..2usize {
        let mut mid_pairs = Vec::with_capacity(3);
        for leaf in 0..2usize {
            let segment = (mid * 2 + leaf + 1) as u8;
            let mut pairs = Vec::with_capacity(quarter + 1);
            for i in 0..quarter {
                let node_id = (segment as usize - 1) * quarter + i + 1;
                let node = node_plan(&mut alloc, node_id, Hac::new(segment, i as u8)?);
                pairs.push((node.gateway_port, node.listen_port));
                nodes.push(node);
            }
            let up = alloc.next();
            let down = alloc.next();
            pairs.push((down, up));
            mid_pairs.push((up, down));
            switches.push(SwitchPlan {
                name: format!("switch-seg{}", segment),
                pairs,
                firewalled: false,
            });
        }
        let up = alloc.next();
        let down = alloc.next();
        mid_pairs.push((down, up));
        core_pairs.push((up, down));
        switches.push(SwitchPlan {
            name: format!("switch-mid{}", mid + 1),
            pairs: mid_pairs,
            firewalled: false,
        });
    }

    switches.push(SwitchPlan {
        name: "core".to_string(),
        pairs: core_pairs,
        firewalled: true,
    });

    Ok(Topology {
        nodes,
        switches,
        priority_mode: false,
    })
}

fn node_plan(alloc: &mut PortAllocator, node_id: usize, address: Hac) -> NodePlan {
    NodePlan {
        node_id,
        address,
        listen_port: alloc.next(),
        gateway_port: alloc.next(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    /// Every port shows up once as a binding (node listen / switch input) and
    /// once as a connection target.
    fn assert_ports_consistent(topology: &Topology) {
        let mut bound = HashSet::new();
        for node in &topology.nodes {
            assert!(bound.insert(node.listen_port));
        }
        for switch in &topology.switches {
            for (input, _) in &switch.pairs {
                assert!(bound.insert(*input), "port {} bound twice", input);
            }
        }
        for switch in &topology.switches {
            for (_, output) in &switch.pairs {
                assert!(bound.contains(output), "switch output {} leads nowhere", output);
            }
        }
        for node in &topology.nodes {
            assert!(bound.contains(&node.gateway_port));
        }
    }

    #[test]
    fn flat_layout() {
        let topology = build(TopologyKind::Flat, 4).unwrap();
        assert_eq!(topology.nodes.len(), 4);
        assert_eq!(topology.switches.len(), 1);
        assert_eq!(topology.switches[0].pairs.len(), 4);
        assert!(!topology.priority_mode);
        assert!(!topology.switches[0].firewalled);
        assert_ports_consistent(&topology);
    }

    #[test]
    fn priority_is_flat_with_priorities() {
        let topology = build(TopologyKind::Priority, 2).unwrap();
        assert!(topology.priority_mode);
        assert_eq!(topology.switches.len(), 1);
    }

    #[test]
    fn backbone_layout() {
        let topology = build(TopologyKind::Backbone, 6).unwrap();
        assert_eq!(topology.nodes.len(), 6);
        assert_eq!(topology.switches.len(), 3);
        assert!(topology.switches[2].firewalled);
        // three nodes per segment, distinct segments
        assert_eq!(topology.nodes[0].address.network(), 1);
        assert_eq!(topology.nodes[3].address.network(), 2);
        // node ids are 1-based and unique
        let ids: HashSet<_> = topology.nodes.iter().map(|n| n.node_id).collect();
        assert_eq!(ids, (1..=6).collect());
        assert_ports_consistent(&topology);
    }

    #[test]
    fn tiered_layout() {
        let topology = build(TopologyKind::Tiered, 8).unwrap();
        assert_eq!(topology.nodes.len(), 8);
        // 4 edge + 2 mid + core
        assert_eq!(topology.switches.len(), 7);
        assert!(topology.switches.last().unwrap().firewalled);
        let segments: HashSet<_> = topology.nodes.iter().map(|n| n.address.network()).collect();
        assert_eq!(segments, [1, 2, 3, 4].into_iter().collect());
        assert_ports_consistent(&topology);
    }

    #[test]
    fn invalid_node_counts_are_rejected() {
        assert!(build(TopologyKind::Flat, 0).is_err());
        assert!(build(TopologyKind::Flat, 256).is_err());
        assert!(build(TopologyKind::Flat, 17).is_err());
        assert!(build(TopologyKind::Backbone, 5).is_err());
        assert!(build(TopologyKind::Tiered, 6).is_err());
    }
}
