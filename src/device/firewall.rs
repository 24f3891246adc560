use std::collections::HashSet;

use parking_lot::RwLock;

use crate::network::{Frame, FrameQueue, FrameType, Hac, PortId, BROADCAST};
use crate::service::{SimError, SimResult};

/// Parsed contents of a firewall rule file: lines of `"<target>: <note>"`,
/// where a `#` in the target marks a network-wide (segment) block and any
/// other target blocks a single device.
///
/// Local targets are kept as full addresses so they can be propagated to
/// peer switches verbatim.
#[derive(Debug, Clone, Default)]
pub struct FirewallRules {
    pub global_segments: Vec<u8>,
    pub local_devices: Vec<Hac>,
}

impl FirewallRules {
    pub fn parse(text: &str) -> SimResult<FirewallRules> {
        let mut rules = FirewallRules::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (target, _note) = line
                .split_once(':')
                .ok_or_else(|| SimError::MalformedRule(line.to_string()))?;
            let target = target.trim();
            if target.contains('#') {
                let addr: Hac = target.replace('#', "0").parse()?;
                rules.global_segments.push(addr.network());
            } else {
                rules.local_devices.push(target.parse()?);
            }
        }
        Ok(rules)
    }

    pub fn is_empty(&self) -> bool {
        self.global_segments.is_empty() && self.local_devices.is_empty()
    }
}

/// Block lists enforced by the sender loop at transmission time.
///
/// The receiver loop appends propagated rules while the sender evaluates
/// them, hence the lock; everything else about a device's firewall state is
/// single-writer.
#[derive(Debug, Default)]
pub struct Firewall {
    inner: RwLock<BlockLists>,
}

#[derive(Debug, Default)]
struct BlockLists {
    global_segments: HashSet<u8>,
    local_devices: HashSet<u8>,
}

impl Firewall {
    pub fn new(rules: &FirewallRules) -> Firewall {
        Firewall {
            inner: RwLock::new(BlockLists {
                global_segments: rules.global_segments.iter().copied().collect(),
                local_devices: rules.local_devices.iter().map(|a| a.device()).collect(),
            }),
        }
    }

    /// Adds a propagated per-device block received from a peer switch.
    pub fn absorb_local(&self, addr: Hac) {
        self.inner.write().local_devices.insert(addr.device());
    }

    /// A frame is blocked iff its destination segment or device id is listed
    /// AND source and destination share a segment; cross-segment traffic
    /// bypasses the lists entirely.
    pub fn is_blocked(&self, frame: &Frame) -> bool {
        if !frame.src.same_segment(frame.dest) {
            return false;
        }
        let lists = self.inner.read();
        lists.global_segments.contains(&frame.dest.network())
            || lists.local_devices.contains(&frame.dest.device())
    }
}

/// Queues one FIREWALL_RULE frame per local rule on every attached output
/// port, before the device loops start. The frames carry the rule's textual
/// address, target the broadcast sentinel, and bypass both the firewall
/// check and the learned forwarding table.
pub fn announce_local_rules(rules: &FirewallRules, ports_out: &[PortId], outbound: &FrameQueue) {
    for addr in &rules.local_devices {
        for port in ports_out {
            let payload = addr.to_string();
            outbound.push(
                *port,
                Frame {
                    priority: 0,
                    src: Hac::from_byte(0),
                    dest: BROADCAST,
                    size: payload.len() as u8,
                    ordering: 0,
                    frame_type: FrameType::FirewallRule,
                    payload,
                    crc_ok: true,
                },
            );
        }
    }
}
