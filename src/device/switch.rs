use std::collections::{HashMap, HashSet};

use tokio::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::device::DeviceLogic;
use crate::network::{Frame, FrameQueue, Hac, PortId};
use crate::service::SimResult;

/// Learned address-to-port mappings of one switch, with full-table expiry.
///
/// Each input port is wired at construction to exactly one output port (a
/// simplex link pair). Both per-port learned sets share a single expiry
/// deadline: once it passes, everything is forgotten at once and relearned
/// from live traffic. Only the owning processor loop writes here.
#[derive(Debug)]
pub struct SwitchTable {
    learned_in: HashMap<PortId, HashSet<Hac>>,
    learned_out: HashMap<PortId, HashSet<Hac>>,
    in_to_out: HashMap<PortId, PortId>,
    ttl: Duration,
    expires_at: Instant,
}

impl SwitchTable {
    pub fn new(pairs: &[(PortId, PortId)], ttl: Duration) -> SwitchTable {
        let mut learned_in = HashMap::with_capacity(pairs.len());
        let mut learned_out = HashMap::with_capacity(pairs.len());
        let mut in_to_out = HashMap::with_capacity(pairs.len());
        for (input, output) in pairs {
            learned_in.insert(*input, HashSet::new());
            learned_out.insert(*output, HashSet::new());
            in_to_out.insert(*input, *output);
        }
        SwitchTable {
            learned_in,
            learned_out,
            in_to_out,
            ttl,
            expires_at: Instant::now() + ttl,
        }
    }

    /// True when the shared deadline has passed; clears both mappings
    /// atomically and schedules the next expiry.
    pub fn expire_if_due(&mut self) -> bool {
        if Instant::now() < self.expires_at {
            return false;
        }
        for set in self.learned_in.values_mut() {
            set.clear();
        }
        for set in self.learned_out.values_mut() {
            set.clear();
        }
        self.expires_at = Instant::now() + self.ttl;
        true
    }

    /// Records `addr` against the ingress port and its paired output,
    /// evicting it from every other port first: an address belongs to exactly
    /// one port at a time. An ingress with no pair (the loopback sentinel) is
    /// never learned.
    pub fn learn(&mut self, ingress: PortId, addr: Hac) {
        let Some(&egress) = self.in_to_out.get(&ingress) else {
            return;
        };
        for (port, set) in self.learned_in.iter_mut() {
            if *port != ingress {
                set.remove(&addr);
            }
        }
        for (port, set) in self.learned_out.iter_mut() {
            if *port != egress {
                set.remove(&addr);
            }
        }
        if let Some(set) = self.learned_in.get_mut(&ingress) {
            set.insert(addr);
        }
        if let Some(set) = self.learned_out.get_mut(&egress) {
            set.insert(addr);
        }
    }

    /// The single output port that has learned `dest`, if any.
    pub fn lookup(&self, dest: Hac) -> Option<PortId> {
        self.learned_out
            .iter()
            .find(|(_, set)| set.contains(&dest))
            .map(|(port, _)| *port)
    }

    pub fn pair_of(&self, ingress: PortId) -> Option<PortId> {
        self.in_to_out.get(&ingress).copied()
    }

    /// A freshly cleared table; the first learn makes it warm again.
    pub fn is_cold(&self) -> bool {
        self.learned_in.values().all(|set| set.is_empty())
    }
}

/// Self-learning forwarding engine: learns source addresses per ingress
/// port, unicasts to learned destinations and floods the rest, never
/// reflecting a frame back the way it came.
pub struct SwitchLogic {
    name: String,
    table: SwitchTable,
    ports_out: Vec<PortId>,
}

impl SwitchLogic {
    pub fn new(name: impl Into<String>, pairs: &[(PortId, PortId)], ttl: Duration) -> SwitchLogic {
        SwitchLogic {
            name: name.into(),
            table: SwitchTable::new(pairs, ttl),
            ports_out: pairs.iter().map(|(_, output)| *output).collect(),
        }
    }

    pub fn table(&self) -> &SwitchTable {
        &self.table
    }
}

impl DeviceLogic for SwitchLogic {
    fn process(&mut self, ingress: PortId, frame: Frame, outbound: &FrameQueue) -> SimResult<()> {
        if self.table.expire_if_due() {
            // the frame that observed the expiry is not learned this cycle
            debug!("switch {}: table expired, relearning from scratch", self.name);
        } else {
            self.table.learn(ingress, frame.src);
        }

        match self.table.lookup(frame.dest) {
            Some(port) => {
                trace!(
                    "switch {}: forwarding {} -> {} via learned port {}",
                    self.name,
                    frame.src,
                    frame.dest,
                    port
                );
                outbound.push(port, frame);
            }
            None => {
                let skip = self.table.pair_of(ingress);
                trace!(
                    "switch {}: flooding {} -> {} (destination unknown)",
                    self.name,
                    frame.src,
                    frame.dest
                );
                for port in &self.ports_out {
                    if Some(*port) == skip {
                        continue;
                    }
                    outbound.push(*port, frame.clone());
                }
            }
        }
        Ok(())
    }
}
