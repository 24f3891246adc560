use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, info, trace};

use crate::device::traffic::{DeliverySink, TrafficEntry};
use crate::device::DeviceLogic;
use crate::network::{Frame, FrameQueue, FrameType, Hac, PortId};
use crate::service::{SimError, SimResult};

/// Reliable-delivery endpoint: generates the scripted outbound traffic,
/// tracks per-message acknowledgment in the pending-send map, and replies to
/// inbound data with ACKs.
///
/// The node is FINISHED exactly when the pending-send map is empty; a
/// FINISHED node still drains its inbound queue and acknowledges data
/// indefinitely. Retransmission happens only on transport-level send
/// failure, never on a missing ACK, so a delivered frame whose ACK is lost
/// stays pending forever.
pub struct NodeLogic {
    name: String,
    address: Hac,
    gateway: PortId,
    /// sequence number -> original frame, cleared to `None` on matching ACK
    pending: HashMap<u8, Option<Frame>>,
    /// data frames accepted per sender; metadata only, ordering enforcement
    /// is deliberately not active
    rcv_counts: HashMap<Hac, u64>,
    finished: Arc<AtomicBool>,
    sink: Box<dyn DeliverySink>,
}

impl std::fmt::Debug for NodeLogic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeLogic")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("gateway", &self.gateway)
            .field("pending", &self.pending)
            .field("rcv_counts", &self.rcv_counts)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl NodeLogic {
    /// Assigns each traffic entry a strictly increasing sequence number,
    /// fills the pending-send map and enqueues one DATA frame per entry on
    /// `outbound`. An empty traffic list starts the node FINISHED.
    pub fn new(
        name: impl Into<String>,
        address: Hac,
        gateway: PortId,
        traffic: Vec<TrafficEntry>,
        priority_mode: bool,
        sink: Box<dyn DeliverySink>,
        outbound: &FrameQueue,
    ) -> SimResult<NodeLogic> {
        if traffic.len() > usize::from(u8::MAX) + 1 {
            return Err(SimError::InvalidValue(format!(
                "traffic script has {} sends, sequence numbers only cover 256",
                traffic.len()
            )));
        }

        let finished = Arc::new(AtomicBool::new(traffic.is_empty()));
        let mut pending = HashMap::with_capacity(traffic.len());
        let mut rng = rand::thread_rng();
        for (sequence, entry) in traffic.into_iter().enumerate() {
            // a payload longer than the one-byte size field would wrap, and a
            // wrapped size of zero turns a data frame into a control frame
            if entry.payload.is_empty() || entry.payload.len() > usize::from(u8::MAX) {
                return Err(SimError::InvalidValue(format!(
                    "send {} to {}: payload must be 1..=255 bytes, got {}",
                    sequence,
                    entry.dest,
                    entry.payload.len()
                )));
            }
            let priority = if priority_mode { rng.gen_range(0..=1) } else { 0 };
            let frame = Frame::data(address, entry.dest, sequence as u8, priority, entry.payload);
            pending.insert(sequence as u8, Some(frame.clone()));
            outbound.push(gateway, frame);
        }

        Ok(NodeLogic {
            name: name.into(),
            address,
            gateway,
            pending,
            rcv_counts: HashMap::new(),
            finished,
            sink,
        })
    }

    /// Shared FINISHED flag the owning simulation polls for termination.
    pub fn finished_flag(&self) -> Arc<AtomicBool> {
        self.finished.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.values().filter(|f| f.is_some()).count()
    }
}

impl DeviceLogic for NodeLogic {
    fn tick(&mut self, _outbound: &FrameQueue) -> SimResult<()> {
        self.pending.retain(|_, frame| frame.is_some());
        if self.pending.is_empty() && !self.finished.load(Ordering::Acquire) {
            self.finished.store(true, Ordering::Release);
            info!("{} finished: every send acknowledged", self.name);
        }
        Ok(())
    }

    fn process(&mut self, _ingress: PortId, frame: Frame, outbound: &FrameQueue) -> SimResult<()> {
        if frame.dest != self.address {
            debug!(
                "{} discards frame addressed to {} (not us)",
                self.name, frame.dest
            );
            return Ok(());
        }

        if frame.is_control() {
            match self.pending.get(&frame.ordering).cloned().flatten() {
                None => {
                    // duplicate or stale ack, not an error
                    trace!(
                        "{}: stale ack for sequence {}, ignored",
                        self.name,
                        frame.ordering
                    );
                }
                Some(sent) if sent.payload == frame.payload => {
                    debug!("{}: send {} acknowledged", self.name, frame.ordering);
                    self.pending.insert(frame.ordering, None);
                }
                Some(sent) => {
                    // an ack claiming to satisfy a different payload slipped
                    // past the checksum; this must never be accepted
                    return Err(SimError::AckPayloadMismatch {
                        sequence: frame.ordering,
                        sent: sent.payload,
                        acked: frame.payload,
                    });
                }
            }
        } else {
            self.sink.append(frame.src, &frame.payload)?;
            *self.rcv_counts.entry(frame.src).or_insert(0) += 1;
            trace!(
                "{} accepted '{}' from {}",
                self.name,
                frame.payload,
                frame.src
            );
            outbound.push(self.gateway, frame.reply(FrameType::Data));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::traffic::MemorySink;

    fn addr(network: u8, device: u8) -> Hac {
        Hac::new(network, device).unwrap()
    }

    fn node_with_one_send() -> (NodeLogic, FrameQueue, MemorySink) {
        let outbound = FrameQueue::new();
        let sink = MemorySink::new();
        let node = NodeLogic::new(
            "node1",
            addr(0, 1),
            PortId(1),
            vec![TrafficEntry {
                dest: addr(1, 1),
                payload: "hi".to_string(),
            }],
            false,
            Box::new(sink.clone()),
            &outbound,
        )
        .unwrap();
        (node, outbound, sink)
    }

    #[test]
    fn construction_enqueues_data_frames() {
        let (node, outbound, _) = node_with_one_send();
        assert!(!node.is_finished());
        assert_eq!(node.pending_count(), 1);

        let (port, frame) = outbound.pop().unwrap();
        assert_eq!(port, PortId(1));
        assert_eq!(frame.frame_type, FrameType::Data);
        assert_eq!(frame.ordering, 0);
        assert_eq!(frame.payload, "hi");
    }

    #[test]
    fn empty_traffic_starts_finished() {
        let outbound = FrameQueue::new();
        let node = NodeLogic::new(
            "node2",
            addr(1, 1),
            PortId(3),
            Vec::new(),
            false,
            Box::new(MemorySink::new()),
            &outbound,
        )
        .unwrap();
        assert!(node.is_finished());
        assert!(outbound.is_empty());
    }

    #[test]
    fn oversized_payload_is_rejected_before_it_can_wrap() {
        // were it accepted, the frame's size byte would wrap to zero and the
        // receiver would run the ACK path instead of delivering
        let oversize = Frame::data(addr(0, 1), addr(1, 1), 0, 0, "x".repeat(256));
        assert!(oversize.is_control());

        let outbound = FrameQueue::new();
        let err = NodeLogic::new(
            "node1",
            addr(0, 1),
            PortId(1),
            vec![TrafficEntry {
                dest: addr(1, 1),
                payload: "x".repeat(256),
            }],
            false,
            Box::new(MemorySink::new()),
            &outbound,
        )
        .unwrap_err();
        assert!(matches!(err, SimError::InvalidValue(_)));
        assert!(outbound.is_empty());
    }

    #[test]
    fn empty_payload_is_rejected() {
        let outbound = FrameQueue::new();
        let err = NodeLogic::new(
            "node1",
            addr(0, 1),
            PortId(1),
            vec![TrafficEntry {
                dest: addr(1, 1),
                payload: String::new(),
            }],
            false,
            Box::new(MemorySink::new()),
            &outbound,
        )
        .unwrap_err();
        assert!(matches!(err, SimError::InvalidValue(_)));
    }

    #[test]
    fn matching_ack_clears_pending_and_finishes() {
        let (mut node, outbound, _) = node_with_one_send();
        let (_, sent) = outbound.pop().unwrap();

        let ack = sent.reply(FrameType::Data);
        node.process(PortId(0), ack, &outbound).unwrap();
        node.tick(&outbound).unwrap();

        assert_eq!(node.pending_count(), 0);
        assert!(node.is_finished());
    }

    #[test]
    fn stale_ack_is_ignored() {
        let (mut node, outbound, _) = node_with_one_send();

        let mut stale = outbound.pop().unwrap().1.reply(FrameType::Data);
        stale.ordering = 42;
        node.process(PortId(0), stale, &outbound).unwrap();
        node.tick(&outbound).unwrap();

        assert_eq!(node.pending_count(), 1);
        assert!(!node.is_finished());
    }

    #[test]
    fn mismatched_ack_payload_is_fatal() {
        let (mut node, outbound, _) = node_with_one_send();

        let mut ack = outbound.pop().unwrap().1.reply(FrameType::Data);
        ack.payload = "tampered".to_string();
        let err = node.process(PortId(0), ack, &outbound).unwrap_err();
        assert!(matches!(err, SimError::AckPayloadMismatch { sequence: 0, .. }));
    }

    #[test]
    fn inbound_data_is_sunk_and_acknowledged() {
        let outbound = FrameQueue::new();
        let sink = MemorySink::new();
        let mut node = NodeLogic::new(
            "node2",
            addr(1, 1),
            PortId(3),
            Vec::new(),
            false,
            Box::new(sink.clone()),
            &outbound,
        )
        .unwrap();

        let data = Frame::data(addr(0, 1), addr(1, 1), 0, 0, "hi");
        node.process(PortId(2), data, &outbound).unwrap();

        assert_eq!(sink.records(), vec!["1: hi".to_string()]);
        let (port, ack) = outbound.pop().unwrap();
        assert_eq!(port, PortId(3));
        assert!(ack.is_control());
        assert_eq!(ack.src, addr(1, 1));
        assert_eq!(ack.dest, addr(0, 1));
        assert_eq!(ack.payload, "hi");
    }

    #[test]
    fn frames_for_other_destinations_are_discarded() {
        let (mut node, outbound, sink) = node_with_one_send();
        outbound.pop();

        let misdelivered = Frame::data(addr(1, 1), addr(0, 9), 0, 0, "nope");
        node.process(PortId(0), misdelivered, &outbound).unwrap();

        assert!(sink.records().is_empty());
        assert!(outbound.is_empty());
    }
}
