use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;
use tracing::debug;

use crate::network::Hac;
use crate::service::{SimError, SimResult};

/// Fixed header size: src, dest, checksum, size, ordering, priority, type.
pub const HEADER_LEN: usize = 7;

/// Written in place of the real checksum when fault injection fires. Collides
/// with the true checksum once in 256, in which case the fault is a no-op.
const CORRUPT_CHECKSUM: u8 = 0x73;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data,
    CrcNack,
    FirewallNack,
    FirewallRule,
}

impl FrameType {
    pub fn from_byte(byte: u8) -> SimResult<FrameType> {
        match byte {
            0x00 => Ok(FrameType::Data),
            0x01 => Ok(FrameType::CrcNack),
            0x02 => Ok(FrameType::FirewallNack),
            0xff => Ok(FrameType::FirewallRule),
            other => Err(SimError::MalformedFrame(format!(
                "unknown frame type {:#04x}",
                other
            ))),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            FrameType::Data => 0x00,
            FrameType::CrcNack => 0x01,
            FrameType::FirewallNack => 0x02,
            FrameType::FirewallRule => 0xff,
        }
    }
}

/// One unit of the wire protocol.
///
/// `size == 0` marks a control frame (ACK or NACK); `size > 0` is the payload
/// byte length of a data frame. `crc_ok` is computed at decode time and never
/// transmitted: a checksum mismatch is data for the caller to act on, not an
/// error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub priority: u8,
    pub src: Hac,
    pub dest: Hac,
    pub size: u8,
    pub ordering: u8,
    pub frame_type: FrameType,
    pub payload: String,
    pub crc_ok: bool,
}

impl Frame {
    /// A data frame carrying `payload`, sized from the payload itself.
    pub fn data(
        src: Hac,
        dest: Hac,
        ordering: u8,
        priority: u8,
        payload: impl Into<String>,
    ) -> Frame {
        let payload = payload.into();
        Frame {
            priority,
            src,
            dest,
            size: payload.len() as u8,
            ordering,
            frame_type: FrameType::Data,
            payload,
            crc_ok: true,
        }
    }

    pub fn is_control(&self) -> bool {
        self.size == 0
    }

    /// Synthesizes the reply to this frame: src and dest swapped, size zero,
    /// same ordering and payload. Used for ACKs (`FrameType::Data`) and for
    /// both NACK kinds.
    pub fn reply(&self, frame_type: FrameType) -> Frame {
        Frame {
            priority: self.priority,
            src: self.dest,
            dest: self.src,
            size: 0,
            ordering: self.ordering,
            frame_type,
            payload: self.payload.clone(),
            crc_ok: true,
        }
    }

    /// Encodes the frame for the wire. With probability `corrupt_probability`
    /// the checksum byte is replaced with a known-wrong constant, simulating
    /// channel corruption so the NACK path stays exercised.
    pub fn encode(&self, corrupt_probability: f64) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u8(self.src.as_byte());
        buf.put_u8(self.dest.as_byte());
        buf.put_u8(0);
        buf.put_u8(self.size);
        buf.put_u8(self.ordering);
        buf.put_u8(self.priority);
        buf.put_u8(self.frame_type.as_byte());
        buf.put_slice(self.payload.as_bytes());

        let mut crc = checksum(&buf);
        if corrupt_probability > 0.0 && rand::thread_rng().gen_bool(corrupt_probability) {
            debug!(
                "injecting checksum fault into frame {} -> {}",
                self.src, self.dest
            );
            crc = CORRUPT_CHECKSUM;
        }
        buf[2] = crc;
        buf.freeze()
    }

    /// Decodes a received frame. The checksum is recomputed and its verdict
    /// carried in `crc_ok`; only a truncated header, an unknown frame type or
    /// a non-UTF-8 payload fail outright.
    pub fn decode(buf: &[u8]) -> SimResult<Frame> {
        if buf.len() < HEADER_LEN {
            return Err(SimError::MalformedFrame(format!(
                "{} bytes is shorter than the {}-byte header",
                buf.len(),
                HEADER_LEN
            )));
        }
        let payload = std::str::from_utf8(&buf[HEADER_LEN..])
            .map_err(|e| SimError::MalformedFrame(format!("payload is not utf-8: {}", e)))?
            .to_string();
        Ok(Frame {
            priority: buf[5],
            src: Hac::from_byte(buf[0]),
            dest: Hac::from_byte(buf[1]),
            size: buf[3],
            ordering: buf[4],
            frame_type: FrameType::from_byte(buf[6])?,
            payload,
            crc_ok: checksum(buf) == buf[2],
        })
    }
}

/// Low byte of the sum of every frame byte, with the checksum field itself
/// treated as zero.
fn checksum(bytes: &[u8]) -> u8 {
    let sum: u32 = bytes
        .iter()
        .enumerate()
        .map(|(i, b)| if i == 2 { 0 } else { u32::from(*b) })
        .sum();
    (sum & 0xff) as u8
}
