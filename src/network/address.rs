use std::fmt;
use std::str::FromStr;

use crate::service::{SimError, SimResult};

/// One-byte hierarchical address: the high nibble is the network segment,
/// the low nibble is the device within that segment.
///
/// The textual form used by configuration files is `"<net>_<dev>"`, each an
/// unsigned integer in 0..=15.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hac(u8);

/// Sentinel destination for frames addressed to every attached peer. Such
/// frames bypass the learned forwarding table entirely.
pub const BROADCAST: Hac = Hac(0xff);

impl Hac {
    pub fn new(network: u8, device: u8) -> SimResult<Hac> {
        if network > 0x0f || device > 0x0f {
            return Err(SimError::MalformedAddress(format!(
                "{}_{} (both parts must be in 0..=15)",
                network, device
            )));
        }
        Ok(Hac((network << 4) | device))
    }

    pub const fn from_byte(byte: u8) -> Hac {
        Hac(byte)
    }

    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Network segment, the high nibble.
    pub const fn network(self) -> u8 {
        self.0 >> 4
    }

    /// Device within the segment, the low nibble.
    pub const fn device(self) -> u8 {
        self.0 & 0x0f
    }

    /// Two addresses are local to each other iff they share the segment nibble.
    pub const fn same_segment(self, other: Hac) -> bool {
        self.network() == other.network()
    }
}

impl fmt::Display for Hac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.network(), self.device())
    }
}

impl FromStr for Hac {
    type Err = SimError;

    fn from_str(s: &str) -> SimResult<Hac> {
        let malformed = || SimError::MalformedAddress(s.to_string());
        let (network, device) = s.trim().split_once('_').ok_or_else(malformed)?;
        let network: u8 = network.parse().map_err(|_| malformed())?;
        let device: u8 = device.parse().map_err(|_| malformed())?;
        Hac::new(network, device)
    }
}
