//! Wire-level building blocks of the simulation.
//!
//! # Components
//!
//! - `Hac`: the one-byte hierarchical address (segment nibble, device nibble)
//! - `Frame`: the wire unit, a 7-byte header plus UTF-8 payload, with a
//!   low-byte-sum checksum and deliberate fault injection for the NACK path
//! - `FrameQueue`: the priority-ordered hand-off between device loops
//!
//! Everything here is shared by every device variant; the queues define what
//! the device runtime carries and the frame codec defines what crosses the
//! wire.

pub use address::{Hac, BROADCAST};
pub use frame::{Frame, FrameType, HEADER_LEN};
pub use queue::{FrameQueue, PortId, LOOPBACK};

mod address;
mod frame;
mod queue;
