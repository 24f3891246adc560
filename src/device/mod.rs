//! Device layer of the simulation.
//!
//! Every device shares the same execution shape, `DeviceRuntime`: an inbound
//! and an outbound priority queue and three independently scheduled loops
//! (receiver, sender, processor). The processor is the only device-specific
//! part, expressed through the `DeviceLogic` trait with exactly two
//! implementations: `SwitchLogic`, the self-learning forwarding engine, and
//! `NodeLogic`, the ACK-based reliable-delivery engine.

pub use firewall::{announce_local_rules, Firewall, FirewallRules};
pub use node::NodeLogic;
pub use runtime::{DeviceLogic, DeviceRuntime, RuntimeSettings};
pub use switch::{SwitchLogic, SwitchTable};
pub use traffic::{parse_script, DeliverySink, FileSink, MemorySink, TrafficEntry};

mod firewall;
mod node;
mod runtime;
mod switch;
mod traffic;
