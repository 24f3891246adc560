mod device;
mod network;
mod service;
mod topology;

pub use device::{
    announce_local_rules, parse_script, DeliverySink, DeviceLogic, DeviceRuntime, FileSink,
    Firewall, FirewallRules, MemorySink, NodeLogic, RuntimeSettings, SwitchLogic, SwitchTable,
    TrafficEntry,
};
pub use network::{Frame, FrameQueue, FrameType, Hac, PortId, BROADCAST, HEADER_LEN, LOOPBACK};
pub use service::{
    global_config, setup_local_tracing, setup_tracing, SimConfig, SimError, SimOptions, SimResult,
    Simulation, Shutdown, GLOBAL_CONFIG,
};
pub use topology::{build as build_topology, NodePlan, SwitchPlan, Topology, TopologyKind};
