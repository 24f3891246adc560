use std::path::PathBuf;

use clap::Parser;
use dotenv::dotenv;
use lansim::{
    setup_tracing, SimConfig, SimOptions, SimResult, Simulation, TopologyKind, GLOBAL_CONFIG,
};
use tokio::runtime;

/// Simulates a switched local network: traffic-generating end nodes,
/// self-learning switches, a checksummed wire protocol, a firewall overlay
/// and ACK-based delivery. Each node sends the traffic scripted in
/// node<id>.txt and logs accepted frames to node<id>output.txt; the run ends
/// once every node's sends are acknowledged.
#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// number of end nodes in the topology
    #[arg(value_parser = clap::value_parser!(u16).range(1..=255))]
    pub nodes: u16,
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    /// two segments joined by a firewall-enforcing backbone switch
    #[arg(long, conflicts_with_all = ["tiered", "priority"])]
    pub backbone: bool,
    /// four segments behind two switch tiers and a firewall-enforcing core
    #[arg(long, conflicts_with = "priority")]
    pub tiered: bool,
    /// flat topology with random 0/1 frame priorities
    #[arg(long)]
    pub priority: bool,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl CommandLine {
    fn topology_kind(&self) -> TopologyKind {
        if self.backbone {
            TopologyKind::Backbone
        } else if self.tiered {
            TopologyKind::Tiered
        } else if self.priority {
            TopologyKind::Priority
        } else {
            TopologyKind::Flat
        }
    }
}

fn main() -> SimResult<()> {
    dotenv().ok();

    let commandline = CommandLine::parse();
    let _log_guard = setup_tracing(commandline.verbose);

    // setup config; without a conf.toml the built-in defaults apply
    let config_path = commandline
        .conf
        .as_ref()
        .map_or_else(|| PathBuf::from("conf.toml"), PathBuf::from);
    let sim_config = if commandline.conf.is_some() || config_path.exists() {
        SimConfig::set_up_config(config_path)?
    } else {
        SimConfig::default()
    };
    GLOBAL_CONFIG
        .set(sim_config)
        .expect("set simulation config failed");

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;

    let simulation = Simulation::new(SimOptions {
        num_nodes: commandline.nodes as usize,
        kind: commandline.topology_kind(),
    })?;
    simulation.start(&rt)?;

    Ok(())
}
