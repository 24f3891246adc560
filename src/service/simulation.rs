use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio::sync::{broadcast, mpsc};
use tokio::{signal, time};
use tracing::{error, info, trace, warn};

use crate::device::{
    announce_local_rules, parse_script, DeviceLogic, DeviceRuntime, FileSink, Firewall,
    FirewallRules, NodeLogic, RuntimeSettings, SwitchLogic, TrafficEntry,
};
use crate::service::{global_config, SimError, SimResult};
use crate::topology::{self, Topology, TopologyKind};

#[derive(Debug, Clone, Copy)]
pub struct SimOptions {
    pub num_nodes: usize,
    pub kind: TopologyKind,
}

/// Owns one full simulation run: topology, traffic scripts, firewall rules.
///
/// The overall termination condition is external to any single device: the
/// run ends when every node reports FINISHED, after which the device loops
/// are told to shut down and drained.
pub struct Simulation {
    topology: Topology,
    settings: RuntimeSettings,
    rules: FirewallRules,
    /// aligned with `topology.nodes`
    scripts: Vec<Vec<TrafficEntry>>,
    output_dir: PathBuf,
}

impl Simulation {
    /// Loads the firewall rule file and every node's traffic script and
    /// builds the selected topology. Any file or format problem is fatal
    /// here, before a single device starts.
    pub fn new(opts: SimOptions) -> SimResult<Simulation> {
        let config = global_config();
        let topology = topology::build(opts.kind, opts.num_nodes)?;
        let settings = RuntimeSettings::from_config(config);

        let rules = load_firewall_rules(Path::new(&config.general.firewall_file))?;
        if !rules.is_empty() && !topology.switches.iter().any(|s| s.firewalled) {
            info!("firewall rules are present but this topology has no firewalled switch");
        }

        let script_dir = Path::new(&config.general.script_dir);
        let mut scripts = Vec::with_capacity(topology.nodes.len());
        for node in &topology.nodes {
            let path = script_dir.join(format!("node{}.txt", node.node_id));
            let text = fs::read_to_string(&path).map_err(|e| {
                SimError::DetailedIo(format!("traffic script {}: {}", path.display(), e))
            })?;
            scripts.push(parse_script(&text)?);
        }

        let output_dir = PathBuf::from(&config.general.output_dir);
        fs::create_dir_all(&output_dir)?;

        Ok(Simulation {
            topology,
            settings,
            rules,
            scripts,
            output_dir,
        })
    }

    /// Runs the simulation to completion on the given runtime, then shuts the
    /// device loops down and waits for them to drain.
    pub fn start(self, rt: &tokio::runtime::Runtime) -> SimResult<()> {
        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel(1);

        rt.block_on(self.run(notify_shutdown.clone(), shutdown_complete_tx))?;

        // every device loop holds a subscription; tell them all to stop
        let _ = notify_shutdown.send(());
        trace!("waiting for device loops to drain...");
        rt.block_on(shutdown_complete_rx.recv());
        info!("simulation shutdown complete");
        Ok(())
    }

    async fn run(
        self,
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: mpsc::Sender<()>,
    ) -> SimResult<()> {
        let Simulation {
            topology,
            settings,
            rules,
            scripts,
            output_dir,
        } = self;

        let mut devices: Vec<(DeviceRuntime, Box<dyn DeviceLogic>)> = Vec::new();
        let mut finished_flags: Vec<Arc<AtomicBool>> = Vec::new();

        let table_ttl = time::Duration::from_millis(global_config().switch.table_ttl_ms);
        for plan in &topology.switches {
            let ports_in: Vec<_> = plan.pairs.iter().map(|(input, _)| *input).collect();
            let ports_out: Vec<_> = plan.pairs.iter().map(|(_, output)| *output).collect();
            // every switch can enforce and absorb rules; only the firewalled
            // one starts with the configured set, the rest start empty and
            // learn from FIREWALL_RULE frames
            let firewall = if plan.firewalled {
                Firewall::new(&rules)
            } else {
                Firewall::default()
            };
            let runtime = DeviceRuntime::new(
                plan.name.clone(),
                ports_in,
                ports_out.clone(),
                Some(Arc::new(firewall)),
                settings.clone(),
            );
            if plan.firewalled {
                // propagate local blocks to adjacent switches before traffic flows
                announce_local_rules(&rules, &ports_out, &runtime.outbound());
            }
            let logic = SwitchLogic::new(plan.name.clone(), &plan.pairs, table_ttl);
            devices.push((runtime, Box::new(logic)));
        }

        for (plan, traffic) in topology.nodes.iter().zip(scripts) {
            let name = format!("node{}", plan.node_id);
            let runtime = DeviceRuntime::new(
                name.clone(),
                vec![plan.listen_port],
                vec![plan.gateway_port],
                None,
                settings.clone(),
            );
            let sink_path = output_dir.join(format!("node{}output.txt", plan.node_id));
            let sink = FileSink::create(&sink_path).map_err(|e| {
                SimError::DetailedIo(format!("delivery log {}: {}", sink_path.display(), e))
            })?;
            let logic = NodeLogic::new(
                name,
                plan.address,
                plan.gateway_port,
                traffic,
                topology.priority_mode,
                Box::new(sink),
                &runtime.outbound(),
            )?;
            finished_flags.push(logic.finished_flag());
            devices.push((runtime, Box::new(logic)));
        }

        // start order should not matter; shuffle to keep that honest
        devices.shuffle(&mut rand::thread_rng());
        info!("starting {} devices", devices.len());
        for (runtime, logic) in devices {
            runtime
                .start(logic, &notify_shutdown, &shutdown_complete_tx)
                .await?;
        }
        drop(shutdown_complete_tx);

        tokio::select! {
            _ = wait_all_finished(&finished_flags, settings.poll_interval) => {
                info!("all {} nodes report finished", finished_flags.len());
            }
            _ = signal::ctrl_c() => {
                warn!("interrupt received, shutting down early");
            }
        }
        Ok(())
    }
}

async fn wait_all_finished(flags: &[Arc<AtomicBool>], poll_interval: time::Duration) {
    let mut interval = time::interval(poll_interval);
    loop {
        interval.tick().await;
        let finished = flags.iter().filter(|f| f.load(Ordering::Acquire)).count();
        if finished == flags.len() {
            return;
        }
        trace!("{}/{} nodes finished", finished, flags.len());
    }
}

/// A missing rule file is an empty rule set; a malformed one is fatal.
fn load_firewall_rules(path: &Path) -> SimResult<FirewallRules> {
    match fs::read_to_string(path) {
        Ok(text) => FirewallRules::parse(&text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("no firewall rule file at {}, running open", path.display());
            Ok(FirewallRules::default())
        }
        Err(e) => {
            error!("failed to read firewall rules {}: {}", path.display(), e);
            Err(e.into())
        }
    }
}
