use std::path::Path;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use super::{SimError, SimResult};

pub static GLOBAL_CONFIG: OnceCell<SimConfig> = OnceCell::new();
pub fn global_config() -> &'static SimConfig {
    GLOBAL_CONFIG.get().unwrap()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeneralConfig {
    /// directory holding the per-node `node<id>.txt` traffic scripts
    pub script_dir: String,
    /// directory receiving the per-node `node<id>output.txt` delivery logs
    pub output_dir: String,
    /// path to the firewall rule file
    pub firewall_file: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    pub ip: String,
    /// simulated port `n` listens on TCP port `port_base + n`
    pub port_base: u16,
    /// bounded wait per input port while polling for a connection
    pub accept_timeout_ms: u64,
    /// bounded wait for the wire connection attempt
    pub connect_timeout_ms: u64,
    /// idle sleep of the sender and processor loops; also the retry backoff
    pub poll_interval_ms: u64,
    /// upper bound on an encoded frame read off the wire
    pub max_frame_size: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SwitchConfig {
    /// full switching-table expiry window
    pub table_ttl_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FaultConfig {
    /// probability that an encoded frame is given a deliberately wrong checksum
    pub corrupt_probability: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SimConfig {
    pub general: GeneralConfig,
    pub network: NetworkConfig,
    pub switch: SwitchConfig,
    pub fault: FaultConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            general: GeneralConfig {
                script_dir: ".".to_string(),
                output_dir: ".".to_string(),
                firewall_file: "firewall.txt".to_string(),
            },
            network: NetworkConfig {
                ip: "127.0.0.1".to_string(),
                port_base: 42000,
                accept_timeout_ms: 1000,
                connect_timeout_ms: 1000,
                poll_interval_ms: 5,
                max_frame_size: 512,
            },
            switch: SwitchConfig { table_ttl_ms: 8000 },
            fault: FaultConfig {
                corrupt_probability: 0.05,
            },
        }
    }
}

impl SimConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> SimResult<SimConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(SimError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .build()?;

        let sim_config: SimConfig = config.try_deserialize()?;

        if !(0.0..=1.0).contains(&sim_config.fault.corrupt_probability) {
            return Err(SimError::InvalidValue(format!(
                "fault.corrupt_probability must be in 0.0..=1.0, got {}",
                sim_config.fault.corrupt_probability
            )));
        }

        Ok(sim_config)
    }
}
