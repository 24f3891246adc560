pub use app_error::{SimError, SimResult};
pub use config::{
    global_config, FaultConfig, GeneralConfig, NetworkConfig, SimConfig, SwitchConfig,
    GLOBAL_CONFIG,
};
pub use shutdown::Shutdown;
pub use simulation::{SimOptions, Simulation};
pub use tracing_config::{setup_local_tracing, setup_tracing};

mod app_error;
mod config;
mod shutdown;
mod simulation;
mod tracing_config;
