//! OCPP fleet simulator — standalone binary.
//!
//! Thin wrapper around `ocpp_simulator::supervisor`; the CLI crate (`cli/`)
//! is the richer launcher with flag parsing, this binary just runs with
//! whatever configuration file it's pointed at (or the platform default).

use ocpp_simulator::{default_config_path, init_tracing, AppConfig, SupervisorHandle, SupervisorOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = default_config_path();
    let config = AppConfig::load_or_default(&config_path).await;
    init_tracing(&config);

    let handle = SupervisorHandle::start(SupervisorOptions { config }).await?;
    handle.install_signal_handler();
    handle.wait().await;
    Ok(())
}
