//! OCPP fleet simulator — CLI launcher.
//!
//! ```sh
//! # Run with the platform-default config path
//! ocpp-simulator-cli
//!
//! # Custom config path
//! ocpp-simulator-cli --config /etc/ocpp-simulator/config.toml
//!
//! # Validate config without starting
//! ocpp-simulator-cli --check
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use ocpp_simulator::{default_config_path, init_tracing, AppConfig, SupervisorHandle, SupervisorOptions};

/// EV charging-station fleet simulator speaking OCPP 1.6 / 2.0.1.
#[derive(Parser, Debug)]
#[command(
    name = "ocpp-simulator-cli",
    version,
    about = "EV charging-station fleet simulator (OCPP 1.6 / 2.0.1)",
    long_about = "Runs a fleet of simulated charging stations against a CSMS \
                  and exposes a UI control-plane server for driving them.\n\n\
                  Default config: see `ocpp_simulator::default_config_path()`."
)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(short, long, env = "OCPP_CONFIG")]
    config: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(short, long)]
    log_level: Option<String>,

    /// Validate the configuration file and exit without starting.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);

    let mut config = match AppConfig::from_file(&config_path).await {
        Ok(cfg) => cfg,
        Err(_) if !config_path.exists() => AppConfig::default(),
        Err(e) => {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
                .init();
            error!(path = %config_path.display(), error = %e, "invalid configuration file");
            return ExitCode::from(2);
        }
    };

    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    init_tracing(&config);
    info!(path = %config_path.display(), "configuration loaded");

    apply_platform_env(&mut config);

    if cli.check {
        println!("configuration is valid");
        println!("  config file : {}", config_path.display());
        println!("  ui address  : {}", config.ui.bind_addr);
        println!("  metrics     : {}", config.supervisor.metrics_bind_addr);
        println!("  pool model  : {:?}", config.supervisor.worker_pool_model);
        return ExitCode::SUCCESS;
    }

    let handle = match SupervisorHandle::start(SupervisorOptions { config }).await {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "failed to start fleet supervisor");
            return ExitCode::from(1);
        }
    };

    handle.install_signal_handler();
    info!("press Ctrl+C to shut down gracefully");
    handle.wait().await;

    ExitCode::SUCCESS
}

/// Apply the platform environment variables the launcher is responsible for.
/// None of these are simulator settings — they're hosting-platform plumbing
/// (CI runner, Cloud Foundry, build metadata) that only the launcher itself
/// should read, so nothing downstream of `SupervisorHandle::start` touches
/// the environment directly.
fn apply_platform_env(config: &mut AppConfig) {
    if let Ok(port) = std::env::var("PORT") {
        match set_bind_port(&mut config.ui.bind_addr, &port) {
            Ok(()) => info!(port, "UI port overridden from PORT"),
            Err(e) => error!(port, error = %e, "ignoring malformed PORT"),
        }
    }

    if let Ok(vcap) = std::env::var("VCAP_APPLICATION") {
        match serde_json::from_str::<serde_json::Value>(&vcap) {
            Ok(value) => {
                if let Some(port) = value.get("port").and_then(|p| p.as_u64()) {
                    let _ = set_bind_port(&mut config.ui.bind_addr, &port.to_string());
                    info!(port, "UI port overridden from VCAP_APPLICATION");
                }
            }
            Err(e) => error!(error = %e, "ignoring malformed VCAP_APPLICATION"),
        }
    }

    if let Ok(ci) = std::env::var("CI") {
        info!(ci, "running under a CI runner");
    }
    if let Ok(build) = std::env::var("BUILD") {
        info!(build, "build identifier");
    }
    // SKIP_PREINSTALL has no equivalent step in this launcher; read only so
    // platforms that always set it don't need a special case.
    let _ = std::env::var("SKIP_PREINSTALL");
}

fn set_bind_port(bind_addr: &mut String, port: &str) -> Result<(), std::num::ParseIntError> {
    let port: u16 = port.parse()?;
    let host = bind_addr.rsplit_once(':').map(|(host, _)| host).unwrap_or("0.0.0.0");
    *bind_addr = format!("{host}:{port}");
    Ok(())
}
