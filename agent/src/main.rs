//! servicesync - Entry Point
//!
//! Listens for image registry push webhooks and redeploys the containers or
//! cluster services configured for the pushed repository.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use anyhow::Context;
use servicesync::app::options::AppOptions;
use servicesync::app::run::run;
use servicesync::filesys::file::File;
use servicesync::logs::{init_logging, LogOptions};
use servicesync::storage::settings::Settings;
use servicesync::targets::TargetRegistry;
use servicesync::utils::version_info;

use tracing::{error, info};

const DEFAULT_SETTINGS_FILE: &str = "settings.json";

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    if let Err(e) = start(&cli_args).await {
        // Logging may not be up yet
        eprintln!("servicesync failed: {:#}", e);
        error!("servicesync failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn start(cli_args: &HashMap<String, String>) -> anyhow::Result<()> {
    // Retrieve the settings file, a missing one means defaults
    let settings_path = cli_args
        .get("settings")
        .map(String::as_str)
        .unwrap_or(DEFAULT_SETTINGS_FILE);
    let mut settings: Settings = File::new(settings_path)
        .read_json_or_default()
        .await
        .with_context(|| format!("unable to read settings file {}", settings_path))?;
    settings.apply_env();

    // Initialize logging, the guard flushes file output on exit
    let _log_guard = init_logging(LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.clone(),
        json_format: settings.log_json,
        ..Default::default()
    })
    .context("failed to initialize logging")?;

    let dry_run = cli_args
        .get("dry-run")
        .is_some_and(|value| value != "false");
    let options = AppOptions::from_settings(&settings, dry_run)?;

    let targets_path = cli_args
        .get("targets")
        .map(PathBuf::from)
        .unwrap_or_else(|| settings.targets_file.clone());
    let registry = TargetRegistry::load(&File::new(&targets_path))
        .await
        .with_context(|| {
            format!("unable to load deployment targets from {}", targets_path.display())
        })?;

    info!(
        "Running servicesync {} on {}:{}",
        version_info().version,
        options.server.host,
        options.server.port
    );
    run(options, registry, await_shutdown_signal()).await?;
    Ok(())
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            _ => {
                error!("Unable to install signal handlers, waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
