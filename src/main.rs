//! Main application entry point (CLI binary).
//!
//! This is a thin wrapper around the `access_guard` library that handles:
//! - Command-line argument parsing
//! - Environment variable loading (.env file)
//! - Logger initialization
//! - User-facing output formatting
//!
//! All core functionality is implemented in the library crate.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::IpAddr;
use std::process;

use access_guard::admin_server::{start_admin_server, AdminState};
use access_guard::config::{Command, Opt};
use access_guard::initialization::init_logger_with;
use access_guard::{AccessGuard, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    // This allows setting MAXMIND_LICENSE_KEY in .env without exporting it manually
    if dotenvy::dotenv().is_err() {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let env_path = exe_dir.join(".env");
                if env_path.exists() {
                    let _ = dotenvy::from_path(&env_path);
                }
            }
        }
    }

    let opt = Opt::parse();
    init_logger_with(opt.log_level.clone().into(), opt.log_format.clone())
        .context("Failed to initialize logger")?;

    let command = opt.command.clone();
    let config = Config::from(opt);

    if let Err(e) = run(command, config).await {
        eprintln!("access_guard error: {:#}", e);
        process::exit(1);
    }
    Ok(())
}

async fn run(command: Command, config: Config) -> Result<()> {
    match command {
        Command::Serve { admin_port, .. } => serve(config, admin_port).await,
        Command::Check { ip, account } => {
            let ip: IpAddr = ip
                .trim()
                .parse()
                .with_context(|| format!("Invalid IP address: {}", ip))?;
            let guard = AccessGuard::build(config).await?;
            guard.load_snapshot().await;
            let verdict = guard.engine.evaluate_request(ip, account.as_deref()).await;
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            Ok(())
        }
        Command::Refresh => {
            let guard = AccessGuard::build(config).await?;
            // Restore first so an unchanged source is recognised
            if let Err(e) = guard.scheduler.restore_cached().await {
                log::warn!("Failed to restore cached GeoIP snapshot: {:#}", e);
            }
            let outcome = guard.scheduler.refresh_once().await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
    }
}

async fn serve(config: Config, admin_port: u16) -> Result<()> {
    let guard = AccessGuard::build(config).await?;
    guard.load_snapshot().await;
    let refresh = guard.start_refresh();

    let state = AdminState::new(guard.engine.clone(), guard.scheduler.clone());
    let server = tokio::spawn(async move { start_admin_server(admin_port, state).await });

    tokio::select! {
        result = server => {
            if let Some(token) = &refresh {
                token.cancel();
            }
            result.context("Admin server task panicked")??;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            log::info!("Shutting down");
            if let Some(token) = &refresh {
                token.cancel();
            }
        }
    }
    Ok(())
}
