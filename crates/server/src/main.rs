use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use warden_engine::{NoticeTemplates, ResetSchedule, Warden, WardenBuilder};
use warden_server::config::WardenConfig;
use warden_server::error::ServerError;
use warden_server::hooks::LoggingHooks;

/// Volunteer punishment ledger and quota engine.
#[derive(Parser, Debug)]
#[command(name = "warden-server", about = "Standalone process for the Warden engine")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "warden.toml")]
    config: PathBuf,

    /// Override the reset timezone.
    #[arg(long)]
    timezone: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration, print the next reset instant, then exit.
    Check,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut config = WardenConfig::load(&cli.config)?;
    if !cli.config.exists() {
        info!(path = %cli.config.display(), "config file not found, using defaults");
    }
    if let Some(tz) = cli.timezone {
        config.reset.timezone = tz;
    }

    if let Some(Commands::Check) = cli.command {
        return run_check(&config);
    }

    let store = warden_server::store_factory::create_store(&config.store).await?;
    let notices = NoticeTemplates::with_overrides(&config.notifications.templates)?;

    let warden = Arc::new(
        WardenBuilder::new()
            .store(store)
            .hooks(Arc::new(LoggingHooks))
            .policies(config.groups.clone())
            .dispatcher_config(config.dispatcher.to_engine_config())
            .notices(notices)
            .login_notices(config.notifications.login_enabled)
            .build()?,
    );
    info!(
        backend = %config.store.backend,
        groups = config.groups.len(),
        "warden engine started"
    );

    let scheduler = if config.reset.enabled {
        let schedule = ResetSchedule::daily_midnight(&config.reset.timezone)?;
        Some(warden.start_reset_scheduler(schedule))
    } else {
        info!("daily reset disabled");
        None
    };

    let reload = tokio::spawn(reload_on_hangup(Arc::clone(&warden), cli.config.clone()));

    shutdown_signal().await;

    reload.abort();
    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }
    warden.shutdown().await;

    info!("warden-server shut down");
    Ok(())
}

fn run_check(config: &WardenConfig) -> Result<(), Box<dyn std::error::Error>> {
    NoticeTemplates::with_overrides(&config.notifications.templates)?;
    let schedule = ResetSchedule::daily_midnight(&config.reset.timezone)?;

    println!("store backend: {}", config.store.backend);
    println!("groups: {}", config.groups.names().collect::<Vec<_>>().join(", "));
    if config.reset.enabled {
        match schedule.next_after(Utc::now()) {
            Some(next) => println!(
                "next reset: {} ({})",
                next.with_timezone(&schedule.timezone()),
                next
            ),
            None => println!("next reset: none"),
        }
    } else {
        println!("daily reset: disabled");
    }
    Ok(())
}

/// Re-read the group table from `path` into the running engine.
fn reload_groups(warden: &Warden, path: &Path) -> Result<(), ServerError> {
    let config = WardenConfig::load(path)?;
    warden.replace_policies(config.groups);
    Ok(())
}

#[cfg(unix)]
async fn reload_on_hangup(warden: Arc<Warden>, path: PathBuf) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "failed to install SIGHUP handler, reload disabled");
            return;
        }
    };
    while hangup.recv().await.is_some() {
        info!(path = %path.display(), "received SIGHUP, reloading groups");
        if let Err(e) = reload_groups(&warden, &path) {
            error!(error = %e, "group reload failed, keeping previous table");
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_warden: Arc<Warden>, _path: PathBuf) {
    std::future::pending::<()>().await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
