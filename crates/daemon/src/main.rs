use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use placement_backup_daemon::config::{self, Config, Settings};
use placement_backup_daemon::{
    build_router, run_command, AppState, Command, CronSchedule, Scheduler,
};
use placement_backup_docstore::JsonDirDocumentStore;
use placement_backup_storage::{BackupService, SidecarStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (cfg, command) = parse_args()?;
    let settings = Settings::resolve(&cfg, |key| env::var(key).ok())?;
    let service = Arc::new(build_service(&settings)?);
    let scheduler = Arc::new(Scheduler::new(
        service.clone(),
        CronSchedule::parse(&settings.schedule)?,
        settings.backup.retention_days,
    ));

    match command {
        Command::Serve => run_service(service, scheduler, &settings).await,
        other => {
            let value = run_command(&other, &service, &scheduler).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
    }
}

/// Parse CLI args, returning the loaded config and the subcommand.
fn parse_args() -> Result<(Config, Command)> {
    let args: Vec<String> = env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut positional: Vec<String> = Vec::new();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                if i >= args.len() {
                    bail!("--config requires a path argument");
                }
                config_path = Some(PathBuf::from(&args[i]));
            }
            other => positional.push(other.to_owned()),
        }
        i += 1;
    }

    let cfg = match config_path {
        Some(path) => {
            info!(?path, "loading config file");
            config::load_config(&path)?
        }
        None => Config::default(),
    };

    Ok((cfg, Command::parse(&positional)?))
}

fn build_service(settings: &Settings) -> Result<BackupService> {
    let documents = JsonDirDocumentStore::new(settings.documents_root.clone())?;
    let metadata = SidecarStore::new(settings.backup.storage_path.clone())?;
    BackupService::new(settings.backup.clone(), Arc::new(documents), Arc::new(metadata))
}

async fn run_service(
    service: Arc<BackupService>,
    scheduler: Arc<Scheduler>,
    settings: &Settings,
) -> Result<()> {
    let report = service.reconcile().await?;
    if !report.interrupted.is_empty() || !report.orphaned_archives.is_empty() {
        warn!(
            interrupted = report.interrupted.len(),
            orphaned = report.orphaned_archives.len(),
            trash_removed = report.trash_removed,
            "startup reconcile found leftovers"
        );
    }

    if settings.scheduler_enabled {
        scheduler.start();
    } else {
        info!("scheduled backups disabled");
    }

    let state = AppState {
        service,
        scheduler: scheduler.clone(),
        api_token: settings.api_token.clone(),
    };

    let addr: SocketAddr = settings
        .listen
        .parse()
        .with_context(|| format!("invalid listen address: {}", settings.listen))?;
    let app = build_router(state);

    info!(%addr, "starting backup admin server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await?;

    scheduler.stop();
    info!("backup admin server stopped");
    Ok(())
}
