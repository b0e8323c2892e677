use anyhow::{bail, Context, Result};
use placement_backup_storage::BackupService;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::scheduler::Scheduler;

/// Subcommands of the daemon binary. `serve` is the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Serve,
    RunOnce,
    List,
    Stats,
    Prune,
    Restore(Uuid),
    Delete(Uuid),
    Verify(Uuid),
}

impl Command {
    /// Parses the positional arguments left after flags.
    pub fn parse(positional: &[String]) -> Result<Self> {
        let backup_id = |name: &str| -> Result<Uuid> {
            let raw = positional
                .get(1)
                .with_context(|| format!("{name} requires a backup id"))?;
            Uuid::parse_str(raw).with_context(|| format!("invalid backup id: {raw}"))
        };

        Ok(match positional.first().map(String::as_str) {
            None | Some("serve") => Command::Serve,
            Some("run-once") => Command::RunOnce,
            Some("list") => Command::List,
            Some("stats") => Command::Stats,
            Some("prune") => Command::Prune,
            Some("restore") => Command::Restore(backup_id("restore")?),
            Some("delete") => Command::Delete(backup_id("delete")?),
            Some("verify") => Command::Verify(backup_id("verify")?),
            Some(other) => bail!("unknown command: {other}"),
        })
    }
}

/// Runs a one-shot command and returns its result as JSON.
///
/// `run-once` goes through [`Scheduler::run_now`], the same backup-then-prune
/// cycle that `POST /api/v1/backups` and the schedule run.
pub async fn run_command(
    command: &Command,
    service: &BackupService,
    scheduler: &Scheduler,
) -> Result<Value> {
    let value = match command {
        Command::Serve => bail!("serve is not a one-shot command"),
        Command::RunOnce => serde_json::to_value(scheduler.run_now().await?)?,
        Command::List => serde_json::to_value(service.list_backups().await?)?,
        Command::Stats => serde_json::to_value(service.get_stats().await?)?,
        Command::Prune => {
            serde_json::to_value(service.prune_expired(service.config().retention_days).await?)?
        }
        Command::Restore(id) => serde_json::to_value(service.restore_backup(*id).await?)?,
        Command::Verify(id) => serde_json::to_value(service.verify_backup(*id).await?)?,
        Command::Delete(id) => {
            service.delete_backup(*id).await?;
            info!(backup_id = %id, "backup deleted");
            json!({ "deleted": id })
        }
    };
    Ok(value)
}
