use anyhow::Result;

use fleetscope::config::Config;
use fleetscope::models::JobId;

use super::runtime;

/// List a job's checkpoints, optionally garbage-collecting old ones first
pub async fn checkpoints(config: Config, job: String, gc: bool, json: bool) -> Result<()> {
    let job_id = JobId::new(job)?;
    let notifications = runtime::notifications(&config)?;
    let manager = runtime::checkpoint_manager(&config, &notifications)?;

    if gc {
        let removed = manager.gc(&job_id).await?;
        tracing::info!(job_id = %job_id, removed, "Old checkpoints removed");
    }

    let infos = manager.list(&job_id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }

    if infos.is_empty() {
        println!("No checkpoints for job {job_id} in {}", config.checkpoint.dir.display());
        return Ok(());
    }

    println!(
        "{:<40} {:>8} {:>8} {:>8} {:>8} {:>8}  {:<25} {}",
        "NAME", "ENTRIES", "PENDING", "DONE", "FAILED", "VISITED", "CREATED", "VALID"
    );
    for info in infos {
        let created = info
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<40} {:>8} {:>8} {:>8} {:>8} {:>8}  {:<25} {}",
            info.name,
            info.entries,
            info.pending,
            info.done,
            info.failed,
            info.visited,
            created,
            if info.valid { "yes" } else { "NO" }
        );
    }
    Ok(())
}
