// sitevault/src/backup/logic.rs
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use std::path::{Path, PathBuf};
use tempfile::Builder as TempFileBuilder;

use crate::backup::archive;
use crate::backup::db_dump;
use crate::backup::filter::ArchiveFilter;
use crate::catalog::TableCatalog;
use crate::config::AppConfig;
use crate::errors::AppError;
use crate::jobs::JobQueue;
use crate::remote;
use crate::state::{LatestBackup, LockFile, StateStore};
use crate::utils;

/// Payload of the capture-completed event, and the flow's return value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureInfo {
    pub filepath: PathBuf,
    pub save: bool,
    pub dryrun: bool,
    pub total_bytes: u64,
    pub file_count: u64,
}

/// Main capture flow: dump the database, stream the filtered site tree
/// plus the dump into one archive, persist the latest-backup record and
/// notify event consumers.
///
/// With `dry_run` set, walks and sizes the would-be archive without
/// writing anything.
pub async fn run_backup_flow(app_config: &AppConfig, dry_run: bool) -> Result<CaptureInfo> {
    let site = &app_config.site;
    println!("🚀 Starting backup of {}", site.site_url);

    // One capture at a time per site; overlapping schedule triggers are
    // rejected, not queued.
    let _capture_lock = LockFile::acquire(&site.backup_dir, "capture.lock")
        .context("A capture is already running for this site")?;

    let filter = build_filter(app_config)?;
    let site_id = utils::create_site_id(&site.site_url)?;
    let timestamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
    let archive_path = site
        .backup_dir
        .join(format!("backup-{}-{}.tar.gz", site_id, timestamp));

    if dry_run {
        return dry_run_estimate(app_config, &filter, &archive_path).await;
    }

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&site.database_url)
        .await
        .map_err(|e| AppError::DatabaseUnavailable(e.to_string()))?;

    // The dump is written to scratch space first, then streamed into the
    // archive as its single .sql entry.
    let dump_dir = TempFileBuilder::new()
        .prefix("sitevault_dump_")
        .tempdir()
        .context("Failed to create temporary dump directory")?;
    let dump_entry_name = format!("{}.{}.sql", site_id, timestamp);
    let dump_path = dump_dir.path().join(&dump_entry_name);

    let tables = db_dump::dump_site_database(&pool, site, &dump_path).await?;
    println!("✓ Database dump complete ({} tables)", tables.len());
    pool.close().await;

    let outcome = archive::build_site_archive(
        &site.site_root,
        &archive_path,
        &filter,
        &dump_path,
        &dump_entry_name,
    )?;

    let info = CaptureInfo {
        filepath: outcome.archive_path.clone(),
        save: true,
        dryrun: false,
        total_bytes: outcome.total_bytes,
        file_count: outcome.file_count,
    };

    let store = StateStore::new(&site.backup_dir)?;
    store.set_latest_backup(&LatestBackup {
        filepath: info.filepath.clone(),
        save: info.save,
        dryrun: info.dryrun,
        timestamp: Utc::now(),
    })?;

    post_archive_files(app_config, &store, &info)?;

    println!(
        "🎉 Backup completed: {} ({})",
        info.filepath.display(),
        utils::bytes_to_human(info.total_bytes, 2)
    );
    Ok(info)
}

async fn dry_run_estimate(
    app_config: &AppConfig,
    filter: &ArchiveFilter,
    archive_path: &Path,
) -> Result<CaptureInfo> {
    let site = &app_config.site;
    let (file_bytes, file_count) = archive::estimate_site_archive(&site.site_root, filter)?;

    // The database contributes to the estimate when reachable; an
    // unreachable database reads as zero and the dry run still reports.
    let db_bytes = match PgPoolOptions::new()
        .max_connections(1)
        .connect(&site.database_url)
        .await
    {
        Ok(pool) => {
            let catalog = TableCatalog::new(&pool, &site.table_prefix);
            let counts = catalog.prefixed_with_counts().await;
            let total_rows: i64 = counts.values().sum();
            println!(
                "Database: {} tables, {} rows for prefix {}",
                counts.len(),
                total_rows,
                site.table_prefix
            );
            let size = catalog.database_size().await;
            pool.close().await;
            size
        }
        Err(e) => {
            eprintln!("Database unreachable during dry run, estimating files only: {}", e);
            0
        }
    };

    let total = file_bytes + db_bytes;
    println!(
        "Dry run: {} files, estimated {} ({} from the database)",
        file_count,
        utils::bytes_to_human(total, 2),
        utils::bytes_to_human(db_bytes, 2)
    );

    Ok(CaptureInfo {
        filepath: archive_path.to_path_buf(),
        save: false,
        dryrun: true,
        total_bytes: total,
        file_count,
    })
}

fn build_filter(app_config: &AppConfig) -> Result<ArchiveFilter> {
    let site = &app_config.site;
    let mut filter = ArchiveFilter::new(&site.include, &site.exclude)?;

    // Never archive the backup directory into itself.
    if let Ok(rel) = site.backup_dir.strip_prefix(&site.site_root) {
        if !rel.as_os_str().is_empty() {
            filter.exclude_subtree(rel);
        }
    }

    Ok(filter)
}

/// Capture-completed hook: queue one upload job per enabled remote
/// provider. Runs only for a saved, non-dry-run capture; the worker
/// picks the jobs up on the next scheduler pass.
fn post_archive_files(app_config: &AppConfig, store: &StateStore, info: &CaptureInfo) -> Result<()> {
    if info.dryrun || !info.save {
        return Ok(());
    }

    let queue = JobQueue::new(store.clone());
    for provider in remote::providers_from_config(app_config) {
        if !provider.is_setup() {
            continue;
        }

        queue.enqueue(
            &format!("upload_{}", provider.key()),
            &info.filepath.to_string_lossy(),
            &format!("Upload backup file to {}", provider.title()),
        )?;
        println!("Queued upload of {} to {}", info.filepath.display(), provider.title());
    }

    Ok(())
}
