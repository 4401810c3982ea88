//! Site Backup/Restore Tool
//!
//! Captures a site's file tree and database into portable archives,
//! restores them, and ships archives to remote storage through a
//! durable job queue.

// sitevault/src/main.rs
mod backup;
mod catalog;
mod config;
mod errors;
mod jobs;
mod remote;
mod restore;
mod state;
mod utils;

use anyhow::{Context, Result};
use config::AppConfig;
use jobs::JobQueue;
use state::StateStore;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

/// Main entry point for the backup/restore tool
#[tokio::main]
async fn main() -> ExitCode {
    match run_app().await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    // Expects config.json in the same directory as the executable, or
    // the project root when running with `cargo run`.
    let config_path = PathBuf::from("config.json");
    let app_config = AppConfig::load_from_json(&config_path).context(format!(
        "Failed to load application configuration from {}",
        config_path.display()
    ))?;

    let args: Vec<String> = env::args().collect();
    let choice = if args.len() > 1 {
        args[1].trim().to_string()
    } else {
        prompt_choice()?
    };

    match choice.as_str() {
        "1" | "backup" => {
            let dry_run = args.iter().any(|a| a == "--dry-run");
            if dry_run {
                println!("🚀 Starting Backup Process (dry run)...");
            } else {
                println!("🚀 Starting Backup Process...");
            }
            backup::run_backup_flow(&app_config, dry_run)
                .await
                .context("Backup process failed")?;
        }
        "2" | "restore" => {
            println!("🔄 Starting Restore Process...");
            let archive_filename = args
                .get(2)
                .filter(|a| !a.starts_with("--"))
                .context("Usage: sitevault restore <archive_filename> [destination_dir]")?;
            let destination = args.get(3).map(PathBuf::from);

            println!(
                "Restore target: {}, Archive: {}",
                destination
                    .as_deref()
                    .unwrap_or(&app_config.site.site_root)
                    .display(),
                archive_filename
            );
            let report = restore::run_restore_flow(&app_config, archive_filename, destination.as_deref())
                .await
                .context("Restore process failed")?;

            if !report.errors.is_empty() {
                for error in &report.errors {
                    eprintln!("  - {}", error);
                }
            }
        }
        "3" | "jobs" => {
            println!("⚙️ Running Jobs Worker...");
            let store = StateStore::new(&app_config.site.backup_dir)?;
            let outcome = JobQueue::new(store)
                .run_worker(&app_config)
                .await
                .context("Jobs worker failed")?;
            if let jobs::WorkerOutcome::Failed(job) = outcome {
                anyhow::bail!(
                    "Job '{}' failed: {}",
                    job.action_title,
                    job.last_error.unwrap_or_else(|| "unknown error".to_string())
                );
            }
        }
        _ => {
            println!("❌ Invalid choice. Please enter '1' (backup), '2' (restore), or '3' (jobs).");
            anyhow::bail!("Invalid operation choice");
        }
    }
    Ok(())
}

/// Prompts user to select an operation
///
/// Returns the user's choice as String
fn prompt_choice() -> Result<String> {
    use std::io::{stdin, stdout, Write};

    println!("Select an operation:");
    println!("1. Take Backup (or type 'backup')");
    println!("2. Restore Backup (or type 'restore')");
    println!("3. Run Jobs Worker (or type 'jobs')");
    print!("Enter your choice: ");
    let _ = stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin()
        .read_line(&mut input)
        .context("Failed to read user input")?;
    Ok(input.trim().to_string())
}
