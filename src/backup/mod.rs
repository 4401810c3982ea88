pub(crate) mod archive;
pub(crate) mod db_dump;
pub(crate) mod filter;
mod logic;

pub use logic::CaptureInfo;

use anyhow::Result;
use crate::config::AppConfig;

/// Public entry point for the capture flow.
pub async fn run_backup_flow(app_config: &AppConfig, dry_run: bool) -> Result<CaptureInfo> {
    logic::run_backup_flow(app_config, dry_run).await
}
