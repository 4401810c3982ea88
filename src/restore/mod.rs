pub(crate) mod fixup;
mod logic;
pub(crate) mod verification;

pub use logic::RestoreReport;

use anyhow::Result;
use std::path::Path;

use crate::config::AppConfig;

/// Public entry point for the restore flow.
pub async fn run_restore_flow(
    app_config: &AppConfig,
    archive_filename: &str,
    destination: Option<&Path>,
) -> Result<RestoreReport> {
    logic::run_restore_flow(app_config, archive_filename, destination).await
}
