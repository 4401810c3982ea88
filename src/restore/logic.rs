// sitevault/src/restore/logic.rs
use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::path::{Path, PathBuf};

use crate::backup::archive;
use crate::config::AppConfig;
use crate::errors::AppError;
use crate::restore::fixup;
use crate::restore::verification;

const STEP_RESOLVE: &str = "resolve";
const STEP_FILES: &str = "files";
const STEP_DATABASE: &str = "database";
const STEP_FIXUP: &str = "fixup";

#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub restored: bool,
    pub archive_path: PathBuf,
    pub steps_completed: Vec<&'static str>,
    pub errors: Vec<String>,
}

/// Main restore flow. Steps run in strict order; a step that fails
/// aborts the remaining ones and reports how far the restore got:
///
/// 1. resolve and structurally validate the requested archive,
/// 2. extract file entries onto the destination tree,
/// 3. replay the database dump,
/// 4. post-restore fixups (credentials, site URL).
///
/// Files are restored before the database so that application code
/// reading from disk during the replay already sees restored files.
/// Each step overwrites rather than appends, so restoring the same
/// archive twice leaves the same observable state as restoring it once.
pub async fn run_restore_flow(
    app_config: &AppConfig,
    archive_filename: &str,
    destination: Option<&Path>,
) -> Result<RestoreReport> {
    let site = &app_config.site;
    let mut completed: Vec<&'static str> = Vec::new();
    let mut errors: Vec<String> = Vec::new();

    // Step 1: resolve and validate.
    let archive_path = resolve_archive(&site.backup_dir, archive_filename)?;
    if !verification::is_valid(&archive_path) {
        return Err(AppError::ArchiveCorrupt(archive_path).into());
    }
    if !verification::contains_all(&archive_path, &site.required_patterns) {
        anyhow::bail!(
            "Archive {} is missing expected site structure; refusing to restore",
            archive_path.display()
        );
    }
    let dump_entry = archive::find_dump_entry(&archive_path)?.ok_or_else(|| {
        anyhow::anyhow!(
            "Archive {} has no database dump entry",
            archive_path.display()
        )
    })?;
    completed.push(STEP_RESOLVE);
    println!("✓ Archive validated: {}", archive_path.display());

    // Step 2: file tree.
    let dest_root = destination.unwrap_or(&site.site_root);
    let unpacked = archive::extract_file_entries(&archive_path, dest_root, &dump_entry)
        .map_err(|e| partial(&completed, e.to_string()))?;
    completed.push(STEP_FILES);
    println!("✓ Extracted {} entries to {}", unpacked, dest_root.display());

    // Step 3: database replay.
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&site.database_url)
        .await
        .map_err(|e| {
            partial(
                &completed,
                AppError::DatabaseUnavailable(e.to_string()).to_string(),
            )
        })?;

    let dump_sql = archive::read_entry_to_string(&archive_path, &dump_entry)
        .map_err(|e| partial(&completed, e.to_string()))?;
    let statement_errors = replay_dump(&pool, &dump_sql).await;
    errors.extend(statement_errors);
    completed.push(STEP_DATABASE);

    // Step 4: fixups.
    match fixup::fix_env_file(dest_root) {
        Ok(replaced) if replaced > 0 => {
            println!("✓ Restored configuration credentials ({} settings)", replaced)
        }
        Ok(_) => {}
        Err(e) => errors.push(e.to_string()),
    }

    if let Err(e) = fix_site_url(&pool, app_config).await {
        errors.push(format!("Site URL fixup failed: {}", e));
    }
    completed.push(STEP_FIXUP);
    pool.close().await;

    let restored = completed.len() == 4;
    if errors.is_empty() {
        println!("🎉 Restore completed: {}", archive_path.display());
    } else {
        println!(
            "Restore completed with {} recoverable errors: {}",
            errors.len(),
            archive_path.display()
        );
    }

    Ok(RestoreReport {
        restored,
        archive_path,
        steps_completed: completed,
        errors,
    })
}

fn partial(completed: &[&'static str], failed: String) -> anyhow::Error {
    AppError::PartialRestore {
        completed: completed.to_vec(),
        failed,
    }
    .into()
}

/// Resolves the requested archive file inside the managed backup
/// directory. The filename parameter is an opaque basename; anything
/// that is not a plain file name (separators, `..`) is rejected.
fn resolve_archive(backup_dir: &Path, archive_filename: &str) -> crate::errors::Result<PathBuf> {
    let is_bare_name = Path::new(archive_filename)
        .file_name()
        .map(|name| name == std::ffi::OsStr::new(archive_filename))
        .unwrap_or(false);
    if !is_bare_name {
        return Err(AppError::ArchiveNotFound(archive_filename.to_string()));
    }

    let path = backup_dir.join(archive_filename);
    if !path.is_file() {
        return Err(AppError::ArchiveNotFound(archive_filename.to_string()));
    }
    Ok(path)
}

/// Replays dump statements one at a time in autocommit mode. A failing
/// statement is reported and replay continues: statements are
/// independent per table, and a partial restore is preferable to
/// abandoning the remaining tables.
async fn replay_dump(pool: &PgPool, dump_sql: &str) -> Vec<String> {
    let mut errors = Vec::new();
    let statements = split_statements(dump_sql);
    let total = statements.len();

    for statement in statements {
        // The dump brackets itself in BEGIN/COMMIT; replay runs
        // autocommit so one bad statement cannot poison the rest.
        let keyword = statement.trim_start().to_ascii_uppercase();
        if keyword.starts_with("BEGIN") || keyword.starts_with("COMMIT") {
            continue;
        }

        if let Err(e) = sqlx::query(&statement).execute(pool).await {
            eprintln!("Statement failed during replay: {}", e);
            errors.push(format!("Database statement failed: {}", e));
        }
    }

    println!("✓ Replayed {} statements ({} failed)", total, errors.len());
    errors
}

/// Splits a dump into individual statements. Semicolons inside
/// single-quoted strings (with doubled-quote escapes, the dump writer's
/// own format) and `--` line comments do not terminate a statement.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        if in_string {
            current.push(c);
            if c == '\'' {
                in_string = false;
            }
            continue;
        }

        match c {
            '\'' => {
                in_string = true;
                current.push(c);
            }
            '-' if chars.peek() == Some(&'-') => {
                // Line comment: consume to end of line, keep nothing.
                for nc in chars.by_ref() {
                    if nc == '\n' {
                        break;
                    }
                }
            }
            ';' => {
                let statement = current.trim().to_string();
                if !statement.is_empty() {
                    statements.push(statement);
                }
                current.clear();
            }
            c => current.push(c),
        }
    }

    let tail = current.trim().to_string();
    if !tail.is_empty() {
        statements.push(tail);
    }

    statements
}

/// Compares the restored canonical site URL against the currently
/// configured one and rewrites the database when they differ.
async fn fix_site_url(pool: &PgPool, app_config: &AppConfig) -> Result<()> {
    let site = &app_config.site;
    let settings_table = format!(
        "\"{}settings\"",
        site.table_prefix.replace('"', "\"\"")
    );

    let query = format!("SELECT value FROM {} WHERE name = 'siteurl'", settings_table);
    let row = sqlx::query(&query)
        .fetch_optional(pool)
        .await
        .context("Failed to read the restored siteurl setting")?;

    let Some(row) = row else {
        // Nothing to fix if the restored database carries no siteurl.
        return Ok(());
    };
    let restored_url: String = row.get("value");
    let current_url = site.site_url.trim_end_matches('/');

    if restored_url.trim_end_matches('/') == current_url {
        return Ok(());
    }

    println!(
        "Rewriting site URL {} -> {}",
        restored_url, current_url
    );
    let changed = fixup::update_site_url(pool, &site.table_prefix, &restored_url, current_url)
        .await
        .context("Site URL rewrite failed")?;
    if !changed {
        anyhow::bail!(
            "Site URLs did not validate (old: {}, new: {})",
            restored_url,
            current_url
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_rejects_path_traversal() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        std::fs::write(dir.path().join("good.tar.gz"), b"x")?;

        assert!(resolve_archive(dir.path(), "good.tar.gz").is_ok());
        assert!(matches!(
            resolve_archive(dir.path(), "../good.tar.gz"),
            Err(AppError::ArchiveNotFound(_))
        ));
        assert!(matches!(
            resolve_archive(dir.path(), "sub/good.tar.gz"),
            Err(AppError::ArchiveNotFound(_))
        ));
        assert!(matches!(
            resolve_archive(dir.path(), "missing.tar.gz"),
            Err(AppError::ArchiveNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_split_statements_respects_quotes_and_comments() {
        let sql = "\
-- sitevault database dump
BEGIN;

INSERT INTO \"site_settings\" (\"name\", \"value\") VALUES ('motto', 'stay; calm');
INSERT INTO \"site_posts\" (\"title\") VALUES ('it''s a post; really');
COMMIT;
";
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 4);
        assert_eq!(statements[0], "BEGIN");
        assert!(statements[1].contains("stay; calm"));
        assert!(statements[2].contains("it''s a post; really"));
        assert_eq!(statements[3], "COMMIT");
    }

    #[test]
    fn test_split_statements_handles_multiline_and_trailing() {
        let sql = "CREATE TABLE \"t\" (\n  \"a\" integer\n);\nINSERT INTO \"t\" VALUES (1)";
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE"));
        assert_eq!(statements[1], "INSERT INTO \"t\" VALUES (1)");
    }
}
