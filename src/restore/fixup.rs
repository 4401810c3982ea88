// sitevault/src/restore/fixup.rs
//
// Post-restore fixups: put the running environment's credentials back
// into the restored .env file, and rewrite the site URL wherever the
// database still carries the old one.
use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::env;
use std::fs;
use std::path::Path;

use crate::errors::AppError;

/// Settings rewritten from the running environment after a restore. A
/// restored .env may carry another host's credentials; these must not
/// survive.
const SENSITIVE_KEYS: [&str; 9] = [
    "DATABASE_URL",
    "DB_HOST",
    "DB_NAME",
    "DB_USER",
    "DB_PASSWORD",
    "AUTH_KEY",
    "AUTH_SALT",
    "SESSION_SECRET",
    "NONCE_SALT",
];

/// Rewrites each sensitive setting defined in the running process
/// environment back into the restored `.env`, leaving every other line
/// byte-for-byte intact. Returns how many settings were rewritten.
///
/// A missing `.env` aborts with `ConfigFixupSkipped` and touches
/// nothing; keys absent from the environment are skipped individually.
pub fn fix_env_file(site_root: &Path) -> crate::errors::Result<u32> {
    let env_path = site_root.join(".env");
    if !env_path.is_file() {
        return Err(AppError::ConfigFixupSkipped(format!(
            "{} does not exist",
            env_path.display()
        )));
    }

    let contents = fs::read_to_string(&env_path)?;
    let (rewritten, replaced) = fix_env_contents(&contents, |key| env::var(key).ok());

    if replaced > 0 {
        fs::write(&env_path, rewritten)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&env_path, fs::Permissions::from_mode(0o600))?;
        }
    }

    Ok(replaced)
}

/// Applies the credential rewrites to the file contents. `lookup`
/// resolves a setting name to its currently-active value.
fn fix_env_contents(contents: &str, lookup: impl Fn(&str) -> Option<String>) -> (String, u32) {
    let mut result = contents.to_string();
    let mut replaced = 0u32;

    for key in SENSITIVE_KEYS {
        let Some(value) = lookup(key) else {
            continue;
        };

        // Definition lines tolerate leading whitespace, an `export`
        // prefix and spacing around `=`; only the first occurrence is
        // rewritten.
        let pattern = format!(r"(?m)^[ \t]*(?:export[ \t]+)?{}[ \t]*=.*$", key);
        let re = Regex::new(&pattern).expect("sensitive-key pattern is static");

        if re.is_match(&result) {
            // `$` would otherwise be read as a capture-group reference
            // by the substitution engine.
            let literal_value = value.replace('$', "$$");
            let replacement = format!("{}=\"{}\"", key, literal_value);
            result = re.replacen(&result, 1, replacement.as_str()).into_owned();
            replaced += 1;
        }
    }

    (result, replaced)
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// The backslash-escaped spelling of a URL, as it appears inside
/// serialized/escaped structures (`https:\/\/example.com`).
fn escape_slashes(url: &str) -> String {
    url.replace('/', "\\/")
}

/// Replaces the site URL in one stored setting value.
///
/// Values that parse as JSON containers are traversed recursively and
/// reassembled, replacing string leaves only. Anything else gets plain
/// substring replacement on the raw text, deliberately, so serialized
/// shapes we do not understand are never round-tripped.
pub fn rewrite_setting_value(value: &str, old_url: &str, new_url: &str) -> String {
    let escaped_old = escape_slashes(old_url);
    let escaped_new = escape_slashes(new_url);

    if let Ok(mut parsed) = serde_json::from_str::<Value>(value) {
        if parsed.is_object() || parsed.is_array() {
            str_replace_recursive(old_url, new_url, &mut parsed);
            str_replace_recursive(&escaped_old, &escaped_new, &mut parsed);
            if let Ok(serialized) = serde_json::to_string(&parsed) {
                return serialized;
            }
        }
    }

    value
        .replace(old_url, new_url)
        .replace(&escaped_old, &escaped_new)
}

/// Replaces a substring in every string leaf of a nested value.
pub fn str_replace_recursive(search: &str, replace: &str, subject: &mut Value) {
    match subject {
        Value::String(s) => {
            if s.contains(search) {
                *s = s.replace(search, replace);
            }
        }
        Value::Array(items) => {
            for item in items {
                str_replace_recursive(search, replace, item);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                str_replace_recursive(search, replace, item);
            }
        }
        _ => {}
    }
}

/// Validates a site URL for the rewrite: absolute, with scheme and host,
/// trailing slash stripped.
fn normalize_site_url(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Some(raw.trim_end_matches('/').to_string()),
        _ => None,
    }
}

/// Rewrites the site URL across the settings table: the canonical
/// `siteurl` row, the upload path, and every other setting whose value
/// carries the old URL plainly or backslash-escaped.
///
/// Returns false (no changes made) when either URL fails validation.
pub async fn update_site_url(
    pool: &PgPool,
    table_prefix: &str,
    old_siteurl: &str,
    new_siteurl: &str,
) -> Result<bool> {
    let (Some(old_siteurl), Some(new_siteurl)) =
        (normalize_site_url(old_siteurl), normalize_site_url(new_siteurl))
    else {
        return Ok(false);
    };

    let settings_table = quote_ident(&format!("{}settings", table_prefix));

    // (a) The canonical site-URL setting.
    let upsert = format!(
        "INSERT INTO {} (name, value) VALUES ('siteurl', $1)
         ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value",
        settings_table
    );
    sqlx::query(&upsert)
        .bind(&new_siteurl)
        .execute(pool)
        .await
        .context("Failed to update the siteurl setting")?;

    // (b) The upload path, when it is prefixed with the old URL.
    let select_upload = format!(
        "SELECT value FROM {} WHERE name = 'upload_url_path'",
        settings_table
    );
    if let Some(row) = sqlx::query(&select_upload).fetch_optional(pool).await? {
        let upload_path: String = row.get("value");
        if !upload_path.is_empty() && upload_path.contains(&old_siteurl) {
            let update = format!(
                "UPDATE {} SET value = $1 WHERE name = 'upload_url_path'",
                settings_table
            );
            sqlx::query(&update)
                .bind(upload_path.replace(&old_siteurl, &new_siteurl))
                .execute(pool)
                .await
                .context("Failed to update the upload_url_path setting")?;
        }
    }

    // (c) Every other setting still referencing the old URL.
    let plain_pattern = format!("%{}%", escape_like(&old_siteurl));
    let escaped_pattern = format!("%{}%", escape_like(&escape_slashes(&old_siteurl)));
    let select_matches = format!(
        "SELECT name, value FROM {}
         WHERE (value LIKE $1 ESCAPE '\\' OR value LIKE $2 ESCAPE '\\')
           AND name NOT IN ('siteurl', 'upload_url_path')",
        settings_table
    );
    let matched = sqlx::query(&select_matches)
        .bind(&plain_pattern)
        .bind(&escaped_pattern)
        .fetch_all(pool)
        .await
        .context("Failed to scan settings for the old site URL")?;

    for row in matched {
        let name: String = row.get("name");
        let value: String = row.get("value");
        let rewritten = rewrite_setting_value(&value, &old_siteurl, &new_siteurl);
        if rewritten != value {
            let update = format!("UPDATE {} SET value = $1 WHERE name = $2", settings_table);
            sqlx::query(&update)
                .bind(&rewritten)
                .bind(&name)
                .execute(pool)
                .await
                .with_context(|| format!("Failed to rewrite setting {}", name))?;
        }
    }

    Ok(true)
}
