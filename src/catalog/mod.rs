// sitevault/src/catalog/mod.rs
//
// Read-only helper over the site's database: which tables belong to this
// site (by name prefix), how many rows they hold, and how much disk they
// take. Consumed by the dump writer and by dry-run size estimates.
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;

pub struct TableCatalog<'a> {
    pool: &'a PgPool,
    prefix: String,
}

/// Escapes LIKE wildcards so a prefix such as `site_` matches literally.
fn escape_like(prefix: &str) -> String {
    prefix
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

impl<'a> TableCatalog<'a> {
    pub fn new(pool: &'a PgPool, prefix: &str) -> Self {
        TableCatalog {
            pool,
            prefix: prefix.to_string(),
        }
    }

    /// Lists prefixed tables, failing loudly. Used by the dump writer,
    /// where an unreachable database must abort the capture.
    pub async fn try_prefixed(&self) -> sqlx::Result<Vec<String>> {
        let pattern = format!("{}%", escape_like(&self.prefix));
        let rows = sqlx::query(
            "SELECT table_name FROM information_schema.tables
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE'
               AND table_name LIKE $1 ESCAPE '\\'
             ORDER BY table_name",
        )
        .bind(&pattern)
        .fetch_all(self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get("table_name"))
            .collect::<sqlx::Result<Vec<String>>>()
    }

    /// Lists prefixed tables. An unreachable database reads as an empty
    /// list, never an error.
    pub async fn prefixed(&self) -> Vec<String> {
        match self.try_prefixed().await {
            Ok(tables) => tables,
            Err(e) => {
                eprintln!("Could not list tables for prefix {}: {}", self.prefix, e);
                Vec::new()
            }
        }
    }

    /// Row count for one table. A table that disappeared between listing
    /// and counting reads as 0; the batch is never aborted.
    pub async fn count_rows(&self, table: &str) -> i64 {
        let query = format!("SELECT COUNT(*) FROM \"{}\"", table.replace('"', "\"\""));
        match sqlx::query_scalar::<_, i64>(&query).fetch_one(self.pool).await {
            Ok(count) => count,
            Err(e) => {
                eprintln!("Could not count rows in {}: {}", table, e);
                0
            }
        }
    }

    /// Table -> row count for every prefixed table.
    pub async fn prefixed_with_counts(&self) -> BTreeMap<String, i64> {
        let mut counts = BTreeMap::new();
        for table in self.prefixed().await {
            let count = self.count_rows(&table).await;
            counts.insert(table, count);
        }
        counts
    }

    /// Total bytes (data + indexes) across all prefixed tables, in one
    /// aggregate query. No matching tables reads as 0.
    pub async fn database_size(&self) -> u64 {
        let pattern = format!("{}%", escape_like(&self.prefix));
        let result = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(pg_total_relation_size(
                 format('%I.%I', table_schema, table_name)::regclass)), 0)::BIGINT
             FROM information_schema.tables
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE'
               AND table_name LIKE $1 ESCAPE '\\'",
        )
        .bind(&pattern)
        .fetch_one(self.pool)
        .await;

        match result {
            Ok(size) => size.max(0) as u64,
            Err(e) => {
                eprintln!("Could not compute database size for prefix {}: {}", self.prefix, e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like_makes_prefix_literal() {
        assert_eq!(escape_like("site_"), "site\\_");
        assert_eq!(escape_like("100%"), "100\\%");
        assert_eq!(escape_like("plain"), "plain");
    }
}
