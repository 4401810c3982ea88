// sitevault/src/backup/db_dump.rs
//
// Serializes the site's own tables (prefix-matched, plus explicitly
// shared global tables) into a single .sql text stream: dropped and
// recreated structures first, then batched INSERTs, then constraints and
// indexes. The restore engine replays this stream statement by
// statement, so every statement ends with `;` followed by a newline and
// string literals escape quotes by doubling them.
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{PgPool, Row};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::catalog::TableCatalog;
use crate::config::SiteConfig;

const BATCH_SIZE: i64 = 500;

/// Dumps schema and data for every site table into `dump_path`.
///
/// Returns the list of dumped tables.
pub async fn dump_site_database(
    pool: &PgPool,
    site: &SiteConfig,
    dump_path: &Path,
) -> Result<Vec<String>> {
    let catalog = TableCatalog::new(pool, &site.table_prefix);

    let mut tables = catalog
        .try_prefixed()
        .await
        .context("Failed to list prefixed tables for dump")?;
    for shared in &site.shared_tables {
        if !tables.contains(shared) {
            tables.push(shared.clone());
        }
    }

    if tables.is_empty() {
        anyhow::bail!(
            "No tables found for prefix '{}'; refusing to write an empty dump",
            site.table_prefix
        );
    }

    let mut file = File::create(dump_path)
        .with_context(|| format!("Failed to create dump file: {}", dump_path.display()))?;

    writeln!(file, "-- sitevault database dump")?;
    writeln!(file, "-- Site: {}", site.site_url)?;
    writeln!(file, "-- Dump time: {}", Utc::now())?;
    writeln!(file, "BEGIN;\n")?;

    write_table_structures(pool, &mut file, &tables).await?;
    write_table_data(pool, &mut file, &tables).await?;
    write_constraints_and_indexes(pool, &mut file, &tables).await?;

    writeln!(file, "\nCOMMIT;")?;
    file.flush()
        .with_context(|| format!("Failed to flush dump file: {}", dump_path.display()))?;

    println!("✓ Dumped {} tables to {}", tables.len(), dump_path.display());
    Ok(tables)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

async fn write_table_structures(
    pool: &PgPool,
    file: &mut File,
    tables: &[String],
) -> Result<()> {
    writeln!(file, "-- PHASE 1: TABLE STRUCTURES")?;

    for table_name in tables {
        let columns = sqlx::query(
            "SELECT column_name, data_type, is_nullable, column_default
             FROM information_schema.columns
             WHERE table_schema = 'public' AND table_name = $1
             ORDER BY ordinal_position",
        )
        .bind(table_name)
        .fetch_all(pool)
        .await
        .with_context(|| format!("Failed to fetch columns for table {}", table_name))?;

        if columns.is_empty() {
            anyhow::bail!("Table {} has no columns; it may have been dropped mid-dump", table_name);
        }

        writeln!(file, "DROP TABLE IF EXISTS {} CASCADE;", quote_ident(table_name))?;

        let mut ddl = format!("CREATE TABLE {} (\n", quote_ident(table_name));
        for (i, row) in columns.iter().enumerate() {
            let col_name: String = row.get("column_name");
            let data_type: String = row.get("data_type");
            let is_nullable: String = row.get("is_nullable");
            let default: Option<String> = row.get("column_default");

            if i > 0 {
                ddl.push_str(",\n");
            }
            ddl.push_str(&format!("  {} {}", quote_ident(&col_name), data_type));
            if is_nullable == "NO" {
                ddl.push_str(" NOT NULL");
            }
            if let Some(def) = default {
                if data_type == "timestamp with time zone" && def == "now()" {
                    ddl.push_str(" DEFAULT CURRENT_TIMESTAMP");
                } else {
                    ddl.push_str(&format!(" DEFAULT {}", def));
                }
            }
        }
        ddl.push_str("\n);");
        writeln!(file, "{}", ddl)?;
    }

    writeln!(file, "\n-- PHASE 2: SEQUENCES")?;
    for table_name in tables {
        let sequences = sqlx::query(
            "SELECT pg_get_serial_sequence(format('%I', $1::text), column_name) AS seq
             FROM information_schema.columns
             WHERE table_schema = 'public' AND table_name = $1",
        )
        .bind(table_name)
        .fetch_all(pool)
        .await
        .with_context(|| format!("Failed to fetch sequences for table {}", table_name))?;

        for row in sequences {
            if let Some(seq) = row.get::<Option<String>, _>("seq") {
                writeln!(file, "CREATE SEQUENCE IF NOT EXISTS {};", seq)?;
            }
        }
    }

    Ok(())
}

async fn write_table_data(pool: &PgPool, file: &mut File, tables: &[String]) -> Result<()> {
    writeln!(file, "\n-- PHASE 3: TABLE DATA")?;

    for table_name in tables {
        let columns = sqlx::query(
            "SELECT column_name FROM information_schema.columns
             WHERE table_schema = 'public' AND table_name = $1
             ORDER BY ordinal_position",
        )
        .bind(table_name)
        .fetch_all(pool)
        .await
        .with_context(|| format!("Failed to fetch columns for table {}", table_name))?;

        let column_names: Vec<String> = columns
            .iter()
            .map(|row| row.get::<String, _>("column_name"))
            .collect();

        writeln!(file, "\n-- Data for table: {}", table_name)?;

        let quoted_columns = column_names
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");

        let mut offset = 0;
        loop {
            let query = format!(
                "SELECT * FROM {} ORDER BY 1 LIMIT {} OFFSET {}",
                quote_ident(table_name),
                BATCH_SIZE,
                offset
            );

            let rows = sqlx::query(&query)
                .fetch_all(pool)
                .await
                .with_context(|| format!("Failed to fetch batch from table {}", table_name))?;

            if rows.is_empty() {
                break;
            }

            for row in &rows {
                let values: Vec<String> = column_names
                    .iter()
                    .map(|col| serialize_value(row, col))
                    .collect::<Result<_>>()
                    .with_context(|| format!("Failed to serialize a row of {}", table_name))?;

                writeln!(
                    file,
                    "INSERT INTO {} ({}) VALUES ({});",
                    quote_ident(table_name),
                    quoted_columns,
                    values.join(", ")
                )?;
            }

            offset += BATCH_SIZE;
        }
    }

    Ok(())
}

async fn write_constraints_and_indexes(
    pool: &PgPool,
    file: &mut File,
    tables: &[String],
) -> Result<()> {
    writeln!(file, "\n-- PHASE 4: CONSTRAINTS AND INDEXES")?;

    for table_name in tables {
        // Primary keys, then foreign keys, then unique constraints.
        for contype in ["p", "f", "u"] {
            let constraints = sqlx::query(
                "SELECT pg_get_constraintdef(oid) AS def
                 FROM pg_constraint
                 WHERE conrelid = format('%I', $1::text)::regclass AND contype = $2::\"char\"",
            )
            .bind(table_name)
            .bind(contype)
            .fetch_all(pool)
            .await
            .with_context(|| format!("Failed to fetch constraints for table {}", table_name))?;

            for row in constraints {
                let def: String = row.get("def");
                writeln!(file, "ALTER TABLE {} ADD {};", quote_ident(table_name), def)?;
            }
        }

        let indexes = sqlx::query(
            "SELECT pg_get_indexdef(i.indexrelid) AS def
             FROM pg_index i
             JOIN pg_class t ON t.oid = i.indrelid
             WHERE t.relname = $1 AND NOT i.indisprimary AND NOT i.indisunique",
        )
        .bind(table_name)
        .fetch_all(pool)
        .await
        .with_context(|| format!("Failed to fetch indexes for table {}", table_name))?;

        for row in indexes {
            let def: String = row.get("def");
            writeln!(file, "{};", def)?;
        }
    }

    Ok(())
}

/// Serializes one column of one row for SQL output. Strings escape
/// quotes by doubling, matching what the restore-side statement splitter
/// expects.
fn serialize_value(row: &sqlx::postgres::PgRow, column: &str) -> Result<String> {
    fn quoted(v: &str) -> String {
        format!("'{}'", v.replace('\'', "''"))
    }

    if let Ok(val) = row.try_get::<Option<String>, _>(column) {
        return Ok(val.map(|v| quoted(&v)).unwrap_or_else(|| "NULL".to_string()));
    }

    if let Ok(val) = row.try_get::<Option<uuid::Uuid>, _>(column) {
        return Ok(val.map(|v| format!("'{}'", v)).unwrap_or_else(|| "NULL".to_string()));
    }

    if let Ok(val) = row.try_get::<Option<i16>, _>(column) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_else(|| "NULL".to_string()));
    }
    if let Ok(val) = row.try_get::<Option<i32>, _>(column) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_else(|| "NULL".to_string()));
    }
    if let Ok(val) = row.try_get::<Option<i64>, _>(column) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_else(|| "NULL".to_string()));
    }

    if let Ok(val) = row.try_get::<Option<f32>, _>(column) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_else(|| "NULL".to_string()));
    }
    if let Ok(val) = row.try_get::<Option<f64>, _>(column) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_else(|| "NULL".to_string()));
    }

    if let Ok(val) = row.try_get::<Option<sqlx::types::BigDecimal>, _>(column) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_else(|| "NULL".to_string()));
    }

    if let Ok(val) = row.try_get::<Option<bool>, _>(column) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_else(|| "NULL".to_string()));
    }

    if let Ok(val) = row.try_get::<Option<serde_json::Value>, _>(column) {
        return Ok(val
            .map(|v| quoted(&v.to_string()))
            .unwrap_or_else(|| "NULL".to_string()));
    }

    if let Ok(val) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(column) {
        return Ok(val
            .map(|v| format!("'{}'", v.naive_utc()))
            .unwrap_or_else(|| "NULL".to_string()));
    }
    if let Ok(val) = row.try_get::<Option<chrono::NaiveDate>, _>(column) {
        return Ok(val.map(|v| format!("'{}'", v)).unwrap_or_else(|| "NULL".to_string()));
    }
    if let Ok(val) = row.try_get::<Option<chrono::NaiveTime>, _>(column) {
        return Ok(val.map(|v| format!("'{}'", v)).unwrap_or_else(|| "NULL".to_string()));
    }
    if let Ok(val) = row.try_get::<Option<chrono::NaiveDateTime>, _>(column) {
        return Ok(val.map(|v| format!("'{}'", v)).unwrap_or_else(|| "NULL".to_string()));
    }

    Err(anyhow::anyhow!("Unsupported data type for column {}", column))
}
