// sitevault/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

// Structs for deserializing config.json
#[derive(Debug, Clone, Deserialize)]
pub struct JsonS3StorageConfig {
    pub bucket_name: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
    pub folder_prefix: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonSftpStorageConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub remote_dir: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawJsonConfig {
    pub site_root: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub database_url: Option<String>,
    pub table_prefix: Option<String>,
    pub shared_tables: Option<Vec<String>>,
    pub site_url: Option<String>,
    pub include: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
    pub required_patterns: Option<Vec<String>>,
    pub job_timeout_secs: Option<u64>,
    pub s3_storage: Option<JsonS3StorageConfig>,
    pub sftp_storage: Option<JsonSftpStorageConfig>,
}

// Application's internal configuration structs
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint_url: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    pub folder_prefix: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct SftpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub remote_dir: String,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct SiteConfig {
    pub site_root: PathBuf,
    pub backup_dir: PathBuf,
    pub database_url: String,
    pub table_prefix: String,
    pub shared_tables: Vec<String>,
    pub site_url: String,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub required_patterns: Vec<String>,
    pub job_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub site: SiteConfig,
    pub s3: Option<S3Settings>,
    pub sftp: Option<SftpSettings>,
}

const DEFAULT_JOB_TIMEOUT_SECS: u64 = 3600;

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw: RawJsonConfig = serde_json::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse JSON from config file at {}",
                config_path.display()
            )
        })?;

        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawJsonConfig) -> Result<Self> {
        let site_root = raw
            .site_root
            .context("site_root must be set in config.json")?;
        let backup_dir = raw
            .backup_dir
            .context("backup_dir must be set in config.json")?;
        let database_url = raw
            .database_url
            .filter(|s| !s.is_empty())
            .context("database_url must be set in config.json")?;
        let table_prefix = raw
            .table_prefix
            .filter(|s| !s.is_empty())
            .context("table_prefix must be set in config.json")?;
        let site_url = raw
            .site_url
            .filter(|s| !s.is_empty())
            .context("site_url must be set in config.json")?;

        if backup_dir.to_string_lossy().is_empty() {
            anyhow::bail!("backup_dir cannot be empty in config.json.");
        }

        let site = SiteConfig {
            site_root,
            backup_dir,
            database_url,
            table_prefix,
            shared_tables: raw.shared_tables.unwrap_or_default(),
            site_url,
            include: raw.include.unwrap_or_default(),
            exclude: raw.exclude.unwrap_or_default(),
            required_patterns: raw.required_patterns.unwrap_or_default(),
            job_timeout_secs: raw.job_timeout_secs.unwrap_or(DEFAULT_JOB_TIMEOUT_SECS),
        };

        Ok(AppConfig {
            site,
            s3: load_s3_settings(&raw.s3_storage),
            sftp: load_sftp_settings(&raw.sftp_storage),
        })
    }
}

fn load_s3_settings(raw: &Option<JsonS3StorageConfig>) -> Option<S3Settings> {
    raw.as_ref().and_then(|s3_raw| {
        if let (Some(bucket), Some(region), Some(key_id), Some(secret), Some(endpoint)) = (
            s3_raw.bucket_name.as_ref().filter(|s| !s.is_empty()),
            s3_raw.region.as_ref().filter(|s| !s.is_empty()),
            s3_raw.access_key_id.as_ref().filter(|s| !s.is_empty()),
            s3_raw.secret_access_key.as_ref().filter(|s| !s.is_empty()),
            s3_raw.endpoint_url.as_ref().filter(|s| !s.is_empty()),
        ) {
            Some(S3Settings {
                bucket_name: bucket.clone(),
                region: region.clone(),
                access_key_id: key_id.clone(),
                secret_access_key: secret.clone(),
                endpoint_url: endpoint.clone(),
                folder_prefix: s3_raw.folder_prefix.clone().filter(|s| !s.is_empty()),
                enabled: s3_raw.enabled.unwrap_or(true),
            })
        } else {
            if s3_raw.bucket_name.is_some()
                || s3_raw.region.is_some()
                || s3_raw.access_key_id.is_some()
                || s3_raw.secret_access_key.is_some()
                || s3_raw.endpoint_url.is_some()
            {
                println!("S3 configuration is present in config.json but some required fields (bucket_name, region, access_key_id, secret_access_key, endpoint_url) are missing or empty. S3 uploads will be disabled.");
            }
            None
        }
    })
}

fn load_sftp_settings(raw: &Option<JsonSftpStorageConfig>) -> Option<SftpSettings> {
    raw.as_ref().and_then(|sftp_raw| {
        if let (Some(host), Some(username), Some(password), Some(remote_dir)) = (
            sftp_raw.host.as_ref().filter(|s| !s.is_empty()),
            sftp_raw.username.as_ref().filter(|s| !s.is_empty()),
            sftp_raw.password.as_ref().filter(|s| !s.is_empty()),
            sftp_raw.remote_dir.as_ref().filter(|s| !s.is_empty()),
        ) {
            Some(SftpSettings {
                host: host.clone(),
                port: sftp_raw.port.unwrap_or(22),
                username: username.clone(),
                password: password.clone(),
                remote_dir: remote_dir.clone(),
                enabled: sftp_raw.enabled.unwrap_or(true),
            })
        } else {
            if sftp_raw.host.is_some()
                || sftp_raw.username.is_some()
                || sftp_raw.password.is_some()
                || sftp_raw.remote_dir.is_some()
            {
                println!("SFTP configuration is present in config.json but some required fields (host, username, password, remote_dir) are missing or empty. SFTP uploads will be disabled.");
            }
            None
        }
    })
}
