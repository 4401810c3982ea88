// sitevault/src/remote/mod.rs
//
// Remote storage providers share one capability set: upload, download,
// is_setup, get_details. One implementation per provider, selected by
// configuration key.
pub(crate) mod s3;
pub(crate) mod sftp;

use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};

use crate::config::AppConfig;
use crate::errors::Result;

#[derive(Debug, Clone, Serialize)]
pub struct RemoteDetails {
    pub key: String,
    pub title: String,
    pub enabled: bool,
    pub settings: serde_json::Value,
}

pub enum RemoteProvider {
    S3(s3::S3Remote),
    Sftp(sftp::SftpRemote),
}

impl RemoteProvider {
    pub fn key(&self) -> &'static str {
        match self {
            RemoteProvider::S3(_) => s3::KEY,
            RemoteProvider::Sftp(_) => sftp::KEY,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            RemoteProvider::S3(_) => s3::TITLE,
            RemoteProvider::Sftp(_) => sftp::TITLE,
        }
    }

    /// Whether the provider is fully configured and enabled.
    pub fn is_setup(&self) -> bool {
        match self {
            RemoteProvider::S3(remote) => remote.is_setup(),
            RemoteProvider::Sftp(remote) => remote.is_setup(),
        }
    }

    /// Uploads one archive to the provider's remote location.
    pub async fn upload(&self, filepath: &Path) -> Result<()> {
        match self {
            RemoteProvider::S3(remote) => remote.upload(filepath).await,
            RemoteProvider::Sftp(remote) => remote.upload(filepath).await,
        }
    }

    /// Downloads a named archive back into `backup_dir`.
    pub async fn download(&self, filename: &str, backup_dir: &Path) -> Result<PathBuf> {
        match self {
            RemoteProvider::S3(remote) => remote.download(filename, backup_dir).await,
            RemoteProvider::Sftp(remote) => remote.download(filename, backup_dir).await,
        }
    }

    /// Connection settings for diagnostics, with secrets redacted.
    pub fn get_details(&self) -> RemoteDetails {
        match self {
            RemoteProvider::S3(remote) => RemoteDetails {
                key: s3::KEY.to_string(),
                title: s3::TITLE.to_string(),
                enabled: remote.is_setup(),
                settings: json!({
                    "bucket_name": remote.settings.bucket_name,
                    "region": remote.settings.region,
                    "endpoint_url": remote.settings.endpoint_url,
                    "folder_prefix": remote.settings.folder_prefix,
                }),
            },
            RemoteProvider::Sftp(remote) => RemoteDetails {
                key: sftp::KEY.to_string(),
                title: sftp::TITLE.to_string(),
                enabled: remote.is_setup(),
                settings: json!({
                    "host": remote.settings.host,
                    "port": remote.settings.port,
                    "username": remote.settings.username,
                    "remote_dir": remote.settings.remote_dir,
                }),
            },
        }
    }
}

/// Builds every provider with a complete configuration block.
pub fn providers_from_config(config: &AppConfig) -> Vec<RemoteProvider> {
    let mut providers = Vec::new();
    if let Some(s3_settings) = &config.s3 {
        providers.push(RemoteProvider::S3(s3::S3Remote::new(s3_settings.clone())));
    }
    if let Some(sftp_settings) = &config.sftp {
        providers.push(RemoteProvider::Sftp(sftp::SftpRemote::new(
            sftp_settings.clone(),
        )));
    }
    providers
}

/// Looks a configured provider up by its key.
pub fn find_provider(config: &AppConfig, key: &str) -> Option<RemoteProvider> {
    providers_from_config(config)
        .into_iter()
        .find(|provider| provider.key() == key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{S3Settings, SftpSettings};

    fn sample_config() -> AppConfig {
        let raw = serde_json::from_value(serde_json::json!({
            "site_root": "/var/www/site",
            "backup_dir": "/var/backups/site",
            "database_url": "postgres://u:p@localhost/site",
            "table_prefix": "site_",
            "site_url": "https://example.com"
        }))
        .unwrap();
        let mut config = AppConfig::from_raw(raw).unwrap();
        config.s3 = Some(S3Settings {
            endpoint_url: "https://nyc3.digitaloceanspaces.com".to_string(),
            region: "nyc3".to_string(),
            access_key_id: "key".to_string(),
            secret_access_key: "secret".to_string(),
            bucket_name: "backups".to_string(),
            folder_prefix: None,
            enabled: true,
        });
        config.sftp = Some(SftpSettings {
            host: "backup.example.net".to_string(),
            port: 22,
            username: "vault".to_string(),
            password: "secret".to_string(),
            remote_dir: "/srv/backups".to_string(),
            enabled: false,
        });
        config
    }

    #[test]
    fn test_providers_selected_by_key() {
        let config = sample_config();
        let providers = providers_from_config(&config);
        assert_eq!(providers.len(), 2);

        let s3 = find_provider(&config, "s3").expect("s3 provider");
        assert!(s3.is_setup());

        let sftp = find_provider(&config, "sftp").expect("sftp provider");
        assert!(!sftp.is_setup(), "disabled provider is not setup");

        assert!(find_provider(&config, "dropbox").is_none());
    }

    #[test]
    fn test_details_redact_secrets() {
        let config = sample_config();
        for provider in providers_from_config(&config) {
            let details = provider.get_details();
            let serialized = details.settings.to_string();
            assert!(!serialized.contains("secret"), "secrets leaked for {}", details.key);
        }
    }
}
