// sitevault/src/remote/s3.rs
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::primitives::ByteStream;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::config::S3Settings;
use crate::errors::{AppError, Result};

pub const KEY: &str = "s3";
pub const TITLE: &str = "S3 Object Storage";

pub struct S3Remote {
    pub settings: S3Settings,
}

impl S3Remote {
    pub fn new(settings: S3Settings) -> Self {
        S3Remote { settings }
    }

    pub fn is_setup(&self) -> bool {
        self.settings.enabled
    }

    async fn client(&self) -> s3::Client {
        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .endpoint_url(&self.settings.endpoint_url)
            .region(Region::new(self.settings.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &self.settings.access_key_id,
                &self.settings.secret_access_key,
                None,
                None,
                "Static",
            ))
            .load()
            .await;

        s3::Client::new(&sdk_config)
    }

    fn object_key(&self, filename: &str) -> String {
        match &self.settings.folder_prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), filename),
            None => filename.to_string(),
        }
    }

    fn upload_error(&self, message: String) -> AppError {
        AppError::UploadFailed {
            provider: KEY.to_string(),
            message,
        }
    }

    /// Uploads one archive as an object in the configured bucket.
    pub async fn upload(&self, filepath: &Path) -> Result<()> {
        let filename = filepath
            .file_name()
            .ok_or_else(|| self.upload_error(format!("Not a file path: {}", filepath.display())))?
            .to_string_lossy()
            .into_owned();
        let s3_key = self.object_key(&filename);

        println!(
            "Uploading {} to S3 bucket {} with key {}",
            filepath.display(),
            self.settings.bucket_name,
            s3_key
        );

        let body = ByteStream::from_path(filepath).await.map_err(|e| {
            self.upload_error(format!("Failed to read {}: {}", filepath.display(), e))
        })?;

        self.client()
            .await
            .put_object()
            .bucket(&self.settings.bucket_name)
            .key(&s3_key)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                self.upload_error(format!(
                    "Failed to upload to bucket {} with key {}: {}",
                    self.settings.bucket_name, s3_key, e
                ))
            })?;

        println!(
            "✅ Uploaded {} to S3 bucket {}",
            filepath.display(),
            self.settings.bucket_name
        );
        Ok(())
    }

    /// Downloads a named archive back into the backup directory,
    /// streaming chunk by chunk.
    pub async fn download(&self, filename: &str, backup_dir: &Path) -> Result<PathBuf> {
        let s3_key = self.object_key(filename);
        let destination = backup_dir.join(filename);

        println!(
            "Downloading s3://{}/{} to {}",
            self.settings.bucket_name,
            s3_key,
            destination.display()
        );

        tokio::fs::create_dir_all(backup_dir).await?;
        let mut output_file = tokio::fs::File::create(&destination).await?;

        let mut object = self
            .client()
            .await
            .get_object()
            .bucket(&self.settings.bucket_name)
            .key(&s3_key)
            .send()
            .await
            .map_err(|e| {
                self.upload_error(format!(
                    "Failed to get object s3://{}/{}: {}",
                    self.settings.bucket_name, s3_key, e
                ))
            })?;

        let mut total_bytes = 0usize;
        while let Some(bytes_chunk) = object.body.try_next().await.map_err(|e| {
            self.upload_error(format!("Failed while streaming {}: {}", s3_key, e))
        })? {
            output_file.write_all(&bytes_chunk).await?;
            total_bytes += bytes_chunk.len();
        }
        output_file.flush().await?;

        println!(
            "✅ Downloaded {} bytes to {}",
            total_bytes,
            destination.display()
        );
        Ok(destination)
    }
}
