// sitevault/src/remote/sftp.rs
//
// SFTP provider over ssh2. The ssh2 session is blocking, so transfers
// run inside spawn_blocking with settings and paths moved in.
use std::fs::File;
use std::io;
use std::net::TcpStream;
use std::path::{Path, PathBuf};

use crate::config::SftpSettings;
use crate::errors::{AppError, Result};

pub const KEY: &str = "sftp";
pub const TITLE: &str = "SFTP";

pub struct SftpRemote {
    pub settings: SftpSettings,
}

impl SftpRemote {
    pub fn new(settings: SftpSettings) -> Self {
        SftpRemote { settings }
    }

    pub fn is_setup(&self) -> bool {
        self.settings.enabled
    }

    fn upload_error(message: String) -> AppError {
        AppError::UploadFailed {
            provider: KEY.to_string(),
            message,
        }
    }

    pub async fn upload(&self, filepath: &Path) -> Result<()> {
        let settings = self.settings.clone();
        let local_path = filepath.to_path_buf();

        println!(
            "Uploading {} to sftp://{}:{}{}",
            filepath.display(),
            settings.host,
            settings.port,
            settings.remote_dir
        );

        tokio::task::spawn_blocking(move || upload_blocking(&settings, &local_path))
            .await
            .map_err(|e| Self::upload_error(format!("SFTP upload task failed: {}", e)))??;

        println!("✅ Uploaded {} via SFTP", filepath.display());
        Ok(())
    }

    pub async fn download(&self, filename: &str, backup_dir: &Path) -> Result<PathBuf> {
        let settings = self.settings.clone();
        let remote_name = filename.to_string();
        let destination = backup_dir.join(filename);
        let dest_clone = destination.clone();

        std::fs::create_dir_all(backup_dir)?;

        tokio::task::spawn_blocking(move || download_blocking(&settings, &remote_name, &dest_clone))
            .await
            .map_err(|e| Self::upload_error(format!("SFTP download task failed: {}", e)))??;

        println!("✅ Downloaded {} via SFTP", destination.display());
        Ok(destination)
    }
}

fn connect(settings: &SftpSettings) -> Result<ssh2::Session> {
    let tcp = TcpStream::connect((settings.host.as_str(), settings.port)).map_err(|e| {
        SftpRemote::upload_error(format!(
            "Could not reach {}:{}: {}",
            settings.host, settings.port, e
        ))
    })?;

    let mut session = ssh2::Session::new()
        .map_err(|e| SftpRemote::upload_error(format!("SSH session init failed: {}", e)))?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| SftpRemote::upload_error(format!("SSH handshake failed: {}", e)))?;

    session
        .userauth_password(&settings.username, &settings.password)
        .map_err(|e| SftpRemote::upload_error(format!("SSH authentication failed: {}", e)))?;
    if !session.authenticated() {
        return Err(SftpRemote::upload_error(
            "SSH authentication failed".to_string(),
        ));
    }

    Ok(session)
}

fn remote_path(settings: &SftpSettings, filename: &str) -> PathBuf {
    Path::new(&settings.remote_dir).join(filename)
}

fn upload_blocking(settings: &SftpSettings, local_path: &Path) -> Result<()> {
    let filename = local_path
        .file_name()
        .ok_or_else(|| {
            SftpRemote::upload_error(format!("Not a file path: {}", local_path.display()))
        })?
        .to_string_lossy()
        .into_owned();

    let session = connect(settings)?;
    let sftp = session
        .sftp()
        .map_err(|e| SftpRemote::upload_error(format!("SFTP channel failed: {}", e)))?;

    let mut local_file = File::open(local_path)?;
    let target = remote_path(settings, &filename);
    let mut remote_file = sftp.create(&target).map_err(|e| {
        SftpRemote::upload_error(format!("Could not create {}: {}", target.display(), e))
    })?;

    io::copy(&mut local_file, &mut remote_file).map_err(|e| {
        SftpRemote::upload_error(format!("Transfer of {} failed: {}", filename, e))
    })?;

    Ok(())
}

fn download_blocking(settings: &SftpSettings, filename: &str, destination: &Path) -> Result<()> {
    let session = connect(settings)?;
    let sftp = session
        .sftp()
        .map_err(|e| SftpRemote::upload_error(format!("SFTP channel failed: {}", e)))?;

    let source = remote_path(settings, filename);
    let mut remote_file = sftp.open(&source).map_err(|e| {
        SftpRemote::upload_error(format!("Could not open {}: {}", source.display(), e))
    })?;

    let mut local_file = File::create(destination)?;
    io::copy(&mut remote_file, &mut local_file).map_err(|e| {
        SftpRemote::upload_error(format!("Transfer of {} failed: {}", filename, e))
    })?;

    Ok(())
}
