//! FTP transport
//!
//! Downloads one remote file into memory. The suppaftp client is
//! synchronous, so the transfer runs on a blocking worker thread. Extended
//! Passive Mode is used for NAT/firewall compatibility.

use std::io::Read;

use anyhow::{Context, Result};
use async_trait::async_trait;
use suppaftp::FtpStream;
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::table::Table;

use super::Extractor;

/// FTP implementation of [`Extractor`]
pub struct FtpExtractor {
    config: SourceConfig,
}

impl FtpExtractor {
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    /// Synchronous download; the session is closed on every exit path
    /// (explicit quit on success, drop on error).
    fn download_sync(config: &SourceConfig) -> Result<Vec<u8>> {
        debug!(host = %config.host, port = config.port(), "Connecting to FTP server");

        let mut ftp = FtpStream::connect(format!("{}:{}", config.host, config.port()))
            .context("Failed to connect to FTP server")?;

        ftp.set_mode(suppaftp::Mode::ExtendedPassive);

        debug!(user = %config.user, "Logging in");
        ftp.login(config.user.as_str(), config.password.as_deref().unwrap_or(""))
            .context("FTP login failed")?;

        ftp.transfer_type(suppaftp::types::FileType::Binary)
            .context("Failed to set binary mode")?;

        debug!(path = %config.file_path, "Downloading file");
        let mut reader = ftp
            .retr_as_buffer(&config.file_path)
            .with_context(|| format!("Failed to download file: {}", config.file_path))?;

        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .context("Failed to read file data")?;

        if let Err(e) = ftp.quit() {
            warn!("Failed to quit FTP session gracefully: {}", e);
        }

        Ok(data)
    }
}

#[async_trait]
impl Extractor for FtpExtractor {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn extract(&self) -> Result<Table> {
        let config = self.config.clone();
        let data = tokio::task::spawn_blocking(move || Self::download_sync(&config))
            .await
            .map_err(|e| anyhow::anyhow!("FTP download task panicked: {}", e))??;

        let table = Table::from_csv(&data, &self.config.csv)?;
        info!(
            source = %self.config.name,
            rows = table.num_rows(),
            bytes = data.len(),
            "Extracted table over FTP"
        );
        Ok(table)
    }
}
