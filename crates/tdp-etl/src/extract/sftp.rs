//! SFTP transport
//!
//! Downloads one remote file over an SSH session, authenticating with a
//! password or a private key file. libssh2 is synchronous, so the transfer
//! runs on a blocking worker thread; the session and channel are released
//! on every exit path (RAII on drop, explicit disconnect on success).

use std::io::Read;
use std::net::TcpStream;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ssh2::Session;
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::table::Table;

use super::Extractor;

/// SFTP implementation of [`Extractor`]
pub struct SftpExtractor {
    config: SourceConfig,
}

impl SftpExtractor {
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    fn download_sync(config: &SourceConfig) -> Result<Vec<u8>> {
        debug!(host = %config.host, port = config.port(), "Connecting to SFTP server");

        let tcp = TcpStream::connect((config.host.as_str(), config.port()))
            .context("Failed to connect to SFTP server")?;

        let mut session = Session::new().context("Failed to create SSH session")?;
        session.set_tcp_stream(tcp);
        session.handshake().context("SSH handshake failed")?;

        debug!(user = %config.user, "Authenticating");
        match (&config.key_file, &config.password) {
            (Some(key_file), _) => session
                .userauth_pubkey_file(&config.user, None, key_file, None)
                .context("SSH key authentication failed")?,
            (None, Some(password)) => session
                .userauth_password(&config.user, password)
                .context("SSH password authentication failed")?,
            (None, None) => anyhow::bail!("SFTP source has neither password nor key_file"),
        }

        let sftp = session.sftp().context("Failed to open SFTP channel")?;

        debug!(path = %config.file_path, "Downloading file");
        let mut remote = sftp
            .open(Path::new(&config.file_path))
            .with_context(|| format!("Failed to open remote file: {}", config.file_path))?;

        let mut data = Vec::new();
        remote
            .read_to_end(&mut data)
            .context("Failed to read remote file")?;
        drop(remote);
        drop(sftp);

        if let Err(e) = session.disconnect(None, "transfer complete", None) {
            warn!("Failed to disconnect SSH session gracefully: {}", e);
        }

        Ok(data)
    }
}

#[async_trait]
impl Extractor for SftpExtractor {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn extract(&self) -> Result<Table> {
        let config = self.config.clone();
        let data = tokio::task::spawn_blocking(move || Self::download_sync(&config))
            .await
            .map_err(|e| anyhow::anyhow!("SFTP download task panicked: {}", e))??;

        let table = Table::from_csv(&data, &self.config.csv)?;
        info!(
            source = %self.config.name,
            rows = table.num_rows(),
            bytes = data.len(),
            "Extracted table over SFTP"
        );
        Ok(table)
    }
}
