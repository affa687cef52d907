//! Source extraction adapters
//!
//! One [`Extractor`] implementation per transport, selected by the `type`
//! tag on the source descriptor. Both transports download the remote file
//! into memory on a blocking worker and decode it as CSV.

pub mod ftp;
pub mod sftp;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{SourceConfig, TransportKind};
use crate::table::Table;

/// A source producing one raw table per run
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Source name used for logging and error attribution
    fn name(&self) -> &str;

    /// Download and decode the remote file into a table
    async fn extract(&self) -> Result<Table>;
}

/// Build the extractor for a configured source
pub fn for_source(config: &SourceConfig) -> Box<dyn Extractor> {
    match config.kind {
        TransportKind::Ftp => Box::new(ftp::FtpExtractor::new(config.clone())),
        TransportKind::Sftp => Box::new(sftp::SftpExtractor::new(config.clone())),
    }
}
