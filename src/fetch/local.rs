use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::fetch::{Fetched, Transport};

/// Resolves plain paths and `file://` URLs against the local filesystem.
pub struct LocalTransport;

#[async_trait]
impl Transport for LocalTransport {
    async fn open(&self, url: &str) -> Result<Fetched> {
        let path = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Fetched::File(path)),
            Ok(_) => Err(Error::transport(format!(
                "{} is not a regular file",
                path.display()
            ))),
            Err(err) => Err(Error::transport(format!(
                "cannot open {}: {err}",
                path.display()
            ))),
        }
    }
}
