//! The transport boundary: resolving a URL to a readable byte source.

mod local;

#[cfg(feature = "http")]
mod http;

pub use local::LocalTransport;

#[cfg(feature = "http")]
pub use http::HttpTransport;

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Result;

/// How many bytes a file-backed stream reads per block. Cancellation is
/// observed between blocks, which bounds abort latency.
pub const COPY_BLOCK_BYTES: usize = 256_000;

/// Resolves a URL to its bytes.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, url: &str) -> Result<Fetched>;
}

/// The result of resolving a URL.
pub enum Fetched {
    /// The content already lives on the local filesystem and is reused
    /// directly, with no copy.
    File(PathBuf),
    /// A stream of byte blocks to be materialized by the caller.
    Stream(Box<dyn ByteStream>),
}

/// A pull-based stream of byte blocks.
#[async_trait]
pub trait ByteStream: Send {
    /// The next block, or `None` at end of stream.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;
}

/// Adapts any `AsyncRead` into a [`ByteStream`] of fixed-size blocks.
pub struct ReaderStream<R> {
    reader: R,
    block_bytes: usize,
}

impl<R: AsyncRead + Send + Unpin> ReaderStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            block_bytes: COPY_BLOCK_BYTES,
        }
    }

    pub fn block_bytes(mut self, n: usize) -> Self {
        self.block_bytes = n.max(1);
        self
    }
}

#[async_trait]
impl<R: AsyncRead + Send + Unpin> ByteStream for ReaderStream<R> {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        let mut buf = vec![0_u8; self.block_bytes];
        let n = self.reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(Bytes::from(buf)))
    }
}

/// The default transport: dispatches on the URL scheme.
///
/// `http://` and `https://` go through [`HttpTransport`] when the `http`
/// feature is enabled; everything else is treated as a local path.
pub struct AutoTransport {
    local: LocalTransport,
    #[cfg(feature = "http")]
    http: HttpTransport,
}

impl AutoTransport {
    pub fn new() -> Self {
        Self {
            local: LocalTransport,
            #[cfg(feature = "http")]
            http: HttpTransport::new(),
        }
    }
}

impl Default for AutoTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for AutoTransport {
    async fn open(&self, url: &str) -> Result<Fetched> {
        if url.starts_with("http://") || url.starts_with("https://") {
            #[cfg(feature = "http")]
            return self.http.open(url).await;
            #[cfg(not(feature = "http"))]
            return Err(crate::error::Error::transport(format!(
                "http support is not enabled, cannot open {url}"
            )));
        }
        self.local.open(url).await
    }
}
