use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::fetch::{ByteStream, Fetched, Transport};

/// Fetches URLs over HTTP(S) with a shared `reqwest` client.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, url: &str) -> Result<Fetched> {
        let response = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?;
        Ok(Fetched::Stream(Box::new(HttpStream { response })))
    }
}

struct HttpStream {
    response: reqwest::Response,
}

#[async_trait]
impl ByteStream for HttpStream {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        Ok(self.response.chunk().await?)
    }
}
