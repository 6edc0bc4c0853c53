//! Peer RPC client

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::peers::PeerGetter;
use crate::protocol::{Request, Response};

/// Fetches values from one peer at `base_url` (peer address plus base path)
#[derive(Debug, Clone)]
pub struct HttpGetter {
    base_url: String,
    client: Client,
}

impl HttpGetter {
    pub fn new(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, request: &Request) -> String {
        format!(
            "{}{}/{}",
            self.base_url,
            urlencoding::encode(&request.group),
            urlencoding::encode(&request.key)
        )
    }
}

#[async_trait]
impl PeerGetter for HttpGetter {
    #[instrument(skip(self, request), fields(peer = %self.base_url, key = %request.key))]
    async fn get(&self, request: &Request) -> Result<Response> {
        let url = self.url_for(request);
        debug!("fetching {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| Error::Peer {
            peer: self.base_url.clone(),
            reason: e.to_string(),
        })?;

        if response.status() != StatusCode::OK {
            return Err(Error::PeerStatus {
                peer: self.base_url.clone(),
                status: response.status().to_string(),
            });
        }

        let body = response.bytes().await.map_err(|e| Error::Peer {
            peer: self.base_url.clone(),
            reason: format!("reading response body: {}", e),
        })?;

        Response::decode(&body)
    }
}
