// src/ingest/providers/gbif.rs
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::ingest::error::FetchError;
use crate::ingest::types::{OccurrencePage, OccurrenceSource, PageQuery};

pub const DEFAULT_ENDPOINT: &str = "https://api.gbif.org/v1/occurrence/search";

/// Occurrence search over HTTP (GBIF-compatible endpoint).
#[derive(Clone)]
pub struct GbifSource {
    endpoint: String,
    client: Client,
}

impl GbifSource {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(concat!("species-risk-grid/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()?;
        Ok(Self::with_client(endpoint, client))
    }

    pub fn with_client(endpoint: impl Into<String>, client: Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            client,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl OccurrenceSource for GbifSource {
    async fn fetch_page(&self, query: &PageQuery) -> Result<OccurrencePage, FetchError> {
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&query.to_params())
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        Ok(resp.json::<OccurrencePage>().await?)
    }

    fn name(&self) -> &'static str {
        "gbif"
    }
}
