// src/ingest/providers/fixture.rs
use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::ingest::error::FetchError;
use crate::ingest::types::{OccurrencePage, OccurrenceSource, PageQuery};

#[derive(Debug, Clone)]
enum Reply {
    Page(OccurrencePage),
    Status(u16, String),
}

/// Scripted in-memory source: replies are queued per scientific name and
/// served by page index (`offset / limit`). Past the script it answers an
/// empty final page. Every query is logged for assertions.
#[derive(Debug, Default)]
pub struct FixtureSource {
    scripts: HashMap<String, Vec<Reply>>,
    requests: Mutex<Vec<PageQuery>>,
}

impl FixtureSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pages(mut self, scientific_name: &str, pages: Vec<OccurrencePage>) -> Self {
        self.scripts
            .entry(scientific_name.to_string())
            .or_default()
            .extend(pages.into_iter().map(Reply::Page));
        self
    }

    /// Queue a non-success response at the next page index for this species.
    pub fn with_failure(mut self, scientific_name: &str, status: u16, reason: &str) -> Self {
        self.scripts
            .entry(scientific_name.to_string())
            .or_default()
            .push(Reply::Status(status, reason.to_string()));
        self
    }

    /// Single page parsed from a search-response JSON document.
    pub fn with_json_page(self, scientific_name: &str, body: &str) -> Result<Self, FetchError> {
        let page: OccurrencePage = serde_json::from_str(body)?;
        Ok(self.with_pages(scientific_name, vec![page]))
    }

    pub fn requests(&self) -> Vec<PageQuery> {
        self.requests.lock().clone()
    }

    pub fn request_count_for(&self, scientific_name: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|q| q.scientific_name == scientific_name)
            .count()
    }
}

#[async_trait]
impl OccurrenceSource for FixtureSource {
    async fn fetch_page(&self, query: &PageQuery) -> Result<OccurrencePage, FetchError> {
        self.requests.lock().push(query.clone());

        let index = usize::try_from(query.offset / u64::from(query.limit.max(1))).unwrap_or(usize::MAX);
        let reply = self
            .scripts
            .get(&query.scientific_name)
            .and_then(|s| s.get(index));

        match reply {
            Some(Reply::Page(p)) => Ok(p.clone()),
            Some(Reply::Status(status, reason)) => Err(FetchError::Status {
                status: *status,
                reason: reason.clone(),
            }),
            None => Ok(OccurrencePage {
                results: Vec::new(),
                end_of_records: true,
                count: None,
            }),
        }
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}
