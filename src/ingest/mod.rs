// src/ingest/mod.rs
pub mod error;
pub mod providers;
pub mod types;

use std::collections::HashMap;
use std::time::Instant;

use chrono::Datelike;
use futures::future::{join_all, try_join_all};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::config::catalog::SpeciesCatalog;
use crate::ingest::error::FetchError;
use crate::ingest::types::{OccurrencePage, OccurrenceRecord, OccurrenceSource, PageQuery, YearRange};

/// Largest page the occurrence search endpoint will serve.
pub const MAX_PAGE_SIZE: u32 = 300;
pub const DEFAULT_MAX_RECORDS: usize = 1500;
pub const DEFAULT_LOOKBACK_YEARS: u32 = 5;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("occurrence_pages_total", "Occurrence pages fetched.");
        describe_counter!(
            "occurrence_records_kept_total",
            "Records kept after coordinate filtering."
        );
        describe_counter!(
            "occurrence_records_dropped_total",
            "Records dropped for missing or non-numeric coordinates."
        );
        describe_counter!(
            "occurrence_fetch_errors_total",
            "Species fetches that ended in an error."
        );
        describe_histogram!(
            "occurrence_page_fetch_ms",
            "Page request latency in milliseconds."
        );
    });
}

/// Knobs for one species fetch. `current_year` is explicit so the lookback
/// window is reproducible in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchParams {
    pub max_records: usize,
    pub page_size: u32,
    pub lookback_years: u32,
    pub current_year: i32,
}

impl FetchParams {
    pub fn new(current_year: i32) -> Self {
        Self {
            max_records: DEFAULT_MAX_RECORDS,
            page_size: MAX_PAGE_SIZE,
            lookback_years: DEFAULT_LOOKBACK_YEARS,
            current_year,
        }
    }

    /// Defaults with the window anchored at the wall-clock year (read now, not cached).
    pub fn for_current_year() -> Self {
        Self::new(chrono::Utc::now().year())
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_lookback_years(mut self, years: u32) -> Self {
        self.lookback_years = years;
        self
    }

    pub fn years(&self) -> YearRange {
        YearRange::lookback(self.current_year, self.lookback_years)
    }

    /// Page size actually sent, clamped to `1..=MAX_PAGE_SIZE`.
    pub fn effective_page_size(&self) -> u32 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }
}

/// Keep records with finite numeric coordinates. Returns (kept, dropped_count).
pub fn sanitize_page(page: &OccurrencePage) -> (Vec<OccurrenceRecord>, usize) {
    let kept: Vec<OccurrenceRecord> = page.results.iter().filter_map(|r| r.sanitize()).collect();
    let dropped = page.results.len() - kept.len();
    (kept, dropped)
}

/// Page through the source for one species and return at most
/// `params.max_records` sanitized records.
///
/// Stops when the cap is reached, the source signals end of records, or a page
/// comes back empty. Any failing page fails the whole call; nothing is retried.
/// The token is checked before every page request.
pub async fn fetch_occurrences(
    source: &dyn OccurrenceSource,
    scientific_name: &str,
    params: &FetchParams,
    cancel: &CancellationToken,
) -> Result<Vec<OccurrenceRecord>, FetchError> {
    ensure_metrics_described();

    let name = scientific_name.trim();
    if name.is_empty() {
        return Err(FetchError::InvalidQuery("scientific name is empty".into()));
    }

    let mut out: Vec<OccurrenceRecord> = Vec::new();
    if params.max_records == 0 {
        return Ok(out);
    }

    let years = params.years();
    let limit = params.effective_page_size();
    let mut offset: u64 = 0;
    let mut pages = 0usize;

    loop {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled {
                scientific_name: name.to_string(),
            });
        }

        let query = PageQuery {
            scientific_name: name.to_string(),
            years,
            limit,
            offset,
        };

        let t0 = Instant::now();
        let page = match source.fetch_page(&query).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(
                    target: "ingest",
                    error = %e,
                    provider = source.name(),
                    species = name,
                    offset,
                    "occurrence page failed"
                );
                counter!("occurrence_fetch_errors_total").increment(1);
                return Err(e);
            }
        };
        histogram!("occurrence_page_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("occurrence_pages_total").increment(1);
        pages += 1;

        let raw_len = page.results.len();
        let (kept, dropped) = sanitize_page(&page);
        counter!("occurrence_records_kept_total").increment(kept.len() as u64);
        counter!("occurrence_records_dropped_total").increment(dropped as u64);
        tracing::debug!(
            target: "ingest",
            species = name,
            offset,
            kept = kept.len(),
            dropped,
            end = page.end_of_records,
            "occurrence page"
        );

        out.extend(kept);

        if out.len() >= params.max_records || page.end_of_records || raw_len == 0 {
            break;
        }
        offset += u64::from(limit);
    }

    out.truncate(params.max_records);
    tracing::info!(
        target: "ingest",
        species = name,
        records = out.len(),
        pages,
        years = %years.as_param(),
        "occurrences fetched"
    );
    Ok(out)
}

/// Fetch every catalog species concurrently. The first failure abandons the
/// batch and is returned; no partial map is produced.
pub async fn fetch_all(
    source: &dyn OccurrenceSource,
    catalog: &SpeciesCatalog,
    params: &FetchParams,
    cancel: &CancellationToken,
) -> Result<HashMap<String, Vec<OccurrenceRecord>>, FetchError> {
    let futs = catalog.iter().map(|sp| {
        let token = cancel.child_token();
        async move {
            let records = fetch_occurrences(source, &sp.scientific_name, params, &token).await?;
            Ok::<_, FetchError>((sp.id.clone(), records))
        }
    });
    let pairs = try_join_all(futs).await?;
    Ok(pairs.into_iter().collect())
}

/// Outcome of one species inside a settled batch.
#[derive(Debug)]
pub struct SpeciesFetch {
    pub species_id: String,
    pub result: Result<Vec<OccurrenceRecord>, FetchError>,
}

/// Fetch every catalog species concurrently and keep each outcome, in catalog
/// order, so callers can render whatever succeeded.
pub async fn fetch_all_settled(
    source: &dyn OccurrenceSource,
    catalog: &SpeciesCatalog,
    params: &FetchParams,
    cancel: &CancellationToken,
) -> Vec<SpeciesFetch> {
    let futs = catalog.iter().map(|sp| {
        let token = cancel.child_token();
        async move {
            let result = fetch_occurrences(source, &sp.scientific_name, params, &token).await;
            SpeciesFetch {
                species_id: sp.id.clone(),
                result,
            }
        }
    });
    join_all(futs).await
}
