// tests/metrics_ingest.rs
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt as _;

use species_risk_grid::ingest::fetch_occurrences;
use species_risk_grid::ingest::providers::fixture::FixtureSource;
use species_risk_grid::ingest::types::{OccurrencePage, RawOccurrence};
use species_risk_grid::metrics::Metrics;
use species_risk_grid::FetchParams;

#[tokio::test]
async fn metrics_exposed_after_fetch() {
    // One recorder per test binary; this file holds the only test.
    let metrics = Metrics::init(1).expect("recorder");

    let page = OccurrencePage {
        results: vec![
            RawOccurrence::with_coords(1, 10.0, 10.0),
            RawOccurrence {
                decimal_longitude: None,
                ..RawOccurrence::with_coords(2, 10.0, 10.0)
            },
        ],
        end_of_records: true,
        count: Some(2),
    };
    let source = FixtureSource::new().with_pages("Sus scrofa", vec![page]);
    let out = fetch_occurrences(
        &source,
        "Sus scrofa",
        &FetchParams::new(2026),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(out.len(), 1);

    let req = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let resp = metrics.router().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    assert!(text.contains("occurrence_pages_total"));
    assert!(text.contains("occurrence_records_kept_total"));
    assert!(text.contains("occurrence_records_dropped_total"));
    assert!(text.contains("occurrence_page_fetch_ms"));
    assert!(text.contains("catalog_species"));
}
