// tests/providers_gbif.rs
//
// GbifSource against a local Axum server that mimics the occurrence search
// endpoint. Checks the query string, JSON decoding and status propagation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use species_risk_grid::ingest::fetch_occurrences;
use species_risk_grid::ingest::providers::gbif::GbifSource;
use species_risk_grid::{FetchError, FetchParams};

#[derive(Clone, Default)]
struct Mock {
    seen: Arc<Mutex<Vec<HashMap<String, String>>>>,
    fail_with: Option<u16>,
    garbled: bool,
}

async fn search(State(mock): State<Mock>, Query(q): Query<HashMap<String, String>>) -> Response {
    mock.seen.lock().push(q.clone());
    if let Some(code) = mock.fail_with {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, "upstream down").into_response();
    }
    if mock.garbled {
        return (StatusCode::OK, "<html>maintenance</html>").into_response();
    }

    let offset: u64 = q.get("offset").and_then(|s| s.parse().ok()).unwrap_or(0);
    let limit: u64 = q.get("limit").and_then(|s| s.parse().ok()).unwrap_or(300);
    // Five records in total, one of them without a latitude.
    let all = vec![
        json!({"key": 1, "decimalLatitude": 35.4, "decimalLongitude": -120.9, "year": 2024}),
        json!({"key": 2, "decimalLatitude": 35.9, "decimalLongitude": -120.1, "year": 2023}),
        json!({"key": 3, "decimalLongitude": -100.0}),
        json!({"key": 4, "decimalLatitude": -12.3, "decimalLongitude": 130.8, "country": "Australia"}),
        json!({"key": 5, "decimalLatitude": 29.7, "decimalLongitude": -95.4, "stateProvince": "Texas"}),
    ];
    let start = offset as usize;
    let end = (offset + limit).min(all.len() as u64) as usize;
    let results: Vec<_> = all.get(start..end).map(|s| s.to_vec()).unwrap_or_default();
    Json(json!({
        "offset": offset,
        "limit": limit,
        "endOfRecords": end >= all.len(),
        "count": all.len(),
        "results": results,
    }))
    .into_response()
}

async fn spawn_mock(mock: Mock) -> String {
    let app = Router::new()
        .route("/v1/occurrence/search", get(search))
        .with_state(mock);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
    let addr = listener.local_addr().expect("mock addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}/v1/occurrence/search")
}

#[tokio::test]
async fn pages_through_http_endpoint_with_expected_query() {
    let mock = Mock::default();
    let seen = Arc::clone(&mock.seen);
    let url = spawn_mock(mock).await;

    let source = GbifSource::new(url, Duration::from_secs(5)).expect("client");
    let params = FetchParams::new(2026).with_page_size(2);
    let out = fetch_occurrences(&source, "Sus scrofa", &params, &CancellationToken::new())
        .await
        .expect("fetch ok");

    assert_eq!(out.len(), 4);
    assert_eq!(out[0].key, Some(1));
    assert_eq!(out[3].state_province.as_deref(), Some("Texas"));

    let seen = seen.lock().clone();
    assert_eq!(seen.len(), 3);
    let first = &seen[0];
    assert_eq!(first.get("scientificName").map(String::as_str), Some("Sus scrofa"));
    assert_eq!(first.get("hasCoordinate").map(String::as_str), Some("true"));
    assert_eq!(first.get("year").map(String::as_str), Some("2021,2026"));
    assert_eq!(first.get("limit").map(String::as_str), Some("2"));
    let offsets: Vec<_> = seen.iter().filter_map(|q| q.get("offset").cloned()).collect();
    assert_eq!(offsets, vec!["0", "2", "4"]);
}

#[tokio::test]
async fn non_success_status_becomes_fetch_error() {
    let mock = Mock {
        fail_with: Some(503),
        ..Mock::default()
    };
    let seen = Arc::clone(&mock.seen);
    let url = spawn_mock(mock).await;

    let source = GbifSource::new(url, Duration::from_secs(5)).expect("client");
    let err = fetch_occurrences(
        &source,
        "Sus scrofa",
        &FetchParams::new(2026),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    match err {
        FetchError::Status { status, reason } => {
            assert_eq!(status, 503);
            assert_eq!(reason, "Service Unavailable");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(seen.lock().len(), 1, "no retry after a failed page");
}

#[tokio::test]
async fn unreachable_endpoint_is_transport_error() {
    // Bind then drop to get a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let source = GbifSource::new(format!("http://{addr}/search"), Duration::from_secs(2)).unwrap();
    let err = fetch_occurrences(
        &source,
        "Sus scrofa",
        &FetchParams::new(2026),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, FetchError::Transport(_)));
    assert_eq!(err.reason(), "connection failed");
}

#[tokio::test]
async fn undecodable_body_is_malformed_response() {
    let mock = Mock {
        garbled: true,
        ..Mock::default()
    };
    let url = spawn_mock(mock).await;

    let source = GbifSource::new(url, Duration::from_secs(5)).expect("client");
    let err = fetch_occurrences(
        &source,
        "Sus scrofa",
        &FetchParams::new(2026),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, FetchError::Transport(ref e) if e.is_decode()), "got {err:?}");
    assert_eq!(err.status(), None);
    assert_eq!(err.reason(), "malformed response");
}
