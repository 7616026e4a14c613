// src/ingest/types.rs
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ingest::error::FetchError;

/// One sanitized occurrence report. Coordinates are always present and finite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OccurrenceRecord {
    pub key: Option<u64>,
    pub latitude: f64,
    pub longitude: f64,
    pub year: Option<i32>,
    pub country: Option<String>,
    pub state_province: Option<String>,
}

impl OccurrenceRecord {
    /// Bare record at a coordinate (handy for tests and synthetic inputs).
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            key: None,
            latitude,
            longitude,
            year: None,
            country: None,
            state_province: None,
        }
    }
}

/// Occurrence object as returned by the search endpoint.
///
/// Coordinates stay loose JSON so that a string or null in one record drops
/// that record instead of failing the whole page.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawOccurrence {
    #[serde(default)]
    pub key: Option<u64>,
    #[serde(default)]
    pub decimal_latitude: Option<Value>,
    #[serde(default)]
    pub decimal_longitude: Option<Value>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub state_province: Option<String>,
}

impl RawOccurrence {
    pub fn with_coords(key: u64, lat: f64, lng: f64) -> Self {
        Self {
            key: Some(key),
            decimal_latitude: Some(Value::from(lat)),
            decimal_longitude: Some(Value::from(lng)),
            ..Self::default()
        }
    }

    /// Map to the sanitized shape; `None` when either coordinate is missing,
    /// non-numeric or non-finite.
    pub fn sanitize(&self) -> Option<OccurrenceRecord> {
        let latitude = finite_number(self.decimal_latitude.as_ref())?;
        let longitude = finite_number(self.decimal_longitude.as_ref())?;
        Some(OccurrenceRecord {
            key: self.key,
            latitude,
            longitude,
            year: self.year,
            country: self.country.clone(),
            state_province: self.state_province.clone(),
        })
    }
}

fn finite_number(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64().filter(|x| x.is_finite()),
        _ => None,
    }
}

/// One page of the search response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OccurrencePage {
    #[serde(default)]
    pub results: Vec<RawOccurrence>,
    #[serde(default)]
    pub end_of_records: bool,
    /// Total matching records reported by the service, if any.
    #[serde(default)]
    pub count: Option<u64>,
}

/// Inclusive year window, rendered as `start,end` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    /// Trailing window ending at `current_year`.
    pub fn lookback(current_year: i32, years: u32) -> Self {
        let back = i32::try_from(years).unwrap_or(i32::MAX);
        Self {
            start: current_year.saturating_sub(back),
            end: current_year,
        }
    }

    pub fn as_param(&self) -> String {
        format!("{},{}", self.start, self.end)
    }
}

/// Parameters of a single page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub scientific_name: String,
    pub years: YearRange,
    pub limit: u32,
    pub offset: u64,
}

impl PageQuery {
    /// Query pairs in the order the search endpoint documents them.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("scientificName", self.scientific_name.clone()),
            ("hasCoordinate", "true".to_string()),
            ("year", self.years.as_param()),
            ("limit", self.limit.to_string()),
            ("offset", self.offset.to_string()),
        ]
    }
}

/// A remote (or scripted) occurrence service that answers one page at a time.
#[async_trait::async_trait]
pub trait OccurrenceSource: Send + Sync {
    async fn fetch_page(&self, query: &PageQuery) -> Result<OccurrencePage, FetchError>;
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitize_requires_both_numeric_coordinates() {
        let ok = RawOccurrence::with_coords(1, 35.4, -120.9);
        assert_eq!(ok.sanitize().map(|r| (r.latitude, r.longitude)), Some((35.4, -120.9)));

        let null_lat = RawOccurrence {
            decimal_latitude: Some(Value::Null),
            ..RawOccurrence::with_coords(2, 0.0, 1.0)
        };
        assert!(null_lat.sanitize().is_none());

        let string_lng = RawOccurrence {
            decimal_longitude: Some(json!("12.5")),
            ..RawOccurrence::with_coords(3, 0.0, 1.0)
        };
        assert!(string_lng.sanitize().is_none());

        let missing = RawOccurrence {
            decimal_longitude: None,
            ..RawOccurrence::with_coords(4, 0.0, 1.0)
        };
        assert!(missing.sanitize().is_none());
    }

    #[test]
    fn page_decodes_service_json() {
        let body = json!({
            "offset": 0,
            "limit": 2,
            "endOfRecords": true,
            "count": 2,
            "results": [
                {"key": 11, "decimalLatitude": 40.1, "decimalLongitude": -74.2,
                 "year": 2023, "country": "United States of America", "stateProvince": "New Jersey"},
                {"key": 12, "decimalLatitude": null, "decimalLongitude": 3.0}
            ]
        });
        let page: OccurrencePage = serde_json::from_value(body).unwrap();
        assert!(page.end_of_records);
        assert_eq!(page.results.len(), 2);
        let kept: Vec<_> = page.results.iter().filter_map(RawOccurrence::sanitize).collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].state_province.as_deref(), Some("New Jersey"));
        assert_eq!(kept[0].year, Some(2023));
    }

    #[test]
    fn year_range_renders_inclusive_pair() {
        let r = YearRange::lookback(2026, 5);
        assert_eq!(r, YearRange { start: 2021, end: 2026 });
        assert_eq!(r.as_param(), "2021,2026");
    }

    #[test]
    fn page_query_params_cover_filters() {
        let q = PageQuery {
            scientific_name: "Pterois volitans".into(),
            years: YearRange { start: 2020, end: 2025 },
            limit: 300,
            offset: 600,
        };
        let params = q.to_params();
        assert!(params.contains(&("hasCoordinate", "true".to_string())));
        assert!(params.contains(&("year", "2020,2025".to_string())));
        assert!(params.contains(&("offset", "600".to_string())));
    }
}
