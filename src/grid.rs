//! # Grid Aggregation
//! Bins occurrence points into fixed-size latitude/longitude cells and
//! classifies each cell by report density.
//!
//! Cells live in raw degree space: `index = floor(coord / cell_size)`. Their
//! true ground area shrinks toward the poles; that is accepted here.
//!
//! [`aggregate`] is pure and total. Output order follows the first appearance
//! of each cell key in the input; use [`AggregationResult::sorted`] when a
//! stable geographic order is needed.

use std::collections::HashMap;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::ingest::types::OccurrenceRecord;

pub const DEFAULT_CELL_SIZE_DEGREES: f64 = 1.0;

/// Finest accepted cell edge. Below this, `coord / cell_size` leaves the
/// `i64` index range and distinct points collapse into one saturated cell.
pub const MIN_CELL_SIZE_DEGREES: f64 = 1e-6;

/// Require a finite cell size of at least [`MIN_CELL_SIZE_DEGREES`].
/// [`aggregate`] does not call this.
pub fn validate_cell_size(cell_size_degrees: f64) -> Result<()> {
    if !(cell_size_degrees.is_finite() && cell_size_degrees >= MIN_CELL_SIZE_DEGREES) {
        bail!(
            "cell size must be a finite number of degrees >= {MIN_CELL_SIZE_DEGREES}, got {cell_size_degrees}"
        );
    }
    Ok(())
}

/// Risk tier of a grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

/// Report-count cutoffs. Reaching a cutoff counts as that tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Thresholds {
    pub high: u32,
    pub medium: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high: 30,
            medium: 10,
        }
    }
}

impl Thresholds {
    pub fn new(high: u32, medium: u32) -> Self {
        Self { high, medium }
    }

    /// High is checked first, so a count meeting both cutoffs is High.
    pub fn classify(&self, count: usize) -> RiskTier {
        let count = u64::try_from(count).unwrap_or(u64::MAX);
        if count >= u64::from(self.high) {
            RiskTier::High
        } else if count >= u64::from(self.medium) {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }

    /// Require `high > medium > 0`. [`aggregate`] does not call this.
    pub fn validate(&self) -> Result<()> {
        if self.medium == 0 {
            bail!("medium threshold must be positive");
        }
        if self.high <= self.medium {
            bail!(
                "high threshold ({}) must exceed medium threshold ({})",
                self.high,
                self.medium
            );
        }
        Ok(())
    }
}

/// Cell identity: floor-divided coordinate indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellKey {
    pub lat_index: i64,
    pub lng_index: i64,
}

impl CellKey {
    pub fn for_point(lat: f64, lng: f64, cell_size: f64) -> Self {
        Self {
            lat_index: (lat / cell_size).floor() as i64,
            lng_index: (lng / cell_size).floor() as i64,
        }
    }

    /// Cell center in degrees as (lat, lng).
    pub fn center(&self, cell_size: f64) -> (f64, f64) {
        (
            (self.lat_index as f64 + 0.5) * cell_size,
            (self.lng_index as f64 + 0.5) * cell_size,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridCell {
    pub lat_index: i64,
    pub lng_index: i64,
    pub count: usize,
    pub risk: RiskTier,
    pub center_lat: f64,
    pub center_lng: f64,
    /// Contributing records, kept for drill-down.
    pub records: Vec<OccurrenceRecord>,
}

impl GridCell {
    pub fn key(&self) -> CellKey {
        CellKey {
            lat_index: self.lat_index,
            lng_index: self.lng_index,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_records: usize,
    pub cell_count: usize,
    pub high_count: usize,
    pub med_count: usize,
    pub low_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    pub cells: Vec<GridCell>,
    pub summary: Summary,
}

impl AggregationResult {
    /// Same result with cells ordered by `(lat_index, lng_index)`.
    pub fn sorted(mut self) -> Self {
        self.cells.sort_by_key(GridCell::key);
        self
    }

    pub fn cell(&self, key: CellKey) -> Option<&GridCell> {
        self.cells.iter().find(|c| c.key() == key)
    }
}

/// Bin `records` into cells of `cell_size_degrees` and classify each cell.
///
/// A non-finite or non-positive cell size falls back to
/// [`DEFAULT_CELL_SIZE_DEGREES`].
pub fn aggregate(
    records: &[OccurrenceRecord],
    cell_size_degrees: f64,
    thresholds: Thresholds,
) -> AggregationResult {
    let cell_size = if cell_size_degrees.is_finite() && cell_size_degrees > 0.0 {
        cell_size_degrees
    } else {
        tracing::warn!(
            target: "grid",
            cell_size_degrees,
            "invalid cell size, using default"
        );
        DEFAULT_CELL_SIZE_DEGREES
    };

    // Groups in first-seen order; the map only points into `groups`.
    let mut slots: HashMap<CellKey, usize> = HashMap::new();
    let mut groups: Vec<(CellKey, Vec<OccurrenceRecord>)> = Vec::new();
    for r in records {
        let key = CellKey::for_point(r.latitude, r.longitude, cell_size);
        let slot = *slots.entry(key).or_insert_with(|| {
            groups.push((key, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(r.clone());
    }

    let mut summary = Summary {
        total_records: records.len(),
        cell_count: groups.len(),
        ..Summary::default()
    };

    let cells = groups
        .into_iter()
        .map(|(key, members)| {
            let count = members.len();
            let risk = thresholds.classify(count);
            match risk {
                RiskTier::High => summary.high_count += 1,
                RiskTier::Medium => summary.med_count += 1,
                RiskTier::Low => summary.low_count += 1,
            }
            let (center_lat, center_lng) = key.center(cell_size);
            GridCell {
                lat_index: key.lat_index,
                lng_index: key.lng_index,
                count,
                risk,
                center_lat,
                center_lng,
                records: members,
            }
        })
        .collect();

    AggregationResult { cells, summary }
}
