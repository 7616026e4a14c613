//! # Engine
//! Holds the species catalog, the occurrence source and the latest fetched
//! records per species. Grids are aggregated on demand and memoized per
//! `(species, cell size, thresholds)` until the next refresh.
//!
//! Every refresh bumps a generation counter under the state write lock. Cache
//! entries carry the generation of the records they were built from, and a
//! grid is only stored while that generation is still current, so a refresh
//! racing an aggregation can never leave a stale grid behind.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use lru::LruCache;
use metrics::gauge;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::catalog::SpeciesCatalog;
use crate::config::settings::{FetchSettings, GridSettings};
use crate::grid::{aggregate, AggregationResult, Thresholds};
use crate::ingest::error::FetchError;
use crate::ingest::fetch_all_settled;
use crate::ingest::types::{OccurrenceRecord, OccurrenceSource};

/// Serializable view of a failed species fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchFailure {
    pub status: Option<u16>,
    pub reason: String,
}

impl From<&FetchError> for FetchFailure {
    fn from(e: &FetchError) -> Self {
        Self {
            status: e.status(),
            reason: e.reason(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SpeciesState {
    Pending,
    Ready(Arc<Vec<OccurrenceRecord>>),
    Failed(FetchFailure),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("unknown species '{0}'")]
    UnknownSpecies(String),
    #[error("occurrences for '{0}' are not loaded yet")]
    Pending(String),
    #[error("occurrences for '{species_id}' failed to load: {}", .failure.reason)]
    Failed {
        species_id: String,
        failure: FetchFailure,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshEntry {
    pub species_id: String,
    pub records: Option<usize>,
    pub error: Option<FetchFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub finished_at: DateTime<Utc>,
    pub species: Vec<RefreshEntry>,
}

/// Memoized grids kept across all species; least recently used go first.
pub const GRID_CACHE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GridKey {
    species_id: String,
    generation: u64,
    cell_bits: u64,
    thresholds: Thresholds,
}

#[derive(Debug, Default)]
struct Loaded {
    generation: u64,
    species: HashMap<String, SpeciesState>,
}

pub struct Engine {
    catalog: SpeciesCatalog,
    source: Arc<dyn OccurrenceSource>,
    fetch: FetchSettings,
    grid: GridSettings,
    state: RwLock<Loaded>,
    cache: Mutex<LruCache<GridKey, Arc<AggregationResult>>>,
    last_refresh: RwLock<Option<DateTime<Utc>>>,
    refresh_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(
        catalog: SpeciesCatalog,
        source: Arc<dyn OccurrenceSource>,
        fetch: FetchSettings,
        grid: GridSettings,
    ) -> Self {
        Self::with_cache_capacity(catalog, source, fetch, grid, GRID_CACHE_CAPACITY)
    }

    pub fn with_cache_capacity(
        catalog: SpeciesCatalog,
        source: Arc<dyn OccurrenceSource>,
        fetch: FetchSettings,
        grid: GridSettings,
        cache_capacity: usize,
    ) -> Self {
        let species = catalog
            .iter()
            .map(|sp| (sp.id.clone(), SpeciesState::Pending))
            .collect();
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            catalog,
            source,
            fetch,
            grid,
            state: RwLock::new(Loaded {
                generation: 0,
                species,
            }),
            cache: Mutex::new(LruCache::new(capacity)),
            last_refresh: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn catalog(&self) -> &SpeciesCatalog {
        &self.catalog
    }

    pub fn grid_defaults(&self) -> GridSettings {
        self.grid
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_refresh.read()
    }

    pub fn state_of(&self, species_id: &str) -> Option<SpeciesState> {
        self.state.read().species.get(species_id).cloned()
    }

    /// Per-species state in catalog order.
    pub fn status(&self) -> Vec<(String, SpeciesState)> {
        let loaded = self.state.read();
        self.catalog
            .iter()
            .map(|sp| {
                let state = loaded
                    .species
                    .get(&sp.id)
                    .cloned()
                    .unwrap_or(SpeciesState::Pending);
                (sp.id.clone(), state)
            })
            .collect()
    }

    pub fn cached_grids(&self) -> usize {
        self.cache.lock().len()
    }

    /// Stop any in-flight refresh before its next page request.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Refresh with the lookback window anchored at the wall-clock year.
    pub async fn refresh_now(&self) -> RefreshReport {
        self.refresh(Utc::now().year()).await
    }

    /// Re-fetch every species concurrently. Failures are recorded per species;
    /// successful species are usable even when others fail. Cancelled fetches
    /// leave the previous state untouched.
    pub async fn refresh(&self, current_year: i32) -> RefreshReport {
        let _running = self.refresh_lock.lock().await;

        let params = self.fetch.params(current_year);
        let outcomes =
            fetch_all_settled(self.source.as_ref(), &self.catalog, &params, &self.cancel).await;

        let mut entries = Vec::with_capacity(outcomes.len());
        {
            let mut loaded = self.state.write();
            loaded.generation += 1;
            let state = &mut loaded.species;
            for outcome in outcomes {
                let entry = match outcome.result {
                    Ok(records) => {
                        let n = records.len();
                        state.insert(
                            outcome.species_id.clone(),
                            SpeciesState::Ready(Arc::new(records)),
                        );
                        RefreshEntry {
                            species_id: outcome.species_id,
                            records: Some(n),
                            error: None,
                        }
                    }
                    Err(e) => {
                        let failure = FetchFailure::from(&e);
                        if !e.is_cancelled() {
                            state.insert(
                                outcome.species_id.clone(),
                                SpeciesState::Failed(failure.clone()),
                            );
                        }
                        RefreshEntry {
                            species_id: outcome.species_id,
                            records: None,
                            error: Some(failure),
                        }
                    }
                };
                entries.push(entry);
            }
            // Cleared before the write lock drops; lock order is state, then cache.
            self.cache.lock().clear();
        }

        let finished_at = Utc::now();
        *self.last_refresh.write() = Some(finished_at);
        gauge!("engine_last_refresh_ts").set(finished_at.timestamp() as f64);

        let failed = entries.iter().filter(|e| e.error.is_some()).count();
        tracing::info!(
            target: "engine",
            species = entries.len(),
            failed,
            current_year,
            "refresh finished"
        );

        RefreshReport {
            finished_at,
            species: entries,
        }
    }

    pub fn occurrences_for(
        &self,
        species_id: &str,
    ) -> Result<Arc<Vec<OccurrenceRecord>>, EngineError> {
        self.records_with_generation(species_id).map(|(records, _)| records)
    }

    /// Ready records together with the generation they belong to, read under
    /// one lock.
    fn records_with_generation(
        &self,
        species_id: &str,
    ) -> Result<(Arc<Vec<OccurrenceRecord>>, u64), EngineError> {
        let loaded = self.state.read();
        match loaded.species.get(species_id) {
            None => Err(EngineError::UnknownSpecies(species_id.to_string())),
            Some(SpeciesState::Pending) => Err(EngineError::Pending(species_id.to_string())),
            Some(SpeciesState::Failed(failure)) => Err(EngineError::Failed {
                species_id: species_id.to_string(),
                failure: failure.clone(),
            }),
            Some(SpeciesState::Ready(records)) => Ok((Arc::clone(records), loaded.generation)),
        }
    }

    /// Store `grid` unless a refresh has replaced the records it was built
    /// from. Returns whether it was stored.
    fn remember(&self, key: GridKey, grid: &Arc<AggregationResult>) -> bool {
        let loaded = self.state.read();
        if loaded.generation != key.generation {
            return false;
        }
        self.cache.lock().put(key, Arc::clone(grid));
        true
    }

    /// Aggregated grid for a species, computed on first request for this
    /// `(cell_size, thresholds)` pair and reused until the next refresh or
    /// until evicted by [`GRID_CACHE_CAPACITY`] newer entries.
    pub fn grid_for(
        &self,
        species_id: &str,
        cell_size_degrees: f64,
        thresholds: Thresholds,
    ) -> Result<Arc<AggregationResult>, EngineError> {
        let (records, generation) = self.records_with_generation(species_id)?;
        let key = GridKey {
            species_id: species_id.to_string(),
            generation,
            cell_bits: cell_size_degrees.to_bits(),
            thresholds,
        };
        if let Some(hit) = self.cache.lock().get(&key) {
            return Ok(Arc::clone(hit));
        }

        // Aggregation runs without any lock held.
        let result = Arc::new(aggregate(&records, cell_size_degrees, thresholds));
        if !self.remember(key, &result) {
            tracing::debug!(
                target: "engine",
                species_id,
                "records replaced during aggregation; grid not cached"
            );
        }
        Ok(result)
    }

    /// Grid with the configured default cell size and thresholds.
    pub fn default_grid_for(&self, species_id: &str) -> Result<Arc<AggregationResult>, EngineError> {
        self.grid_for(species_id, self.grid.cell_size_degrees, self.grid.thresholds)
    }
}
