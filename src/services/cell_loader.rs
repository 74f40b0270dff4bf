//! Cached, cancellable cell loading
//!
//! The loader owns the success cache and the table of in-flight requests.
//! Every public operation resolves to `CellData`; transport errors become
//! `Failure` and cancelled requests become `NotAsked`.

use crate::core::{CacheKey, CellData, CellKey, CellStore};
use crate::services::api::{BulkCellRequest, IntersectApi, IntersectRequest};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug)]
struct InFlight {
    ticket: u64,
    token: CancellationToken,
}

/// Translates cell keys into authoritative cell data
pub struct CellLoader {
    api: Arc<dyn IntersectApi>,
    /// Successful results only; failures are never cached
    cache: Mutex<HashMap<CacheKey, CellData>>,
    in_flight: Mutex<HashMap<CacheKey, InFlight>>,
    next_ticket: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CellLoader {
    pub fn new(api: Arc<dyn IntersectApi>) -> Self {
        Self {
            api,
            cache: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
        }
    }

    pub fn cache_key(&self, key: &CellKey) -> CacheKey {
        key.cache_key()
    }

    pub fn cached(&self, key: &CellKey) -> Option<CellData> {
        lock(&self.cache).get(&key.cache_key()).cloned()
    }

    pub fn is_in_flight(&self, key: &CellKey) -> bool {
        lock(&self.in_flight).contains_key(&key.cache_key())
    }

    /// Load one cell.
    ///
    /// A cached success is returned without touching the network. A second
    /// call for the same key cancels the first, which then resolves to
    /// `NotAsked`.
    pub async fn load_cell(&self, key: &CellKey) -> CellData {
        let cache_key = key.cache_key();

        if let Some(hit) = lock(&self.cache).get(&cache_key).cloned() {
            debug!(cell = %cache_key, "cell cache hit");
            return hit;
        }

        let (ticket, token) = self.register(&cache_key);
        debug!(cell = %cache_key, ticket, "loading cell");

        let request = IntersectRequest::from(key);
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = self.api.intersect(&request) => Some(result),
        };

        let still_current = self.release(&cache_key, ticket);

        match outcome {
            None => {
                debug!(cell = %cache_key, ticket, "cell load cancelled");
                CellData::NotAsked
            }
            Some(_) if !still_current => {
                debug!(cell = %cache_key, ticket, "discarding superseded cell response");
                CellData::NotAsked
            }
            Some(Ok(result)) => {
                let data = CellData::Success(result);
                lock(&self.cache).insert(cache_key, data.clone());
                data
            }
            Some(Err(err)) => {
                warn!(cell = %cache_key, error = %err, "cell load failed");
                CellData::Failure(err.to_string())
            }
        }
    }

    /// Load a full rows x columns product in one round-trip
    pub async fn load_bulk_cells(&self, request: &BulkCellRequest) -> CellStore {
        let token = CancellationToken::new();
        self.load_bulk_cells_cancellable(request, &token)
            .await
            .unwrap_or_default()
    }

    /// Like `load_bulk_cells`, but returns `None` if `token` fires first
    pub async fn load_bulk_cells_cancellable(
        &self,
        request: &BulkCellRequest,
        token: &CancellationToken,
    ) -> Option<CellStore> {
        debug!(
            rows = request.rows.len(),
            columns = request.columns.len(),
            "bulk loading cells"
        );

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = self.api.bulk_intersect(request) => Some(result),
        };

        match outcome? {
            Ok(response) => {
                let mut results = HashMap::with_capacity(response.cells.len());
                let mut cache = lock(&self.cache);
                for cell in response.cells {
                    let cache_key = cell.cell_key().cache_key();
                    let data = CellData::Success(cell.data);
                    cache.insert(cache_key.clone(), data.clone());
                    results.insert(cache_key, data);
                }
                Some(CellStore::from(results))
            }
            Err(err) => {
                warn!(error = %err, "bulk cell load failed");
                let message = err.to_string();
                let base = request.base_id();
                let results = request
                    .rows
                    .iter()
                    .flat_map(|row| request.columns.iter().map(move |col| (row, col)))
                    .map(|(row, col)| {
                        let key = CellKey::new(&row.id, &col.id).with_base(base);
                        (key.cache_key(), CellData::Failure(message.clone()))
                    })
                    .collect();
                Some(results)
            }
        }
    }

    pub fn cancel_cell(&self, key: &CellKey) {
        if let Some(entry) = lock(&self.in_flight).remove(&key.cache_key()) {
            entry.token.cancel();
        }
    }

    pub fn cancel_all(&self) {
        let drained: Vec<InFlight> = lock(&self.in_flight).drain().map(|(_, v)| v).collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "cancelling all in-flight cell loads");
        }
        for entry in drained {
            entry.token.cancel();
        }
    }

    /// Cancel in-flight loads whose key matches `pred`
    pub fn cancel_where(&self, mut pred: impl FnMut(&CacheKey) -> bool) {
        let mut in_flight = lock(&self.in_flight);
        in_flight.retain(|key, entry| {
            if pred(key) {
                entry.token.cancel();
                false
            } else {
                true
            }
        });
    }

    pub fn clear_cache(&self) {
        lock(&self.cache).clear();
    }

    /// Drop cached results whose key matches `pred`
    pub fn evict_where(&self, mut pred: impl FnMut(&CacheKey) -> bool) -> usize {
        let mut cache = lock(&self.cache);
        let before = cache.len();
        cache.retain(|key, _| !pred(key));
        before - cache.len()
    }

    /// Swap in a fresh token for `cache_key`, cancelling whatever was there
    fn register(&self, cache_key: &CacheKey) -> (u64, CancellationToken) {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let previous = lock(&self.in_flight).insert(
            cache_key.clone(),
            InFlight {
                ticket,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            debug!(cell = %cache_key, superseded = previous.ticket, "superseding in-flight load");
            previous.token.cancel();
        }
        (ticket, token)
    }

    /// Remove our entry if it is still the registered one
    fn release(&self, cache_key: &CacheKey, ticket: u64) -> bool {
        let mut in_flight = lock(&self.in_flight);
        match in_flight.get(cache_key) {
            Some(entry) if entry.ticket == ticket => {
                in_flight.remove(cache_key);
                true
            }
            _ => false,
        }
    }
}
