use crate::catalog::{QueryName, QueryParams};
use crate::errors::AppResult;
use crate::models::AggregateResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub query: QueryName,
    pub params: QueryParams,
}

impl CacheKey {
    pub fn new(query: QueryName, params: QueryParams) -> Self {
        Self { query, params }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub generation: u64,
    pub entries: usize,
    pub hits: u64,
    pub computations: u64,
}

type Slot = Arc<OnceCell<Arc<AggregateResult>>>;

#[derive(Default)]
struct CacheState {
    generation: u64,
    entries: HashMap<CacheKey, Slot>,
}

enum Lookup {
    Slot(Slot),
    Stale,
}

/// Memoizes query results for the current filter generation. A newer generation
/// drops every entry; there is no per-key expiry.
#[derive(Default)]
pub struct ResultCache {
    state: Mutex<CacheState>,
    hits: AtomicU64,
    computations: AtomicU64,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached result for `key`, running `compute` at most once per key
    /// per generation. Errors are returned to every waiter and are not cached.
    /// Callers holding an older generation get a fresh, uncached computation.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: CacheKey,
        generation: u64,
        compute: F,
    ) -> AppResult<Arc<AggregateResult>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<AggregateResult>>,
    {
        let lookup = {
            let mut state = self.lock_state();
            if generation > state.generation {
                Self::reset(&mut state, generation);
            }
            if generation < state.generation {
                Lookup::Stale
            } else {
                Lookup::Slot(state.entries.entry(key.clone()).or_default().clone())
            }
        };

        let slot = match lookup {
            Lookup::Slot(slot) => slot,
            Lookup::Stale => {
                tracing::debug!(query = key.query.as_str(), generation, "computing for stale generation");
                self.computations.fetch_add(1, Ordering::Relaxed);
                return compute().await.map(Arc::new);
            }
        };

        if let Some(cached) = slot.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached.clone());
        }

        let value = slot
            .get_or_try_init(|| async move {
                self.computations.fetch_add(1, Ordering::Relaxed);
                compute().await.map(Arc::new)
            })
            .await?;
        Ok(value.clone())
    }

    /// Moves the cache to `generation`, dropping all entries if it is newer.
    pub fn advance_to(&self, generation: u64) {
        let mut state = self.lock_state();
        if generation > state.generation {
            Self::reset(&mut state, generation);
        }
    }

    pub fn clear(&self) {
        let mut state = self.lock_state();
        state.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock_state();
        CacheStats {
            generation: state.generation,
            entries: state.entries.values().filter(|slot| slot.initialized()).count(),
            hits: self.hits.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
        }
    }

    fn reset(state: &mut CacheState, generation: u64) {
        let dropped = state.entries.len();
        state.entries.clear();
        tracing::debug!(from = state.generation, to = generation, dropped, "result cache invalidated");
        state.generation = generation;
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, CacheState> {
        // The guarded map is always left consistent, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
