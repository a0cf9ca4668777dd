//! Schema snapshot cache
//!
//! Readers load the current snapshot through an `ArcSwapOption` and never
//! block. Refreshes replace the whole snapshot; concurrent cache misses share
//! one in-flight refresh task and all receive its result.

use crate::{
    config::SchemaConfig,
    error::AppError,
    loki::{LogStore, StreamDescriptor, BACKEND_NAME},
    retry::{with_single_retry, RetryPolicy},
};
use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Immutable view of the store's schema at one point in time
#[derive(Debug)]
pub struct SchemaSnapshot {
    generation: u64,
    fetched_at: Instant,
    streams: Vec<StreamDescriptor>,
    labels: BTreeSet<String>,
    // Insert-only memo scoped to this snapshot
    label_values: DashMap<String, Arc<BTreeSet<String>>>,
}

impl SchemaSnapshot {
    pub fn new(generation: u64, streams: Vec<StreamDescriptor>, labels: BTreeSet<String>) -> Self {
        Self {
            generation,
            fetched_at: Instant::now(),
            streams,
            labels,
            label_values: DashMap::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    pub fn labels(&self) -> &BTreeSet<String> {
        &self.labels
    }

    pub fn contains_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    /// Values already fetched for `label` against this snapshot
    pub fn cached_values(&self, label: &str) -> Option<Arc<BTreeSet<String>>> {
        self.label_values.get(label).map(|v| Arc::clone(v.value()))
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<Arc<SchemaSnapshot>, AppError>>>;

/// Cached, single-flight access to the store's schema
#[derive(Clone)]
pub struct MetadataProvider {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn LogStore>,
    current: ArcSwapOption<SchemaSnapshot>,
    // Tagged with its refresh id so a finished refresh only clears its own slot
    inflight: Mutex<Option<(u64, RefreshFuture)>>,
    next_refresh_id: AtomicU64,
    next_generation: AtomicU64,
    // Snapshots with generation <= this value are treated as expired
    invalidated_through: AtomicU64,
    refresh_interval: Duration,
    max_staleness: Duration,
    call_timeout: Duration,
    retry: RetryPolicy,
}

impl MetadataProvider {
    pub fn new(
        store: Arc<dyn LogStore>,
        config: &SchemaConfig,
        call_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                current: ArcSwapOption::empty(),
                inflight: Mutex::new(None),
                next_refresh_id: AtomicU64::new(1),
                next_generation: AtomicU64::new(1),
                invalidated_through: AtomicU64::new(0),
                refresh_interval: Duration::from_secs(config.refresh_interval_seconds),
                max_staleness: Duration::from_secs(config.max_staleness_seconds),
                call_timeout,
                retry,
            }),
        }
    }

    /// Current snapshot, refreshed if expired or invalidated
    pub async fn get_snapshot(&self) -> Result<Arc<SchemaSnapshot>, AppError> {
        if let Some(snapshot) = self.inner.fresh_snapshot() {
            return Ok(snapshot);
        }

        let refresh = {
            let mut slot = self
                .inner
                .inflight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some((_, inflight)) = slot.as_ref() {
                debug!("Joining in-flight schema refresh");
                inflight.clone()
            } else if let Some(snapshot) = self.inner.fresh_snapshot() {
                // Another refresh finished between the fast path and the lock
                return Ok(snapshot);
            } else {
                let id = self.inner.next_refresh_id.fetch_add(1, Ordering::SeqCst);
                let inner = Arc::clone(&self.inner);
                // Spawned so a cancelled initiator does not cancel the refresh for other waiters
                let task = tokio::spawn({
                    let inner = Arc::clone(&inner);
                    async move { inner.refresh(id).await }
                });
                let refresh: RefreshFuture = async move {
                    let outcome = task.await.unwrap_or_else(|e| {
                        warn!(error = %e, "Schema refresh task failed");
                        crate::metrics::record_schema_refresh("failure");
                        Err(AppError::InternalError(format!("Schema refresh task failed: {}", e)))
                    });
                    // A panicked task never reaches its own cleanup
                    inner.clear_inflight(id);
                    outcome
                }
                .boxed()
                .shared();
                *slot = Some((id, refresh.clone()));
                refresh
            }
        };

        refresh.await
    }

    /// Known values for `label`, fetched once per snapshot
    pub async fn get_label_values(
        &self,
        snapshot: &SchemaSnapshot,
        label: &str,
    ) -> Result<Arc<BTreeSet<String>>, AppError> {
        if !snapshot.contains_label(label) {
            return Err(AppError::AmbiguousOrUnresolvable(format!(
                "Label '{}' is not part of schema generation {}",
                label, snapshot.generation
            )));
        }
        if let Some(values) = snapshot.cached_values(label) {
            return Ok(values);
        }

        let store = &self.inner.store;
        let values = with_single_retry(
            &self.inner.retry,
            BACKEND_NAME,
            self.inner.call_timeout,
            move || store.list_label_values(label),
        )
        .await
        .map_err(into_unavailable)?;

        let values: Arc<BTreeSet<String>> = Arc::new(values.into_iter().collect());
        debug!(label, count = values.len(), generation = snapshot.generation, "Cached label values");

        let entry = snapshot
            .label_values
            .entry(label.to_string())
            .or_insert(values);
        Ok(Arc::clone(entry.value()))
    }

    /// Expire the current snapshot; the next reader triggers a refresh
    pub fn invalidate(&self) {
        if let Some(current) = self.inner.current.load_full() {
            self.inner
                .invalidated_through
                .fetch_max(current.generation, Ordering::SeqCst);
            info!(generation = current.generation, "Schema snapshot invalidated");
        }
    }

    /// Last snapshot fetched, regardless of age
    pub fn current(&self) -> Option<Arc<SchemaSnapshot>> {
        self.inner.current.load_full()
    }
}

impl Inner {
    fn fresh_snapshot(&self) -> Option<Arc<SchemaSnapshot>> {
        let snapshot = self.current.load_full()?;
        let invalidated = snapshot.generation <= self.invalidated_through.load(Ordering::SeqCst);
        if invalidated || snapshot.age() >= self.refresh_interval {
            None
        } else {
            Some(snapshot)
        }
    }

    fn clear_inflight(&self, id: u64) {
        let mut slot = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(slot.as_ref(), Some((current, _)) if *current == id) {
            *slot = None;
        }
    }

    async fn refresh(&self, id: u64) -> Result<Arc<SchemaSnapshot>, AppError> {
        let started = Instant::now();
        let outcome = match self.fetch().await {
            Ok((labels, streams)) => {
                let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
                let snapshot = Arc::new(SchemaSnapshot::new(generation, streams, labels));
                self.current.store(Some(Arc::clone(&snapshot)));

                info!(
                    generation,
                    labels = snapshot.labels.len(),
                    streams = snapshot.streams.len(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Schema snapshot refreshed"
                );
                crate::metrics::record_schema_refresh("success");
                Ok(snapshot)
            }
            Err(e) => match self.current.load_full() {
                Some(previous) if previous.age() <= self.max_staleness => {
                    warn!(
                        error = %e,
                        generation = previous.generation,
                        age_seconds = previous.age().as_secs(),
                        "Schema refresh failed, serving last good snapshot"
                    );
                    crate::metrics::record_schema_refresh("stale");
                    Ok(previous)
                }
                _ => {
                    warn!(error = %e, "Schema refresh failed and no usable snapshot exists");
                    crate::metrics::record_schema_refresh("failure");
                    Err(into_unavailable(e))
                }
            },
        };

        self.clear_inflight(id);
        outcome
    }

    async fn fetch(&self) -> Result<(BTreeSet<String>, Vec<StreamDescriptor>), AppError> {
        let store = &self.store;
        let labels = with_single_retry(&self.retry, BACKEND_NAME, self.call_timeout, move || {
            store.list_labels()
        });
        let streams = with_single_retry(&self.retry, BACKEND_NAME, self.call_timeout, move || {
            store.list_streams()
        });
        let (labels, streams) = tokio::try_join!(labels, streams)?;

        Ok((labels.into_iter().collect(), streams))
    }
}

/// Metadata failures all mean the schema cannot be obtained
fn into_unavailable(error: AppError) -> AppError {
    match error {
        AppError::BackendUnavailable { .. } => error,
        other => AppError::BackendUnavailable {
            backend: BACKEND_NAME.to_string(),
            detail: other.to_string(),
        },
    }
}
