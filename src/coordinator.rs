//! Cache coordinator.
//!
//! Owns the canonical dashboard snapshot: decides cache-hit vs. refetch,
//! publishes a usable base snapshot before enrichment finishes, hands the
//! record set to the enrichment pipeline in the background, and persists the
//! final result. A later load for the same identity supersedes an in-flight
//! one; completions carrying a stale generation are dropped before they can
//! publish, never merged.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::api::{EmployeeDirectory, ReasoningProvider};
use crate::cache::DiskCache;
use crate::calibration::ThresholdCalibrator;
use crate::config::CoreConfig;
use crate::enrichment::enrich_records;
use crate::state::DashboardState;
use crate::training::TrainingComplete;
use crate::types::{
    compute_workforce_metrics, DashboardSnapshot, DatasetIdentity, EmployeeRecord, LoadRecord,
    LoadSource, WorkforceMetrics,
};

/// Skip background enrichment when at least this share of active records
/// already carries reasoning data (the listing collaborator returned it
/// inline). Matches the original product behavior; not tunable.
const ENRICHED_SKIP_RATIO: f64 = 0.9;

pub struct DashboardCore {
    state: Arc<DashboardState>,
    cache: Arc<DiskCache>,
    directory: Arc<dyn EmployeeDirectory>,
    reasoning: Arc<dyn ReasoningProvider>,
    calibrator: Arc<ThresholdCalibrator>,
    default_project_id: Option<String>,
    default_dataset_id: Option<String>,
    cache_ttl: Duration,
}

impl DashboardCore {
    pub fn new(
        state: Arc<DashboardState>,
        cache: Arc<DiskCache>,
        directory: Arc<dyn EmployeeDirectory>,
        reasoning: Arc<dyn ReasoningProvider>,
        config: &CoreConfig,
    ) -> Self {
        let calibrator = Arc::new(ThresholdCalibrator::new(Arc::clone(&cache)));
        Self {
            state,
            cache,
            directory,
            reasoning,
            calibrator,
            default_project_id: config.default_project_id.clone(),
            default_dataset_id: config.default_dataset_id.clone(),
            cache_ttl: config.cache_ttl(),
        }
    }

    pub fn state(&self) -> Arc<DashboardState> {
        Arc::clone(&self.state)
    }

    pub fn calibrator(&self) -> &ThresholdCalibrator {
        &self.calibrator
    }

    /// Load a dataset into the shared snapshot.
    ///
    /// Publishes the fast base snapshot before returning; enrichment (when
    /// needed) continues on a background task and publishes the final
    /// snapshot on completion. Every failure path degrades to a safe
    /// published state; this function never returns an error.
    pub async fn load_dataset(
        &self,
        project_id: &str,
        dataset_id: Option<&str>,
        force_refresh: bool,
    ) {
        // Resolve the dataset: explicit argument, else the last loaded
        // identity, else the configured durable fallback.
        let resolved = dataset_id
            .map(str::to_string)
            .or_else(|| self.state.last_identity().map(|id| id.dataset_id))
            .or_else(|| self.default_dataset_id.clone());

        let Some(resolved) = resolved else {
            log::debug!("coordinator: no dataset resolvable, clearing snapshot");
            self.state.publish(DashboardSnapshot::empty());
            self.state
                .record_load(LoadRecord::begin(None, force_refresh).finish(LoadSource::NoDataset));
            return;
        };

        let identity = DatasetIdentity::new(project_id, resolved);
        let generation = self.state.begin_generation(&identity);
        let record = LoadRecord::begin(Some(identity.clone()), force_refresh);

        // In-memory short-circuit, cheaper than touching the cache.
        if !force_refresh {
            let snapshot = self.state.snapshot();
            if snapshot.matches(&identity) && !snapshot.records.is_empty() {
                log::debug!("coordinator: {} already loaded, short-circuit", identity);
                self.state.record_load(record.finish(LoadSource::ShortCircuit));
                return;
            }
        }

        // Persistent cache: serve only when both keys hit.
        if !force_refresh {
            let cached_records: Option<Vec<EmployeeRecord>> =
                self.cache.get(&identity.records_key());
            let cached_metrics: Option<Option<WorkforceMetrics>> =
                self.cache.get(&identity.metrics_key());

            if let (Some(records), Some(metrics)) = (cached_records, cached_metrics) {
                log::info!(
                    "coordinator: serving {} from cache ({} records)",
                    identity,
                    records.len()
                );
                self.calibrator.observe(&records, &identity);
                self.state.publish(DashboardSnapshot {
                    identity: Some(identity.clone()),
                    records,
                    metrics,
                    loading: false,
                    enhancing: false,
                    enhancement_progress: 0,
                });
                self.state.set_last_identity(identity);
                self.state.record_load(record.finish(LoadSource::Cache));
                return;
            }
        }

        // Refetch. Show the loading state; a dataset switch clears the old
        // records rather than displaying them under the new identity.
        self.state.update(|s| {
            if !s.matches(&identity) {
                *s = DashboardSnapshot::empty();
                s.identity = Some(identity.clone());
            }
            s.loading = true;
        });

        let fetched = self
            .directory
            .list_employees(&identity.project_id, &identity.dataset_id, force_refresh)
            .await;

        let records = match fetched {
            Ok(records) => records,
            Err(e) => {
                log::warn!("coordinator: employee listing failed for {}: {}", identity, e);
                Vec::new()
            }
        };

        if records.is_empty() {
            // Persist the empty result so the next load serves it from cache
            // instead of hammering a collaborator that has nothing to give.
            self.publish_if_current(
                &identity,
                generation,
                DashboardSnapshot {
                    identity: Some(identity.clone()),
                    records: Vec::new(),
                    metrics: None,
                    loading: false,
                    enhancing: false,
                    enhancement_progress: 0,
                },
            );
            self.cache
                .set(&identity.records_key(), &Vec::<EmployeeRecord>::new(), self.cache_ttl);
            self.cache
                .set(&identity.metrics_key(), &None::<WorkforceMetrics>, self.cache_ttl);
            self.state.set_last_identity(identity);
            self.state.record_load(record.finish(LoadSource::NetworkEmpty));
            return;
        }

        let active: Vec<EmployeeRecord> =
            records.into_iter().filter(|r| r.is_active()).collect();

        // Fast metrics are gated on training: before the first successful
        // run there is nothing meaningful to aggregate and the UI reads a
        // null as "awaiting first training".
        self.calibrator.begin_dataset(&identity);
        let fast_metrics = if self.state.is_training_complete() {
            Some(compute_workforce_metrics(&active, &self.calibrator.thresholds()))
        } else {
            None
        };

        // The latency-hiding publish: a usable table now, reasoning later.
        let published = self.publish_if_current(
            &identity,
            generation,
            DashboardSnapshot {
                identity: Some(identity.clone()),
                records: active.clone(),
                metrics: fast_metrics.clone(),
                loading: false,
                enhancing: false,
                enhancement_progress: 0,
            },
        );
        self.state.set_last_identity(identity.clone());
        self.state.record_load(record.finish(LoadSource::Network));
        if !published {
            return;
        }

        let enriched_count = active.iter().filter(|r| r.has_reasoning_data).count();
        let skip_enrichment = active.is_empty()
            || enriched_count as f64 >= active.len() as f64 * ENRICHED_SKIP_RATIO;

        if skip_enrichment {
            log::debug!(
                "coordinator: {}/{} records already enriched, fast snapshot is final",
                enriched_count,
                active.len()
            );
            self.calibrator.observe(&active, &identity);
            self.cache.set(&identity.records_key(), &active, self.cache_ttl);
            self.cache.set(&identity.metrics_key(), &fast_metrics, self.cache_ttl);
            return;
        }

        self.state.update(|s| {
            s.enhancing = true;
            s.enhancement_progress = 0;
        });
        self.spawn_enrichment(identity, generation, active);
    }

    /// Run the enrichment pipeline on a background task and publish the
    /// final snapshot when it completes, unless a later load for the same
    /// identity superseded this one in the meantime.
    fn spawn_enrichment(
        &self,
        identity: DatasetIdentity,
        generation: u64,
        records: Vec<EmployeeRecord>,
    ) {
        let state = Arc::clone(&self.state);
        let cache = Arc::clone(&self.cache);
        let reasoning = Arc::clone(&self.reasoning);
        let calibrator = Arc::clone(&self.calibrator);
        let ttl = self.cache_ttl;

        tokio::spawn(async move {
            let progress_state = Arc::clone(&state);
            let progress_identity = identity.clone();
            let on_progress = move |pct: u8| {
                if progress_state.current_generation(&progress_identity) != generation {
                    return;
                }
                progress_state.update(|s| {
                    if s.enhancing && pct > s.enhancement_progress {
                        s.enhancement_progress = pct;
                    }
                });
            };

            let enriched = enrich_records(reasoning.as_ref(), records, on_progress).await;

            if state.current_generation(&identity) != generation {
                log::debug!(
                    "coordinator: enrichment for {} (generation {}) superseded, dropping",
                    identity,
                    generation
                );
                return;
            }

            calibrator.observe(&enriched, &identity);
            let metrics = compute_workforce_metrics(&enriched, &calibrator.thresholds());
            cache.set(&identity.records_key(), &enriched, ttl);
            cache.set(&identity.metrics_key(), &Some(metrics.clone()), ttl);
            state.publish(DashboardSnapshot {
                identity: Some(identity),
                records: enriched,
                metrics: Some(metrics),
                loading: false,
                enhancing: false,
                enhancement_progress: 100,
            });
        });
    }

    /// Explicit reset: drop the persisted entries for a dataset and, when it
    /// is the one on display, clear the snapshot too. The next load refetches.
    pub fn reset_dataset(&self, identity: &DatasetIdentity) {
        log::info!("coordinator: resetting cached data for {}", identity);
        self.cache.clear_dataset(identity);
        if self.state.snapshot().matches(identity) {
            self.state.publish(DashboardSnapshot::empty());
        }
    }

    fn publish_if_current(
        &self,
        identity: &DatasetIdentity,
        generation: u64,
        snapshot: DashboardSnapshot,
    ) -> bool {
        if self.state.current_generation(identity) != generation {
            log::debug!(
                "coordinator: load for {} (generation {}) superseded, dropping publish",
                identity,
                generation
            );
            return false;
        }
        self.state.publish(snapshot);
        true
    }

    /// React to training completions: every signal forces a cache-bypassing
    /// reload of the current dataset.
    pub fn spawn_refresh_listener(
        self: &Arc<Self>,
        mut rx: mpsc::Receiver<TrainingComplete>,
    ) -> tokio::task::JoinHandle<()> {
        let core = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                let last = core.state.last_identity();
                let project = last
                    .as_ref()
                    .map(|id| id.project_id.clone())
                    .or_else(|| core.default_project_id.clone());
                let Some(project) = project else {
                    log::warn!("coordinator: training complete but no project known, skipping refresh");
                    continue;
                };
                let dataset = signal.dataset_id.or(last.map(|id| id.dataset_id));

                log::info!("coordinator: training complete, forcing refresh");
                core.load_dataset(&project, dataset.as_deref(), true).await;
            }
        })
    }
}
