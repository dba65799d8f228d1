//! Progressive enrichment pipeline.
//!
//! Fills in per-record reasoning risk for a base record set. Small sets go
//! through a single batched lookup; larger sets are partitioned into batches
//! of 50 processed strictly sequentially, with a cooperative yield after
//! every 5th batch so the pipeline never monopolizes the executor. A failed
//! batch falls back to base data for its own records while every other batch
//! proceeds; a single batch failure never aborts the run.
//!
//! The pipeline is a pure function from input records to enriched output
//! plus a progress callback. It never touches the cache or the published
//! snapshot; the coordinator owns publishing.

use std::collections::HashMap;

use crate::api::ReasoningProvider;
use crate::types::{finite_or_zero, EmployeeRecord, ReasoningResult};

/// Identifiers per reasoning lookup call.
pub const ENRICHMENT_BATCH_SIZE: usize = 50;

/// Yield to the executor after this many consecutive batches.
const YIELD_EVERY_BATCHES: usize = 5;

/// Progress reserved for setup before the first batch completes.
const PROGRESS_FLOOR: f64 = 5.0;

/// Forwards progress reports, enforcing monotone non-decreasing values and
/// a final `100`.
struct ProgressReporter<F: FnMut(u8)> {
    callback: F,
    last: u8,
}

impl<F: FnMut(u8)> ProgressReporter<F> {
    fn new(callback: F) -> Self {
        Self { callback, last: 0 }
    }

    fn report(&mut self, pct: u8) {
        let pct = pct.min(100).max(self.last);
        self.last = pct;
        (self.callback)(pct);
    }
}

/// Enrich a record set with reasoning risk, reporting progress along the way.
///
/// Never returns an error: any lookup failure degrades the affected records
/// to base data with `has_reasoning_data = false`, and the final progress
/// report is always `100`.
pub async fn enrich_records<F>(
    api: &dyn ReasoningProvider,
    records: Vec<EmployeeRecord>,
    on_progress: F,
) -> Vec<EmployeeRecord>
where
    F: FnMut(u8) + Send,
{
    let mut progress = ProgressReporter::new(on_progress);

    if records.is_empty() {
        progress.report(100);
        return records;
    }

    if records.len() <= ENRICHMENT_BATCH_SIZE {
        return enrich_single_batch(api, records, &mut progress).await;
    }

    enrich_batched(api, records, &mut progress).await
}

/// Small-set path: one lookup for all identifiers, progress 10 → 80 → 100.
async fn enrich_single_batch<F: FnMut(u8)>(
    api: &dyn ReasoningProvider,
    mut records: Vec<EmployeeRecord>,
    progress: &mut ProgressReporter<F>,
) -> Vec<EmployeeRecord> {
    progress.report(10);

    let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
    match api.batch_lookup_reasoning(&ids).await {
        Ok(results) => {
            progress.report(80);
            let by_id = index_results(results);
            for record in &mut records {
                merge_result(record, by_id.get(&record.id));
            }
        }
        Err(e) => {
            log::warn!("enrichment: lookup failed for {} records: {}", records.len(), e);
            for record in &mut records {
                record.has_reasoning_data = false;
            }
        }
    }

    progress.report(100);
    records
}

/// Large-set path: sequential batches of `ENRICHMENT_BATCH_SIZE`, progress
/// after batch 1, every 2nd batch thereafter, and the final batch.
async fn enrich_batched<F: FnMut(u8)>(
    api: &dyn ReasoningProvider,
    mut records: Vec<EmployeeRecord>,
    progress: &mut ProgressReporter<F>,
) -> Vec<EmployeeRecord> {
    let total_batches = records.len().div_ceil(ENRICHMENT_BATCH_SIZE);
    let mut failed_batches = 0usize;

    for (batch_idx, chunk) in records.chunks_mut(ENRICHMENT_BATCH_SIZE).enumerate() {
        let ids: Vec<String> = chunk.iter().map(|r| r.id.clone()).collect();

        match api.batch_lookup_reasoning(&ids).await {
            Ok(results) => {
                let by_id = index_results(results);
                for record in chunk.iter_mut() {
                    merge_result(record, by_id.get(&record.id));
                }
            }
            Err(e) => {
                // This batch falls back to base data; the run continues.
                failed_batches += 1;
                log::warn!(
                    "enrichment: batch {}/{} failed ({} records): {}",
                    batch_idx + 1,
                    total_batches,
                    chunk.len(),
                    e
                );
                for record in chunk.iter_mut() {
                    record.has_reasoning_data = false;
                }
            }
        }

        let completed = batch_idx + 1;
        if completed == total_batches {
            progress.report(100);
        } else if completed == 1 || completed % 2 == 0 {
            let pct = PROGRESS_FLOOR + (completed as f64 / total_batches as f64) * 90.0;
            progress.report(pct as u8);
        }

        // Keep the executor responsive during long runs.
        if completed % YIELD_EVERY_BATCHES == 0 && completed < total_batches {
            tokio::task::yield_now().await;
        }
    }

    if failed_batches > 0 {
        log::info!(
            "enrichment: completed with {}/{} batches degraded to base data",
            failed_batches,
            total_batches
        );
    }
    records
}

fn index_results(results: Vec<ReasoningResult>) -> HashMap<String, ReasoningResult> {
    results
        .into_iter()
        .map(|r| (r.employee_id.clone(), r))
        .collect()
}

/// Merge one lookup result into a record.
///
/// `reasoning_risk` resolves as lookup value ?? existing value; a result
/// present for the identifier marks `has_reasoning_data` true, an absent
/// identifier marks it false. Non-finite lookup values are coerced to zero
/// so they can never poison aggregation.
fn merge_result(record: &mut EmployeeRecord, result: Option<&ReasoningResult>) {
    match result {
        Some(result) => {
            record.reasoning_risk = result
                .risk
                .map(finite_or_zero)
                .or(record.reasoning_risk);
            record.reasoning_confidence = result
                .confidence
                .map(finite_or_zero)
                .or(record.reasoning_confidence);
            record.has_reasoning_data = true;
        }
        None => {
            record.has_reasoning_data = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Fake provider: returns risk `0.6` for every id, failing the batches
    /// whose 1-based index is listed in `fail_batches`.
    struct FakeReasoning {
        calls: Mutex<usize>,
        fail_batches: Vec<usize>,
    }

    impl FakeReasoning {
        fn new(fail_batches: Vec<usize>) -> Self {
            Self {
                calls: Mutex::new(0),
                fail_batches,
            }
        }
    }

    #[async_trait]
    impl ReasoningProvider for FakeReasoning {
        async fn batch_lookup_reasoning(
            &self,
            employee_ids: &[String],
        ) -> Result<Vec<ReasoningResult>, ApiError> {
            let call = {
                let mut calls = self.calls.lock();
                *calls += 1;
                *calls
            };
            if self.fail_batches.contains(&call) {
                return Err(ApiError::Status {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            Ok(employee_ids
                .iter()
                .map(|id| ReasoningResult {
                    employee_id: id.clone(),
                    risk: Some(0.6),
                    confidence: Some(0.9),
                })
                .collect())
        }
    }

    fn base_records(n: usize) -> Vec<EmployeeRecord> {
        (0..n)
            .map(|i| EmployeeRecord {
                id: format!("emp-{}", i),
                name: format!("Employee {}", i),
                department: None,
                position: None,
                tenure_years: None,
                attrition_probability: Some(0.2),
                status: Default::default(),
                reasoning_risk: None,
                reasoning_confidence: None,
                has_reasoning_data: false,
            })
            .collect()
    }

    fn collect_progress() -> (Arc<Mutex<Vec<u8>>>, impl FnMut(u8) + Send) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |pct| sink.lock().push(pct))
    }

    #[tokio::test]
    async fn test_small_set_progress_sequence() {
        let api = FakeReasoning::new(vec![]);
        let (seen, on_progress) = collect_progress();

        let enriched = enrich_records(&api, base_records(10), on_progress).await;

        assert_eq!(*seen.lock(), vec![10, 80, 100]);
        assert!(enriched.iter().all(|r| r.has_reasoning_data));
        assert!(enriched.iter().all(|r| r.reasoning_risk == Some(0.6)));
    }

    #[tokio::test]
    async fn test_small_set_failure_falls_back_to_base() {
        let api = FakeReasoning::new(vec![1]);
        let (seen, on_progress) = collect_progress();

        let enriched = enrich_records(&api, base_records(10), on_progress).await;

        assert_eq!(seen.lock().last(), Some(&100));
        assert!(enriched.iter().all(|r| !r.has_reasoning_data));
        assert!(enriched.iter().all(|r| r.effective_risk() == 0.2));
    }

    #[tokio::test]
    async fn test_batched_run_three_batches() {
        let api = FakeReasoning::new(vec![]);
        let (seen, on_progress) = collect_progress();

        let enriched = enrich_records(&api, base_records(120), on_progress).await;

        // 120 records → batches of 50/50/20.
        assert_eq!(*api.calls.lock(), 3);
        assert!(enriched.iter().all(|r| r.has_reasoning_data));
        // Reported after batch 1, batch 2, and the final batch.
        assert_eq!(seen.lock().len(), 3);
        assert_eq!(seen.lock().last(), Some(&100));
    }

    #[tokio::test]
    async fn test_progress_monotone_and_ends_at_100() {
        let api = FakeReasoning::new(vec![2, 5]);
        let (seen, on_progress) = collect_progress();

        enrich_records(&api, base_records(420), on_progress).await;

        let seen = seen.lock();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last(), Some(&100));
    }

    #[tokio::test]
    async fn test_batch_isolation() {
        // Batch 2 of 3 fails; batches 1 and 3 still enrich.
        let api = FakeReasoning::new(vec![2]);
        let (_, on_progress) = collect_progress();

        let enriched = enrich_records(&api, base_records(120), on_progress).await;

        let (ok, degraded): (Vec<_>, Vec<_>) =
            enriched.iter().partition(|r| r.has_reasoning_data);
        assert_eq!(ok.len(), 70);
        assert_eq!(degraded.len(), 50);
        // The degraded batch is exactly records 50..100.
        assert!(degraded.iter().all(|r| {
            let idx: usize = r.id.trim_start_matches("emp-").parse().unwrap();
            (50..100).contains(&idx)
        }));
        assert!(degraded.iter().all(|r| r.effective_risk() == 0.2));
    }

    #[tokio::test]
    async fn test_enrichment_is_idempotent() {
        let api = FakeReasoning::new(vec![]);
        let (_, on_progress) = collect_progress();
        let first = enrich_records(&api, base_records(120), on_progress).await;

        let api = FakeReasoning::new(vec![]);
        let (_, on_progress) = collect_progress();
        let second = enrich_records(&api, first.clone(), on_progress).await;

        let risks_a: Vec<f64> = first.iter().map(|r| r.effective_risk()).collect();
        let risks_b: Vec<f64> = second.iter().map(|r| r.effective_risk()).collect();
        assert_eq!(risks_a, risks_b);
    }

    #[tokio::test]
    async fn test_absent_ids_not_marked_enriched() {
        struct PartialReasoning;

        #[async_trait]
        impl ReasoningProvider for PartialReasoning {
            async fn batch_lookup_reasoning(
                &self,
                employee_ids: &[String],
            ) -> Result<Vec<ReasoningResult>, ApiError> {
                // Only the first id of each batch is represented.
                Ok(employee_ids
                    .iter()
                    .take(1)
                    .map(|id| ReasoningResult {
                        employee_id: id.clone(),
                        risk: Some(0.5),
                        confidence: None,
                    })
                    .collect())
            }
        }

        let (_, on_progress) = collect_progress();
        let enriched = enrich_records(&PartialReasoning, base_records(3), on_progress).await;

        assert!(enriched[0].has_reasoning_data);
        assert!(!enriched[1].has_reasoning_data);
        assert!(!enriched[2].has_reasoning_data);
    }

    #[tokio::test]
    async fn test_non_finite_lookup_risk_coerced() {
        struct NanReasoning;

        #[async_trait]
        impl ReasoningProvider for NanReasoning {
            async fn batch_lookup_reasoning(
                &self,
                employee_ids: &[String],
            ) -> Result<Vec<ReasoningResult>, ApiError> {
                Ok(employee_ids
                    .iter()
                    .map(|id| ReasoningResult {
                        employee_id: id.clone(),
                        risk: Some(f64::NAN),
                        confidence: None,
                    })
                    .collect())
            }
        }

        let (_, on_progress) = collect_progress();
        let enriched = enrich_records(&NanReasoning, base_records(2), on_progress).await;

        assert!(enriched.iter().all(|r| r.effective_risk() == 0.0));
        assert!(enriched.iter().all(|r| r.has_reasoning_data));
    }
}
