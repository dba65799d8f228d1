//! Risk threshold calibration.
//!
//! Derives the high/medium risk cut points from the observed probability
//! distribution of the loaded population, at most once per dataset
//! identity. A persisted calibration is loaded and applied, never
//! recomputed; a dataset change resets to system defaults until the new
//! dataset's own sample accrues.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::cache::DiskCache;
use crate::types::{DatasetIdentity, EmployeeRecord, RiskThresholds};

/// Minimum population before calibrating; below this the defaults hold.
pub const MIN_CALIBRATION_SAMPLE: usize = 20;

/// The value at this percentile becomes the high-risk cut.
const HIGH_PERCENTILE: f64 = 80.0;
/// The value at this percentile becomes the medium-risk cut.
const MEDIUM_PERCENTILE: f64 = 50.0;

const HIGH_RISK_MIN: f64 = 0.5;
const HIGH_RISK_MAX: f64 = 0.9;
const MEDIUM_RISK_MIN: f64 = 0.2;
const MEDIUM_RISK_MAX: f64 = 0.6;

/// Persisted calibrations don't expire on their own; the dataset change is
/// the invalidation. One year stands in for "forever".
const THRESHOLD_TTL: Duration = Duration::from_secs(365 * 24 * 3600);

struct CalibratorInner {
    dataset_id: Option<String>,
    calibrated: bool,
    thresholds: RiskThresholds,
}

pub struct ThresholdCalibrator {
    cache: Arc<DiskCache>,
    inner: Mutex<CalibratorInner>,
}

impl ThresholdCalibrator {
    pub fn new(cache: Arc<DiskCache>) -> Self {
        Self {
            cache,
            inner: Mutex::new(CalibratorInner {
                dataset_id: None,
                calibrated: false,
                thresholds: RiskThresholds::default(),
            }),
        }
    }

    /// Current cut points: defaults until a calibration applies.
    pub fn thresholds(&self) -> RiskThresholds {
        self.inner.lock().thresholds
    }

    /// Point the calibrator at a dataset. A change resets to defaults, then
    /// a persisted calibration for the new identity is loaded if one exists,
    /// in which case this identity is done calibrating for good.
    pub fn begin_dataset(&self, identity: &DatasetIdentity) {
        let mut inner = self.inner.lock();
        if inner.dataset_id.as_deref() == Some(identity.dataset_id.as_str()) {
            return;
        }

        inner.dataset_id = Some(identity.dataset_id.clone());
        inner.calibrated = false;
        inner.thresholds = RiskThresholds::default();

        if let Some(persisted) = self.cache.get::<RiskThresholds>(&identity.thresholds_key()) {
            log::debug!(
                "calibration: loaded persisted thresholds for '{}' (high {:.2}, medium {:.2})",
                identity.dataset_id,
                persisted.high_risk,
                persisted.medium_risk
            );
            inner.thresholds = persisted;
            inner.calibrated = true;
        }
    }

    /// Feed the loaded population to the calibrator. Returns the freshly
    /// computed thresholds if this call performed the one-shot calibration,
    /// `None` when already calibrated or the sample is still too small.
    pub fn observe(
        &self,
        records: &[EmployeeRecord],
        identity: &DatasetIdentity,
    ) -> Option<RiskThresholds> {
        self.begin_dataset(identity);

        let mut inner = self.inner.lock();
        if inner.calibrated {
            return None;
        }
        if records.len() < MIN_CALIBRATION_SAMPLE {
            log::debug!(
                "calibration: sample too small for '{}' ({} < {})",
                identity.dataset_id,
                records.len(),
                MIN_CALIBRATION_SAMPLE
            );
            return None;
        }

        let mut risks: Vec<f64> = records.iter().map(|r| r.effective_risk()).collect();
        risks.sort_unstable_by(f64::total_cmp);

        let high = percentile(&risks, HIGH_PERCENTILE)
            .unwrap_or(RiskThresholds::default().high_risk)
            .clamp(HIGH_RISK_MIN, HIGH_RISK_MAX);
        let medium = percentile(&risks, MEDIUM_PERCENTILE)
            .unwrap_or(RiskThresholds::default().medium_risk)
            .clamp(MEDIUM_RISK_MIN, MEDIUM_RISK_MAX)
            // Keep the band ordering invariant when both clamps collide.
            .min(high - 0.05);

        let thresholds = RiskThresholds {
            high_risk: high,
            medium_risk: medium,
        };

        inner.thresholds = thresholds;
        inner.calibrated = true;
        drop(inner);

        log::info!(
            "calibration: dataset '{}' calibrated over {} records (high {:.2}, medium {:.2})",
            identity.dataset_id,
            records.len(),
            thresholds.high_risk,
            thresholds.medium_risk
        );
        self.cache
            .set(&identity.thresholds_key(), &thresholds, THRESHOLD_TTL);

        Some(thresholds)
    }

    /// Drop the persisted calibration and allow a fresh one: the explicit
    /// user-forced path; automatic loads never take it.
    pub fn force_recalibration(&self, identity: &DatasetIdentity) {
        self.cache.remove(&identity.thresholds_key());
        let mut inner = self.inner.lock();
        if inner.dataset_id.as_deref() == Some(identity.dataset_id.as_str()) {
            inner.calibrated = false;
            inner.thresholds = RiskThresholds::default();
        }
    }
}

/// Value at percentile `p` of an ascending-sorted slice (nearest-rank).
fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len();
    let rank = ((p / 100.0) * n as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(n - 1);
    Some(sorted[idx])
}
