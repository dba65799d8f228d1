//! Core data model for the dashboard data core.
//!
//! Closed record shapes at the collaborator boundary: unknown fields are
//! dropped and missing optionals default at deserialization, so nothing
//! loosely shaped flows past this module.

use serde::{Deserialize, Serialize};

// =============================================================================
// Dataset identity
// =============================================================================

/// The `(project_id, dataset_id)` pair that scopes caching, calibration, and
/// training-status correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetIdentity {
    pub project_id: String,
    pub dataset_id: String,
}

impl DatasetIdentity {
    pub fn new(project_id: impl Into<String>, dataset_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
        }
    }

    /// Cache key for the persisted record set.
    pub fn records_key(&self) -> String {
        format!("home_employees_{}_{}", self.project_id, self.dataset_id)
    }

    /// Cache key for the persisted metrics.
    pub fn metrics_key(&self) -> String {
        format!("home_metrics_{}_{}", self.project_id, self.dataset_id)
    }

    /// Cache key for the persisted threshold calibration. Calibration is
    /// scoped by dataset only; a dataset carries its distribution across
    /// projects.
    pub fn thresholds_key(&self) -> String {
        format!("thresholds_{}", self.dataset_id)
    }
}

impl std::fmt::Display for DatasetIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.project_id, self.dataset_id)
    }
}

// =============================================================================
// Employee records
// =============================================================================

/// Employment status as reported by the listing collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmployeeStatus {
    #[default]
    Active,
    Terminated,
    #[serde(other)]
    Unknown,
}

/// One employee row. Base fields come from the listing collaborator; the
/// reasoning fields are optional enrichment, either filled in later by the
/// enrichment pipeline or returned inline by the listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub tenure_years: Option<f64>,
    /// Raw model probability from the last training run.
    #[serde(default)]
    pub attrition_probability: Option<f64>,
    #[serde(default)]
    pub status: EmployeeStatus,
    /// Per-record reasoning risk, `[0, 1]`.
    #[serde(default)]
    pub reasoning_risk: Option<f64>,
    /// Confidence in the reasoning risk, `[0, 1]`.
    #[serde(default)]
    pub reasoning_confidence: Option<f64>,
    /// Whether the reasoning lookup succeeded for this identifier.
    #[serde(default)]
    pub has_reasoning_data: bool,
}

impl EmployeeRecord {
    /// The risk value every display and aggregation uses:
    /// `reasoning_risk ?? attrition_probability ?? 0`, with any non-finite
    /// probability coerced to `0.0`, never NaN.
    pub fn effective_risk(&self) -> f64 {
        finite_or_zero(
            self.reasoning_risk
                .or(self.attrition_probability)
                .unwrap_or(0.0),
        )
    }

    /// Termination-flagged records are excluded from the dashboard's default
    /// view but remain available to other consumers.
    pub fn is_active(&self) -> bool {
        self.status != EmployeeStatus::Terminated
    }
}

/// Coerce a probability to a finite value; NaN and infinities become `0.0`.
pub fn finite_or_zero(p: f64) -> f64 {
    if p.is_finite() {
        p
    } else {
        0.0
    }
}

/// One row from the batched reasoning lookup. Absent employee ids are simply
/// not represented in the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningResult {
    pub employee_id: String,
    #[serde(default)]
    pub risk: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

// =============================================================================
// Training status
// =============================================================================

/// Training job lifecycle. `Complete` and `Error` are terminal; polling
/// ceases on reaching either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingPhase {
    Idle,
    Queued,
    InProgress,
    Complete,
    Error,
}

impl TrainingPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TrainingPhase::Complete | TrainingPhase::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingStatus {
    pub status: TrainingPhase,
    #[serde(default)]
    pub progress_pct: u8,
    #[serde(default)]
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TrainingStatus {
    /// The "job never run" status a 404 from the collaborator maps to.
    pub fn idle() -> Self {
        Self {
            status: TrainingPhase::Idle,
            progress_pct: 0,
            dataset_id: None,
            message: None,
            error: None,
        }
    }

    /// Optimistic status seeded when a training trigger is issued, so the UI
    /// shows progress before the first poll round-trip completes.
    pub fn queued(dataset_id: Option<String>) -> Self {
        Self {
            status: TrainingPhase::Queued,
            progress_pct: 0,
            dataset_id,
            message: Some("Training queued".to_string()),
            error: None,
        }
    }
}

// =============================================================================
// Risk thresholds & metrics
// =============================================================================

/// Decision cut points for risk banding. Invariant:
/// `0 <= medium_risk < high_risk <= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskThresholds {
    pub high_risk: f64,
    pub medium_risk: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            high_risk: 0.7,
            medium_risk: 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskBand {
    High,
    Medium,
    Low,
}

impl RiskThresholds {
    pub fn classify(&self, risk: f64) -> RiskBand {
        if risk >= self.high_risk {
            RiskBand::High
        } else if risk >= self.medium_risk {
            RiskBand::Medium
        } else {
            RiskBand::Low
        }
    }
}

/// Aggregate metrics over the loaded population. Computed by the
/// coordinator; the UI never aggregates on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkforceMetrics {
    pub total: usize,
    pub high_risk: usize,
    pub medium_risk: usize,
    pub low_risk: usize,
    pub average_risk: f64,
}

/// Compute metrics from a record set against the given thresholds.
pub fn compute_workforce_metrics(
    records: &[EmployeeRecord],
    thresholds: &RiskThresholds,
) -> WorkforceMetrics {
    let mut high = 0usize;
    let mut medium = 0usize;
    let mut low = 0usize;
    let mut sum = 0.0f64;

    for record in records {
        let risk = record.effective_risk();
        sum += risk;
        match thresholds.classify(risk) {
            RiskBand::High => high += 1,
            RiskBand::Medium => medium += 1,
            RiskBand::Low => low += 1,
        }
    }

    let average = if records.is_empty() {
        0.0
    } else {
        sum / records.len() as f64
    };

    WorkforceMetrics {
        total: records.len(),
        high_risk: high,
        medium_risk: medium,
        low_risk: low,
        average_risk: average,
    }
}

// =============================================================================
// Dashboard snapshot
// =============================================================================

/// The single externally observable object the coordinator publishes.
///
/// `enhancing` / `enhancement_progress` carry the enrichment run state:
/// reset to `(false, 0)` when a run starts, monotone non-decreasing while it
/// runs, forced to `(false, 100)` on terminal success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub identity: Option<DatasetIdentity>,
    pub records: Vec<EmployeeRecord>,
    pub metrics: Option<WorkforceMetrics>,
    pub loading: bool,
    pub enhancing: bool,
    pub enhancement_progress: u8,
}

impl DashboardSnapshot {
    pub fn empty() -> Self {
        Self {
            identity: None,
            records: Vec::new(),
            metrics: None,
            loading: false,
            enhancing: false,
            enhancement_progress: 0,
        }
    }

    pub fn matches(&self, identity: &DatasetIdentity) -> bool {
        self.identity.as_ref() == Some(identity)
    }
}

// =============================================================================
// Load audit records
// =============================================================================

/// Where a completed load got its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadSource {
    /// In-memory snapshot already matched the identity; no I/O.
    ShortCircuit,
    /// Both records and metrics came from the persistent cache.
    Cache,
    /// Fetched from the listing collaborator.
    Network,
    /// Listing returned nothing (or failed); empty snapshot published.
    NetworkEmpty,
    /// No dataset id resolvable; snapshot cleared.
    NoDataset,
}

/// One coordinator load, kept in a bounded in-memory history for diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRecord {
    pub id: String,
    pub identity: Option<DatasetIdentity>,
    pub force_refresh: bool,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub source: Option<LoadSource>,
}

impl LoadRecord {
    pub fn begin(identity: Option<DatasetIdentity>, force_refresh: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            identity,
            force_refresh,
            started_at: chrono::Utc::now(),
            finished_at: None,
            source: None,
        }
    }

    pub fn finish(mut self, source: LoadSource) -> Self {
        self.finished_at = Some(chrono::Utc::now());
        self.source = Some(source);
        self
    }
}
