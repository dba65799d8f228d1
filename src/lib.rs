//! Data cache & progressive-enrichment core for the churn-risk dashboard.
//!
//! The dashboard shows per-employee churn-risk predictions over large
//! tables and drives an asynchronous model-training workflow. This crate is
//! the subsystem behind that: it decides whether to serve stale-but-fast
//! cached data or refetch, streams a two-phase load (cheap base records
//! first, per-record reasoning enrichment applied in bounded batches
//! afterwards), tracks the out-of-band training job, and calibrates the
//! risk-band cut points from the loaded population.
//!
//! Wiring, sketched:
//!
//! ```no_run
//! use std::sync::Arc;
//! use churnboard::api::HttpDashboardApi;
//! use churnboard::cache::DiskCache;
//! use churnboard::config;
//! use churnboard::coordinator::DashboardCore;
//! use churnboard::state::DashboardState;
//! use churnboard::training::TrainingMonitor;
//!
//! # async fn wire() -> Result<(), String> {
//! let config = config::load_config()?;
//! let cache = DiskCache::open(config.cache_dir()?, &config.cache)
//!     .map_err(|e| e.to_string())?;
//! let api = Arc::new(HttpDashboardApi::new(config.api_base_url.clone()));
//! let state = Arc::new(DashboardState::new());
//!
//! let core = Arc::new(DashboardCore::new(
//!     Arc::clone(&state),
//!     cache,
//!     api.clone(),
//!     api.clone(),
//!     &config,
//! ));
//! let (monitor, completions) = TrainingMonitor::new(api, core.state());
//! let _listener = core.spawn_refresh_listener(completions);
//! monitor.start(config.training_poll_interval());
//!
//! core.load_dataset("acme", Some("q3-2025"), false).await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod cache;
pub mod calibration;
pub mod config;
pub mod coordinator;
pub mod enrichment;
pub mod error;
pub mod state;
pub mod training;
pub mod types;
pub mod util;

pub use api::{EmployeeDirectory, HttpDashboardApi, ReasoningProvider, TrainingStatusApi};
pub use cache::DiskCache;
pub use calibration::ThresholdCalibrator;
pub use config::CoreConfig;
pub use coordinator::DashboardCore;
pub use error::{ApiError, CacheError};
pub use state::DashboardState;
pub use training::{TrainingComplete, TrainingMonitor};
pub use types::{
    DashboardSnapshot, DatasetIdentity, EmployeeRecord, RiskThresholds, TrainingPhase,
    TrainingStatus, WorkforceMetrics,
};
