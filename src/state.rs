//! Shared dashboard state container.
//!
//! Holds the single canonical snapshot the UI consumes. The coordinator is
//! the only writer; consumers read the current value or subscribe to
//! publishes. The container also carries the per-identity generation counter
//! that makes superseding loads deterministic: an asynchronous completion
//! whose generation no longer matches the current one is discarded before it
//! can publish.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use crate::types::{DashboardSnapshot, DatasetIdentity, LoadRecord};

/// Maximum number of load records to keep in memory.
const MAX_LOAD_HISTORY: usize = 100;

pub struct DashboardState {
    snapshot: RwLock<DashboardSnapshot>,
    publish_tx: watch::Sender<DashboardSnapshot>,
    generations: Mutex<HashMap<DatasetIdentity, u64>>,
    training_complete: AtomicBool,
    last_identity: Mutex<Option<DatasetIdentity>>,
    load_history: Mutex<Vec<LoadRecord>>,
}

impl DashboardState {
    pub fn new() -> Self {
        let (publish_tx, _) = watch::channel(DashboardSnapshot::empty());
        Self {
            snapshot: RwLock::new(DashboardSnapshot::empty()),
            publish_tx,
            generations: Mutex::new(HashMap::new()),
            training_complete: AtomicBool::new(false),
            last_identity: Mutex::new(None),
            load_history: Mutex::new(Vec::new()),
        }
    }

    /// Current snapshot, cloned.
    pub fn snapshot(&self) -> DashboardSnapshot {
        self.snapshot.read().clone()
    }

    /// Observe every publish without polling. The receiver always starts at
    /// the latest published value.
    pub fn subscribe(&self) -> watch::Receiver<DashboardSnapshot> {
        self.publish_tx.subscribe()
    }

    /// Replace the snapshot wholesale and notify subscribers. The single
    /// publish point: partial fields from two loads never interleave.
    pub fn publish(&self, snapshot: DashboardSnapshot) {
        *self.snapshot.write() = snapshot.clone();
        self.publish_tx.send_replace(snapshot);
    }

    /// Mutate the snapshot in place and publish the result.
    pub fn update(&self, f: impl FnOnce(&mut DashboardSnapshot)) {
        let updated = {
            let mut guard = self.snapshot.write();
            f(&mut guard);
            guard.clone()
        };
        self.publish_tx.send_replace(updated);
    }

    /// Start a new load generation for an identity and return it. Later
    /// generations supersede earlier ones.
    pub fn begin_generation(&self, identity: &DatasetIdentity) -> u64 {
        let mut generations = self.generations.lock();
        let counter = generations.entry(identity.clone()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// The generation a completion must match to be allowed to publish.
    pub fn current_generation(&self, identity: &DatasetIdentity) -> u64 {
        self.generations
            .lock()
            .get(identity)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_training_complete(&self, complete: bool) {
        self.training_complete.store(complete, Ordering::Relaxed);
    }

    /// Whether the model-training job is known to have completed. Gates the
    /// fast-path metrics: before the first successful training there is
    /// nothing meaningful to aggregate.
    pub fn is_training_complete(&self) -> bool {
        self.training_complete.load(Ordering::Relaxed)
    }

    pub fn last_identity(&self) -> Option<DatasetIdentity> {
        self.last_identity.lock().clone()
    }

    pub fn set_last_identity(&self, identity: DatasetIdentity) {
        *self.last_identity.lock() = Some(identity);
    }

    /// Record a completed load, newest first, trimmed to the history cap.
    pub fn record_load(&self, record: LoadRecord) {
        let mut history = self.load_history.lock();
        history.insert(0, record);
        if history.len() > MAX_LOAD_HISTORY {
            history.truncate(MAX_LOAD_HISTORY);
        }
    }

    pub fn load_history(&self, limit: usize) -> Vec<LoadRecord> {
        self.load_history.lock().iter().take(limit).cloned().collect()
    }
}

impl Default for DashboardState {
    fn default() -> Self {
        Self::new()
    }
}
