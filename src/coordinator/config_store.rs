//! Versioned in-memory store for the cluster configuration
//!
//! The current snapshot lives behind an `Arc` inside a `watch` channel:
//! readers clone the `Arc` and never wait for validation work, writers are
//! serialised on the commit lock and publish with a single pointer swap.

use crate::common::{ClusterConfig, ConfigError};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;

/// Notified synchronously after every successful commit, in version order.
///
/// Implementations must not call back into [`ConfigStore::commit`].
pub trait ConfigObserver: Send + Sync {
    fn on_commit(&self, config: &ClusterConfig);
}

struct WriterState {
    history: VecDeque<Arc<ClusterConfig>>,
    observers: Vec<Arc<dyn ConfigObserver>>,
}

pub struct ConfigStore {
    current: watch::Sender<Arc<ClusterConfig>>,
    writer: Mutex<WriterState>,
    history_limit: usize,
}

impl ConfigStore {
    pub fn new(initial: ClusterConfig, history_limit: usize) -> Self {
        let initial = Arc::new(initial);
        let (current, _) = watch::channel(initial.clone());
        let mut history = VecDeque::with_capacity(history_limit.max(1));
        history.push_back(initial);
        Self {
            current,
            writer: Mutex::new(WriterState {
                history,
                observers: Vec::new(),
            }),
            history_limit: history_limit.max(1),
        }
    }

    /// Latest committed snapshot
    pub fn current_config(&self) -> Arc<ClusterConfig> {
        self.current.borrow().clone()
    }

    pub fn current_version(&self) -> u64 {
        self.current.borrow().version
    }

    /// Commit `candidate` as the next version.
    ///
    /// The candidate must carry exactly `current + 1` and satisfy the
    /// shard-map invariant; nothing is published otherwise.
    pub fn commit(&self, mut candidate: ClusterConfig) -> Result<Arc<ClusterConfig>, ConfigError> {
        let mut writer = self.writer.lock();

        let expected = self.current_version() + 1;
        if candidate.version != expected {
            return Err(ConfigError::VersionConflict {
                expected,
                found: candidate.version,
            });
        }
        candidate.validate_shard_map()?;

        candidate.committed_at = Utc::now();
        let committed = Arc::new(candidate);
        self.current.send_replace(committed.clone());

        writer.history.push_back(committed.clone());
        while writer.history.len() > self.history_limit {
            writer.history.pop_front();
        }

        tracing::info!(
            version = committed.version,
            nodes = committed.nodes.len(),
            shards = committed.shard_map.len(),
            "Committed cluster config"
        );

        for observer in &writer.observers {
            observer.on_commit(&committed);
        }

        Ok(committed)
    }

    /// Receiver that wakes on every commit
    pub fn subscribe(&self) -> watch::Receiver<Arc<ClusterConfig>> {
        self.current.subscribe()
    }

    pub fn add_observer(&self, observer: Arc<dyn ConfigObserver>) {
        self.writer.lock().observers.push(observer);
    }

    /// A retained snapshot by version, if it has not aged out
    pub fn config_at(&self, version: u64) -> Option<Arc<ClusterConfig>> {
        self.writer
            .lock()
            .history
            .iter()
            .find(|c| c.version == version)
            .cloned()
    }

    /// Oldest version still retained
    pub fn oldest_retained(&self) -> u64 {
        self.writer
            .lock()
            .history
            .front()
            .map(|c| c.version)
            .unwrap_or_else(|| self.current_version())
    }
}
