use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use hive_domain::{ErrorCategory, ErrorRecord};
use tokio::sync::watch;
use tracing::{error, warn};

/// Ceiling applied to categories the configuration says nothing about.
const DEFAULT_THRESHOLD: usize = 25;

struct Inner {
    records: HashMap<ErrorCategory, Vec<ErrorRecord>>,
    thresholds: HashMap<ErrorCategory, usize>,
    tripped: HashSet<ErrorCategory>,
    fatal: bool,
}

/// Collects categorized failures across a node's lifetime and flips a
/// fatal flag once any category reaches its threshold.
///
/// `record` never fails and is safe from any context; increment and
/// check happen under one lock. The fatal signal is edge-triggered:
/// it fires once, on the first category to trip, and later records
/// are still appended for diagnostics without re-signaling.
pub struct ErrorAggregator {
    inner: Mutex<Inner>,
    fatal_tx: watch::Sender<bool>,
}

impl ErrorAggregator {
    /// Thresholds are fixed here; there is no runtime mutation.
    pub fn new(thresholds: HashMap<ErrorCategory, usize>) -> Self {
        let (fatal_tx, _) = watch::channel(false);
        Self {
            inner: Mutex::new(Inner {
                records: HashMap::new(),
                thresholds,
                tripped: HashSet::new(),
                fatal: false,
            }),
            fatal_tx,
        }
    }

    pub fn record<S: Into<String>>(&self, category: ErrorCategory, message: S) {
        let record = ErrorRecord::new(category, message);
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        warn!(category = %category, "error recorded: {}", record.message);
        let threshold = inner
            .thresholds
            .get(&category)
            .copied()
            .unwrap_or(DEFAULT_THRESHOLD);
        let records = inner.records.entry(category).or_default();
        records.push(record);
        let count = records.len();

        if count >= threshold && !inner.tripped.contains(&category) {
            inner.tripped.insert(category);
            if !inner.fatal {
                inner.fatal = true;
                error!(
                    category = %category,
                    count, threshold,
                    "error threshold reached, signaling fatal shutdown"
                );
                let _ = self.fatal_tx.send(true);
            } else {
                error!(
                    category = %category,
                    count, threshold,
                    "error threshold reached while already fatal"
                );
            }
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fatal
    }

    /// Receiver that observes the single false -> true edge.
    pub fn fatal_watch(&self) -> watch::Receiver<bool> {
        self.fatal_tx.subscribe()
    }

    pub fn count(&self, category: ErrorCategory) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .get(&category)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn records(&self, category: ErrorCategory) -> Vec<ErrorRecord> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .get(&category)
            .cloned()
            .unwrap_or_default()
    }

    pub fn tripped_categories(&self) -> Vec<ErrorCategory> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        ErrorCategory::ALL
            .into_iter()
            .filter(|c| inner.tripped.contains(c))
            .collect()
    }

    /// Total records across every category.
    pub fn total(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.records.values().map(Vec::len).sum()
    }
}
