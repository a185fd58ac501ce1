//! Query tracking and N+1 detection.
//!
//! `QueryTracker` wraps any [`Database`] and counts what goes through it.
//! Reading a relation record by record instead of eager loading it shows up
//! as the same statement text run over and over; once a statement reaches
//! the threshold a warning is logged.
//!
//! ```ignore
//! let db = Arc::new(QueryTracker::new(inner).with_threshold(5));
//! let orm = Orm::new(catalog, db.clone());
//!
//! for player in orm.list("Player")?.iter()? {
//!     orm.component(&player, "Team")?; // warns after five players
//! }
//!
//! // the fix:
//! for player in orm.list("Player")?.eager_load(&["Team"])?.iter()? { ... }
//! ```

use sqlentity_core::{Database, Dialect, Result, Row, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Statistics about tracked statements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryStats {
    /// Statements run, queries and writes alike.
    pub total: usize,
    /// Distinct statement texts.
    pub distinct: usize,
    /// Statement texts that reached the threshold.
    pub potential_n1: usize,
}

/// Counting [`Database`] wrapper.
pub struct QueryTracker {
    inner: Arc<dyn Database>,
    /// statement text -> times run
    counts: Mutex<HashMap<String, usize>>,
    log: Mutex<Vec<String>>,
    total: AtomicUsize,
    threshold: usize,
    enabled: AtomicBool,
}

impl std::fmt::Debug for QueryTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryTracker")
            .field("total", &self.total.load(Ordering::Relaxed))
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl QueryTracker {
    /// Track `inner` with the default threshold (3).
    pub fn new(inner: Arc<dyn Database>) -> Self {
        Self {
            inner,
            counts: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            total: AtomicUsize::new(0),
            threshold: 3,
            enabled: AtomicBool::new(true),
        }
    }

    /// Set the number of runs of one statement that triggers a warning.
    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Stop counting. Statements still run.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    fn record(&self, sql: &str) {
        if !self.is_enabled() {
            return;
        }
        self.total.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut log) = self.log.lock() {
            log.push(sql.to_string());
        }
        let count = match self.counts.lock() {
            Ok(mut counts) => {
                let count = counts.entry(sql.to_string()).or_insert(0);
                *count += 1;
                *count
            }
            Err(_) => return,
        };
        if count == self.threshold {
            tracing::warn!(
                target: "sqlentity::n1",
                statement = %sql,
                runs = count,
                threshold = self.threshold,
                "N+1 query pattern detected; consider eager_load() for this relation"
            );
        }
    }

    /// Statements run since the last reset.
    pub fn query_count(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    /// Statement texts in the order they ran.
    pub fn statements(&self) -> Vec<String> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Times one statement text ran.
    pub fn count_for(&self, sql: &str) -> usize {
        self.counts
            .lock()
            .map(|counts| counts.get(sql).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn stats(&self) -> QueryStats {
        let (distinct, potential_n1) = self
            .counts
            .lock()
            .map(|counts| {
                (
                    counts.len(),
                    counts.values().filter(|c| **c >= self.threshold).count(),
                )
            })
            .unwrap_or_default();
        QueryStats {
            total: self.query_count(),
            distinct,
            potential_n1,
        }
    }

    /// Forget everything counted so far.
    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        if let Ok(mut counts) = self.counts.lock() {
            counts.clear();
        }
        if let Ok(mut log) = self.log.lock() {
            log.clear();
        }
    }
}

impl Database for QueryTracker {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.record(sql);
        self.inner.query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.record(sql);
        self.inner.execute(sql, params)
    }

    fn last_insert_id(&self, table: &str) -> Result<i64> {
        self.inner.last_insert_id(table)
    }

    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }
}
