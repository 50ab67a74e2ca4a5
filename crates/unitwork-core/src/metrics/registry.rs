//! Central metrics registry.
//!
//! Counts transaction outcomes and what the pre-commit publisher delivered,
//! and renders them in Prometheus text format.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use unitwork_proto::ChangeSummary;

use super::histogram::Histogram;

/// Transaction outcome for metrics tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Changes and listener side effects were committed.
    Committed,
    /// The transaction was rolled back, explicitly or after a failure.
    RolledBack,
}

/// Registry for tracking-pipeline metrics.
#[derive(Debug)]
pub struct MetricsRegistry {
    started_at: Instant,

    transactions_begun: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_rolled_back: AtomicU64,

    change_sets_published: AtomicU64,
    entities_created: AtomicU64,
    entities_updated: AtomicU64,
    entities_deleted: AtomicU64,
    property_changes: AtomicU64,
    collection_faults: AtomicU64,

    publish_failures: AtomicU64,
    publish_latency: Histogram,
    listener_invocations: RwLock<BTreeMap<String, AtomicU64>>,
}

impl MetricsRegistry {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            transactions_begun: AtomicU64::new(0),
            transactions_committed: AtomicU64::new(0),
            transactions_rolled_back: AtomicU64::new(0),
            change_sets_published: AtomicU64::new(0),
            entities_created: AtomicU64::new(0),
            entities_updated: AtomicU64::new(0),
            entities_deleted: AtomicU64::new(0),
            property_changes: AtomicU64::new(0),
            collection_faults: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            publish_latency: Histogram::latency(),
            listener_invocations: RwLock::new(BTreeMap::new()),
        }
    }

    /// Record a transaction start.
    pub fn record_begin(&self) {
        self.transactions_begun.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how a transaction ended.
    pub fn record_outcome(&self, outcome: TransactionOutcome) {
        match outcome {
            TransactionOutcome::Committed => {
                self.transactions_committed.fetch_add(1, Ordering::Relaxed);
            }
            TransactionOutcome::RolledBack => {
                self.transactions_rolled_back.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Record a successfully published change set.
    pub fn record_published(&self, summary: &ChangeSummary, faults: usize, duration_us: u64) {
        self.change_sets_published.fetch_add(1, Ordering::Relaxed);
        self.entities_created
            .fetch_add(summary.created as u64, Ordering::Relaxed);
        self.entities_updated
            .fetch_add(summary.updated as u64, Ordering::Relaxed);
        self.entities_deleted
            .fetch_add(summary.deleted as u64, Ordering::Relaxed);
        self.property_changes
            .fetch_add(summary.properties_modified as u64, Ordering::Relaxed);
        self.collection_faults
            .fetch_add(faults as u64, Ordering::Relaxed);
        self.publish_latency.observe(duration_us);
    }

    /// Record a publication aborted by a listener.
    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one listener invocation.
    pub fn record_listener(&self, name: &str) {
        {
            let map = self.listener_invocations.read();
            if let Some(counter) = map.get(name) {
                counter.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        self.listener_invocations
            .write()
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    // Getters

    /// Uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Transactions started.
    pub fn transactions_begun(&self) -> u64 {
        self.transactions_begun.load(Ordering::Relaxed)
    }

    /// Transactions committed.
    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    /// Transactions rolled back.
    pub fn transactions_rolled_back(&self) -> u64 {
        self.transactions_rolled_back.load(Ordering::Relaxed)
    }

    /// Change sets delivered to every listener.
    pub fn change_sets_published(&self) -> u64 {
        self.change_sets_published.load(Ordering::Relaxed)
    }

    /// Created entities across published change sets.
    pub fn entities_created(&self) -> u64 {
        self.entities_created.load(Ordering::Relaxed)
    }

    /// Updated entities across published change sets.
    pub fn entities_updated(&self) -> u64 {
        self.entities_updated.load(Ordering::Relaxed)
    }

    /// Deleted entities across published change sets.
    pub fn entities_deleted(&self) -> u64 {
        self.entities_deleted.load(Ordering::Relaxed)
    }

    /// Property changes across published change sets.
    pub fn property_changes(&self) -> u64 {
        self.property_changes.load(Ordering::Relaxed)
    }

    /// Unreadable properties reported in published change sets.
    pub fn collection_faults(&self) -> u64 {
        self.collection_faults.load(Ordering::Relaxed)
    }

    /// Publications aborted by a listener.
    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }

    /// Publication latency histogram.
    pub fn publish_latency(&self) -> &Histogram {
        &self.publish_latency
    }

    /// Invocation counts per listener name.
    pub fn listener_invocations(&self) -> BTreeMap<String, u64> {
        self.listener_invocations
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect()
    }

    /// Export metrics in Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let counters: [(&str, &str, u64); 11] = [
            ("transactions_begun_total", "Transactions started", self.transactions_begun()),
            ("transactions_committed_total", "Transactions committed", self.transactions_committed()),
            ("transactions_rolled_back_total", "Transactions rolled back", self.transactions_rolled_back()),
            ("change_sets_published_total", "Change sets published to listeners", self.change_sets_published()),
            ("entities_created_total", "Created entities published", self.entities_created()),
            ("entities_updated_total", "Updated entities published", self.entities_updated()),
            ("entities_deleted_total", "Deleted entities published", self.entities_deleted()),
            ("property_changes_total", "Property changes published", self.property_changes()),
            ("collection_faults_total", "Unreadable properties reported", self.collection_faults()),
            ("publish_failures_total", "Publications aborted by a listener", self.publish_failures()),
            ("uptime_seconds", "Process uptime in seconds", self.uptime_secs()),
        ];

        for (name, help, value) in counters {
            let kind = if name.ends_with("_total") { "counter" } else { "gauge" };
            let _ = writeln!(out, "# HELP unitwork_{} {}", name, help);
            let _ = writeln!(out, "# TYPE unitwork_{} {}", name, kind);
            let _ = writeln!(out, "unitwork_{} {}\n", name, value);
        }

        let _ = writeln!(out, "# HELP unitwork_publish_duration_us Publication latency in microseconds");
        let _ = writeln!(out, "# TYPE unitwork_publish_duration_us histogram");
        let mut cumulative = 0u64;
        for (bound, count) in self.publish_latency.snapshot() {
            cumulative += count;
            let _ = writeln!(out, "unitwork_publish_duration_us_bucket{{le=\"{}\"}} {}", bound, cumulative);
        }
        let _ = writeln!(
            out,
            "unitwork_publish_duration_us_bucket{{le=\"+Inf\"}} {}",
            self.publish_latency.count()
        );
        let _ = writeln!(out, "unitwork_publish_duration_us_sum {}", self.publish_latency.sum());
        let _ = writeln!(out, "unitwork_publish_duration_us_count {}\n", self.publish_latency.count());

        let _ = writeln!(out, "# HELP unitwork_listener_invocations_total Change sets handed to each listener");
        let _ = writeln!(out, "# TYPE unitwork_listener_invocations_total counter");
        for (listener, count) in self.listener_invocations() {
            let _ = writeln!(
                out,
                "unitwork_listener_invocations_total{{listener=\"{}\"}} {}",
                listener, count
            );
        }

        out
    }

    /// Reset all metrics (for testing).
    pub fn reset(&self) {
        for counter in [
            &self.transactions_begun,
            &self.transactions_committed,
            &self.transactions_rolled_back,
            &self.change_sets_published,
            &self.entities_created,
            &self.entities_updated,
            &self.entities_deleted,
            &self.property_changes,
            &self.collection_faults,
            &self.publish_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.publish_latency.reset();
        self.listener_invocations.write().clear();
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics registry handle.
pub type SharedMetricsRegistry = Arc<MetricsRegistry>;

/// Create a new shared metrics registry.
pub fn new_shared_registry() -> SharedMetricsRegistry {
    Arc::new(MetricsRegistry::new())
}
