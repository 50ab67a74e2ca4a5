//! Metrics collection.
//!
//! Transaction outcomes, published change counts and publication latency,
//! exportable in Prometheus text format.
//!
//! # Usage
//!
//! ```ignore
//! use unitwork_core::metrics::new_shared_registry;
//!
//! let registry = new_shared_registry();
//! let coordinator = TransactionCoordinator::new(store, listeners)
//!     .with_metrics(registry.clone());
//!
//! let prometheus_text = registry.to_prometheus();
//! ```

mod histogram;
mod registry;

pub use histogram::Histogram;
pub use registry::{new_shared_registry, MetricsRegistry, SharedMetricsRegistry, TransactionOutcome};
