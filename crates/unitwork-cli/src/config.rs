//! Runtime configuration.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use unitwork_core::{StorageConfig, TrackingPolicy};

use crate::formatter::OutputFormat;

/// Default domain event buffer per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = unitwork_core::events::DEFAULT_EVENT_CAPACITY;

/// Where committed audit rows go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuditSinkKind {
    /// Emit rows as `tracing` events with target `audit`.
    Tracing,
    /// Discard rows.
    Null,
}

/// Configuration for one CLI invocation.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Data directory. `None` uses a temporary store.
    pub data_path: Option<PathBuf>,

    /// Audit sink for committed rows.
    pub audit_sink: AuditSinkKind,

    /// Whether committed change sets are written to the outbox.
    pub outbox: bool,

    /// Domain event buffer per subscriber.
    pub event_capacity: usize,

    /// Entity types excluded from tracking.
    pub ignored_types: Vec<String>,

    /// `(type, property)` pairs excluded from tracking.
    pub ignored_properties: Vec<(String, String)>,
}

impl RuntimeConfig {
    /// Configuration backed by a persistent data directory.
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: Some(data_path.into()),
            ..Self::default()
        }
    }

    /// Use a temporary store.
    pub fn temporary() -> Self {
        Self::default()
    }

    /// Set the audit sink.
    pub fn with_audit_sink(mut self, sink: AuditSinkKind) -> Self {
        self.audit_sink = sink;
        self
    }

    /// Disable the outbox.
    pub fn without_outbox(mut self) -> Self {
        self.outbox = false;
        self
    }

    /// Exclude an entity type from tracking.
    pub fn ignore_type(mut self, entity_type: impl Into<String>) -> Self {
        self.ignored_types.push(entity_type.into());
        self
    }

    /// Storage configuration for the entity store.
    pub fn storage_config(&self) -> StorageConfig {
        match &self.data_path {
            Some(path) => StorageConfig::new(path),
            None => StorageConfig::temporary(),
        }
    }

    /// Tracking policy built from the exclusions.
    pub fn tracking_policy(&self) -> TrackingPolicy {
        let policy = self
            .ignored_types
            .iter()
            .fold(TrackingPolicy::new(), |policy, ty| policy.ignore_type(ty));
        self.ignored_properties
            .iter()
            .fold(policy, |policy, (ty, property)| policy.ignore_property(ty, property))
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_path: None,
            audit_sink: AuditSinkKind::Tracing,
            outbox: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            ignored_types: Vec::new(),
            ignored_properties: Vec::new(),
        }
    }
}

/// Unitwork command-line tool.
#[derive(Parser, Debug)]
#[command(name = "unitwork")]
#[command(version, about = "Run tracked units of work and inspect their outbox", long_about = None)]
pub struct Args {
    /// Data directory. Omit to run against a temporary store.
    #[arg(short, long, global = true)]
    pub data_path: Option<PathBuf>,

    /// Audit sink for committed rows.
    #[arg(long, value_enum, default_value_t = AuditSinkKind::Tracing, global = true)]
    pub audit: AuditSinkKind,

    /// Do not write committed change sets to the outbox.
    #[arg(long, global = true)]
    pub no_outbox: bool,

    /// Domain event buffer per subscriber.
    #[arg(long, default_value_t = DEFAULT_EVENT_CAPACITY, global = true)]
    pub event_capacity: usize,

    /// Entity type to exclude from tracking (repeatable).
    #[arg(long = "ignore-type", global = true)]
    pub ignore_types: Vec<String>,

    /// Property to exclude from tracking, as `Type.property` (repeatable).
    #[arg(long = "ignore-property", value_parser = parse_property, global = true)]
    pub ignore_properties: Vec<(String, String)>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a JSON workload and print every published change set.
    Run {
        /// Path to the workload script.
        script: PathBuf,

        /// Output format for change sets.
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Print outbox entries from a data directory.
    Outbox {
        /// First LSN to print.
        #[arg(long, default_value_t = 0)]
        from: u64,

        /// Maximum number of entries.
        #[arg(long, default_value_t = 100)]
        limit: usize,

        /// Only entries touching this entity type (repeatable).
        #[arg(long = "entity")]
        entities: Vec<String>,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Execute a JSON workload and print metrics in Prometheus format.
    Metrics {
        /// Path to the workload script.
        script: PathBuf,
    },
}

impl Args {
    /// Convert command-line arguments to runtime configuration.
    pub fn to_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            data_path: self.data_path.clone(),
            audit_sink: self.audit,
            outbox: !self.no_outbox,
            event_capacity: self.event_capacity.max(1),
            ignored_types: self.ignore_types.clone(),
            ignored_properties: self.ignore_properties.clone(),
        }
    }
}

fn parse_property(s: &str) -> Result<(String, String), String> {
    match s.split_once('.') {
        Some((ty, property)) if !ty.is_empty() && !property.is_empty() => {
            Ok((ty.to_string(), property.to_string()))
        }
        _ => Err(format!("expected Type.property, got '{}'", s)),
    }
}
