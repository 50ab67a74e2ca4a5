//! Unitwork Command-Line Tool
//!
//! Runs JSON workloads through the change tracking pipeline and reads the
//! outbox of a data directory.

mod config;
mod formatter;
mod pipeline;
mod script;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use unitwork_core::events::DomainEventBus;
use unitwork_core::metrics::{new_shared_registry, SharedMetricsRegistry};
use unitwork_core::outbox::Outbox;
use unitwork_core::EntityStore;

use config::{Args, Command, RuntimeConfig};
use formatter::{create_formatter, OutputFormat};
use pipeline::Pipeline;
use script::Script;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "unitwork_core=info,unitwork_cli=info,audit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.to_config();
    tracing::debug!(
        data_path = ?config.data_path,
        audit = ?config.audit_sink,
        outbox = config.outbox,
        "configuration loaded"
    );

    match args.command {
        Command::Run { script, format } => {
            let metrics = new_shared_registry();
            run_script(&config, &script, Some(format), metrics).await
        }
        Command::Outbox {
            from,
            limit,
            entities,
            format,
        } => print_outbox(&config, from, limit, &entities, format),
        Command::Metrics { script } => {
            let metrics = new_shared_registry();
            run_script(&config, &script, None, metrics.clone()).await?;
            print!("{}", metrics.to_prometheus());
            Ok(())
        }
    }
}

/// Execute a script, printing published change sets when `format` is set.
async fn run_script(
    config: &RuntimeConfig,
    path: &Path,
    format: Option<OutputFormat>,
    metrics: SharedMetricsRegistry,
) -> Result<(), Box<dyn std::error::Error>> {
    let script = Script::load(path)?;

    let events = Arc::new(DomainEventBus::new(config.event_capacity));
    let mut subscriber = events.subscribe();
    let watcher = tokio::spawn(async move {
        let mut delivered = 0u64;
        while let Some(event) = subscriber.recv().await {
            tracing::debug!(
                transaction = %event.transaction_id,
                entity = %event.entity,
                kind = %event.kind,
                "domain event"
            );
            delivered += 1;
        }
        delivered
    });

    // The pipeline owns the last handle to the bus; dropping it ends the watcher.
    let reports = {
        let pipeline = Pipeline::open(config, events, metrics)?;
        let reports = pipeline.run(&script)?;
        pipeline.flush()?;
        reports
    };
    let delivered = watcher.await?;

    let committed = reports.iter().filter(|r| r.committed).count();
    tracing::info!(
        transactions = reports.len(),
        committed,
        domain_events = delivered,
        "script finished"
    );

    if let Some(format) = format {
        let formatter = create_formatter(format);
        for report in &reports {
            if let Some(changes) = &report.changes {
                println!("{}", formatter.format_change_set(changes));
            }
            if let Some(error) = &report.error {
                eprintln!("transaction {} failed: {}", report.transaction_id, error);
            }
        }
    }
    Ok(())
}

fn print_outbox(
    config: &RuntimeConfig,
    from: u64,
    limit: usize,
    entities: &[String],
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    if config.data_path.is_none() {
        return Err("the outbox command needs --data-path".into());
    }

    let store = EntityStore::open(config.storage_config())?;
    let outbox = Outbox::open(&store)?;
    let filter = if entities.is_empty() {
        None
    } else {
        Some(entities)
    };
    let (entries, has_more) = outbox.scan_filtered(from, limit, filter)?;

    println!("{}", create_formatter(format).format_outbox(&entries, has_more));
    Ok(())
}
