mod rules;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use tollgate_core::config::AppConfig;
use tollgate_core::traits::{AuditStore, LookupProvider};
use tollgate_core::types::WorkItem;
use tollgate_lookups::LookupRegistry;
use tollgate_memory::SessionMemory;
use tollgate_workflow::{
    ApprovalPipeline, AuditSink, InMemoryAuditStore, JsonlAuditStore, TracingAuditStore,
    WorkflowRunner,
};

use crate::rules::{LedgerFulfillment, PolicyChecker, PolicyMaker};

#[derive(Parser)]
#[command(name = "tollgate", version, about = "Maker-checker approval workflow runner")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "tollgate.toml", env = "TOLLGATE_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run work items from a JSON file (one object or an array) through the pipeline
    Submit {
        /// JSON file holding the work item(s)
        file: PathBuf,
        /// Make the fulfillment side effect fail
        #[arg(long)]
        fail_fulfillment: bool,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tollgate=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "tollgate", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = AppConfig::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Submit {
            file,
            fail_fulfillment,
        } => {
            if fail_fulfillment {
                config.rules.fail_fulfillment = true;
            }
            submit(&config, &file).await?;
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

/// Read one work item or an array of them.
fn read_work_items(path: &Path) -> anyhow::Result<Vec<WorkItem>> {
    let content = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    let items = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value)?,
        other => vec![serde_json::from_value(other)?],
    };
    Ok(items)
}

async fn submit(config: &AppConfig, file: &Path) -> anyhow::Result<()> {
    let items = read_work_items(file)?;
    info!(count = items.len(), file = %file.display(), "Loaded work items");

    // Audit destinations
    let memory_store = Arc::new(InMemoryAuditStore::new(config.audit.retain_records));
    let mut stores: Vec<Arc<dyn AuditStore>> = vec![memory_store.clone()];
    if config.audit.log_records {
        stores.push(Arc::new(TracingAuditStore));
    }
    if let Some(path) = config.audit_jsonl_path() {
        info!(path = %path.display(), "Writing audit records to JSONL");
        stores.push(Arc::new(JsonlAuditStore::new(path)));
    }
    let (audit, dispatcher) = AuditSink::spawn(stores, &config.audit);

    // Session memory with optional idle expiry
    let sessions = Arc::new(SessionMemory::from_config(&config.memory));
    let cancel = CancellationToken::new();
    let sweeper = config.memory.idle_ttl().map(|_| {
        sessions.spawn_sweeper(
            Duration::from_secs(config.memory.sweep_interval_secs.max(1)),
            cancel.clone(),
        )
    });

    let rules = config.rules.clone();
    let mut builder = ApprovalPipeline::builder()
        .config(config)
        .audit(audit.clone())
        .sessions(Arc::clone(&sessions))
        .maker(Arc::new(PolicyMaker::new(&config.stages.maker.actor, rules.clone())))
        .checker(Arc::new(PolicyChecker::new(&config.stages.checker.actor, rules.clone())))
        .fulfillment(Arc::new(LedgerFulfillment::new(
            &config.stages.fulfillment.actor,
            &rules,
        )));

    if let Some(path) = config.lookup_fixtures_path() {
        let registry = LookupRegistry::from_fixtures_file(&path)?
            .with_timeout(Duration::from_secs(config.lookups.timeout_secs));
        info!(lookups = ?registry.kinds(), "Auxiliary lookups enabled");
        for (kind, description) in registry.descriptions() {
            debug!(lookup = %kind, description = %description, "Registered lookup");
        }
        let provider: Arc<dyn LookupProvider> = Arc::new(registry);
        builder = builder.lookups(provider);
    }

    let runner = WorkflowRunner::new(builder.build()?)
        .clear_sessions_on_completion(config.workflow.clear_sessions_on_completion);

    let mut aborted = 0usize;
    for result in runner.submit_all(items).await {
        match result {
            Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
            Err(e) => {
                aborted += 1;
                error!(error = %e, definition_error = e.is_definition_error(), "Work item aborted");
            }
        }
    }

    // Shutdown: stop the sweeper, then drain the audit queue
    cancel.cancel();
    if let Some(handle) = sweeper {
        handle.await.ok();
    }
    drop(runner);
    dispatcher.shutdown().await;

    let dropped = audit.dropped();
    if dropped > 0 {
        warn!(dropped, "Some audit records were dropped");
    }
    info!(audit_records = memory_store.len(), sessions = sessions.len(), "Done");

    if aborted > 0 {
        anyhow::bail!("{aborted} work item(s) aborted");
    }
    Ok(())
}
