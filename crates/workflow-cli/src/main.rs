use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{debug, error, info, warn};

use workflow_engine::events::EventError;
use workflow_engine::{
    build_graph_model, expand_composites, prepare, validate_workflow, EngineConfig, EngineError,
    EventSink, FlowDocument, HttpNodeExecutor, ValidationReport, WorkflowEngine, WorkflowEvent,
};

#[derive(Parser)]
#[command(name = "workflow", version, about = "Validate, flatten and run node-graph workflows")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a workflow and list its errors and warnings
    Validate {
        /// Workflow JSON file
        file: PathBuf,
    },
    /// Print the workflow with every composite inlined, plus port mappings
    Expand {
        /// Workflow JSON file
        file: PathBuf,
        /// Maximum number of composite expansions
        #[arg(long)]
        max_depth: Option<usize>,
    },
    /// Execute a workflow against the node runner
    Run {
        /// Workflow JSON file
        file: PathBuf,
        /// Node runner endpoint
        #[arg(long)]
        runner_url: Option<String>,
        /// Fail any node whose backend call takes longer than this
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Engine configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// Writes every workflow event to the log
struct LogEventSink;

impl EventSink for LogEventSink {
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError> {
        match &event {
            WorkflowEvent::NodeError { node_id, error } => error!("{}: {}", node_id, error),
            WorkflowEvent::NodeSkipped { node_id, reason } => warn!("{} skipped: {}", node_id, reason),
            WorkflowEvent::NodeStateChanged { node_id, state } => info!("{} -> {}", node_id, state),
            // Already logged by `prepare`
            WorkflowEvent::ValidationWarnings { warnings } => {
                debug!("Run gate passed with {} validation warning(s)", warnings.len())
            }
            other => info!("{:?}", other),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();

    match cli.command {
        Commands::Validate { file } => validate(&file).await,
        Commands::Expand { file, max_depth } => expand(&file, max_depth).await,
        Commands::Run {
            file,
            runner_url,
            timeout_secs,
            config,
        } => run(&file, runner_url, timeout_secs, config.as_deref()).await,
    }
}

async fn validate(file: &Path) -> anyhow::Result<ExitCode> {
    let doc = FlowDocument::load(file).await?;
    let graph = build_graph_model(&doc.nodes, &doc.edges);
    let report = validate_workflow(&graph);

    print_report(&report);
    if report.valid {
        println!("{}: valid ({} nodes)", file.display(), graph.len());
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

async fn expand(file: &Path, max_depth: Option<usize>) -> anyhow::Result<ExitCode> {
    let doc = FlowDocument::load(file).await?;
    let graph = build_graph_model(&doc.nodes, &doc.edges);
    let depth = max_depth.unwrap_or(EngineConfig::default().max_composite_depth);

    let expanded = expand_composites(&graph, depth);
    let output = serde_json::json!({
        "graph": expanded.graph.to_document(None),
        "mappings": expanded.mappings,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(ExitCode::SUCCESS)
}

async fn run(
    file: &Path,
    runner_url: Option<String>,
    timeout_secs: Option<u64>,
    config_path: Option<&Path>,
) -> anyhow::Result<ExitCode> {
    let mut config = match config_path {
        Some(path) => EngineConfig::load(path).await?,
        None => EngineConfig::default(),
    };
    if let Some(url) = runner_url {
        config.runner_url = url;
    }
    if timeout_secs.is_some() {
        config.node_timeout_secs = timeout_secs;
    }
    config.validate()?;

    let doc = FlowDocument::load(file).await?;
    let prepared = match prepare(&doc, &config) {
        Ok(prepared) => prepared,
        Err(EngineError::Validation(report)) => {
            print_report(&report);
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    };

    info!("Running {} against {}", file.display(), config.runner_url);
    let executor = Arc::new(HttpNodeExecutor::from_config(&config));
    let mut engine = WorkflowEngine::new(executor, config);
    engine.bind_model(prepared.graph);
    engine.subscribe(Arc::new(LogEventSink));
    let engine = Arc::new(engine);

    // Ctrl-C stops the run; in-flight nodes finish but their results are dropped
    let stopper = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Stopping workflow...");
            stopper.stop();
        }
    });

    let report = engine.start().await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_report(report: &ValidationReport) {
    for issue in &report.errors {
        eprintln!("error[{}]: {}", issue.code(), issue);
    }
    for issue in &report.warnings {
        eprintln!("warning[{}]: {}", issue.code(), issue);
    }
}
