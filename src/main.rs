use anyhow::{Context, Result};
use jobflow::cli::commands::{HistoryCommand, RunCommand, ValidateCommand};
use jobflow::cli::output::*;
use jobflow::cli::terminal_output::TerminalSink;
use jobflow::cli::{Cli, Command};
use jobflow::core::{FlowConfig, Pipeline, PipelineItem, RunStatus, WorkflowState};
use jobflow::execution::{ExecutionEngine, RunHandle};
use jobflow::notify::{SlackConfig, SlackNotifier};
use jobflow::persistence::{PersistenceBackend, RunRecord};
use jobflow::remote::TargetRegistry;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // RUST_LOG wins over the verbosity flags
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(cli.log_level()).into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_workflow(cmd).await?,
        Command::Validate(cmd) => validate_workflow(cmd)?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

fn load_pipeline(
    instances: &Path,
    workflow: &Path,
    inputs: &[(String, String)],
) -> Result<(FlowConfig, Pipeline)> {
    let config = FlowConfig::load(instances, workflow)
        .with_context(|| format!("Failed to load {}", workflow.display()))?
        .with_inputs(inputs.iter().cloned());
    let pipeline = config
        .to_pipeline()
        .with_context(|| format!("Invalid workflow {}", workflow.display()))?;
    Ok((config, pipeline))
}

async fn run_workflow(cmd: &RunCommand) -> Result<()> {
    let (config, pipeline) = load_pipeline(&cmd.instances, &cmd.workflow, &cmd.inputs)?;

    println!("{} Loaded workflow: {}", INFO, style(&pipeline.name).bold());
    for (key, value) in &cmd.inputs {
        println!(
            "{} Input override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let registry = Arc::new(
        TargetRegistry::from_config(&config).context("Failed to set up HTTP client")?,
    );
    let mut engine = ExecutionEngine::new(registry.clone()).skip_pr_gates(cmd.skip_pr_gates);
    let has_gates = pipeline
        .items
        .iter()
        .any(|item| matches!(item, PipelineItem::Gate(_)));
    if has_gates && !cmd.skip_pr_gates {
        let github = registry
            .pull_requests()
            .context("Failed to configure GitHub client")?;
        engine = engine.with_pull_requests(Arc::new(github));
    }

    let notifier = if cmd.no_notify {
        None
    } else {
        SlackConfig::resolve(config.slack_webhook.as_deref())
            .map(|slack| SlackNotifier::new(slack, registry.shared_client().clone()))
    };
    if notifier.is_none() && !cmd.no_notify {
        info!("Slack notifications disabled (set slack_webhook or SLACK_WEBHOOK_URL)");
    }

    let store = if cmd.no_history {
        None
    } else {
        Some(open_store(cmd.db_path.as_deref()).await?)
    };

    // Snapshot the file as it is when the run starts
    let snapshot = match std::fs::read_to_string(&cmd.workflow) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Failed to read workflow file for snapshot: {}", e);
            None
        }
    };

    let run = RunHandle::new(&pipeline);
    let stopper = run.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} Stop requested, cancelling in-flight jobs...", WARN);
            stopper.stop();
        }
    });

    let run_id = run.run_id().to_string();
    println!(
        "{} Starting {} ({})",
        ROCKET,
        style(&pipeline.name).bold(),
        style(&run_id[..8]).dim()
    );
    if cmd.skip_pr_gates {
        println!("{} PR gates will be skipped", WARN);
    }
    println!("{}", separator());

    let sink = Arc::new(TerminalSink::new(pipeline.items.len()));
    let result = engine.execute(&pipeline, &run, sink).await;

    let state = run.snapshot();
    println!("{}", separator());
    println!("{}", format_workflow_summary(&state));

    if let Some(store) = &store {
        let workflow_path = cmd.workflow.display().to_string();
        let mut record = RunRecord::from_state(&state, &workflow_path, cmd.skip_pr_gates);
        if let Some(snapshot) = snapshot {
            record = record.with_config_snapshot(snapshot);
        }
        match store.save_run(&record).await {
            Ok(()) => println!(
                "\n{} Run saved to history (ID: {})",
                INFO,
                style(&run_id[..8]).dim()
            ),
            Err(e) => warn!("Failed to save run history: {:#}", e),
        }
    }

    if let Some(notifier) = &notifier {
        notifier.notify_run(&state).await;
    }

    print_outcome(&state);
    if let Err(e) = result {
        if state.status != RunStatus::Stopped {
            error!("{}", e);
        }
        std::process::exit(1);
    }

    Ok(())
}

fn print_outcome(state: &WorkflowState) {
    let elapsed = match (state.started_at, state.ended_at) {
        (Some(start), Some(end)) => (end - start)
            .to_std()
            .map(format_duration)
            .unwrap_or_default(),
        _ => String::new(),
    };
    match state.status {
        RunStatus::Success => println!(
            "\n{} {} completed {} in {}",
            CHECK,
            style(&state.name).bold(),
            style("successfully").green(),
            elapsed
        ),
        RunStatus::Stopped => println!(
            "\n{} {} {} after {}",
            STOP,
            style(&state.name).bold(),
            style("stopped").yellow(),
            elapsed
        ),
        _ => println!(
            "\n{} {} {}: {}",
            CROSS,
            style(&state.name).bold(),
            style("failed").red(),
            state.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

fn validate_workflow(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating workflow...", INFO);

    match load_pipeline(&cmd.instances, &cmd.workflow, &cmd.inputs) {
        Ok((config, pipeline)) => {
            println!("{} Workflow configuration is valid!", CHECK);
            println!("  Name: {}", style(&pipeline.name).bold());
            println!("  Items: {}", style(pipeline.items.len()).cyan());
            println!("  Job steps: {}", style(pipeline.step_count()).cyan());
            println!("  Instances: {}", style(config.instances.len()).cyan());
            println!("  Inputs: {}", style(pipeline.inputs.len()).cyan());

            if cmd.json {
                let preview = WorkflowState::new(&pipeline);
                println!("\n{}", serde_json::to_string_pretty(&preview)?);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

#[cfg(feature = "sqlite")]
async fn open_store(db_path: Option<&Path>) -> Result<Arc<dyn PersistenceBackend>> {
    use jobflow::persistence::SqliteRunStore;

    let store = match db_path {
        Some(path) => SqliteRunStore::new(path).await?,
        None => SqliteRunStore::with_default_path().await?,
    };
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_store(_db_path: Option<&Path>) -> Result<Arc<dyn PersistenceBackend>> {
    warn!("Built without the sqlite feature; history is kept in memory only");
    Ok(Arc::new(jobflow::persistence::InMemoryPersistence::new()))
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_store(cmd.db_path.as_deref()).await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(record) if cmd.json => println!("{}", serde_json::to_string_pretty(&record)?),
            Some(record) => print_run_details(&record),
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let runs = store.list_runs(cmd.workflow.as_deref(), cmd.limit).await?;

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for record in &runs {
        println!("  {}", format_run_record(record));
    }

    Ok(())
}

fn print_run_details(record: &RunRecord) {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(record.run_id).cyan());
    println!("  Workflow: {}", style(&record.workflow_name).bold());
    println!("  File: {}", style(&record.workflow_path).dim());
    println!("  Status: {}", format_status(record.status));
    println!("  Started: {}", style(record.started_at.to_rfc3339()).dim());
    if let Some(ended) = record.ended_at {
        println!("  Ended: {}", style(ended.to_rfc3339()).dim());
    }
    if let Some(duration) = record.duration().and_then(|d| d.to_std().ok()) {
        println!("  Duration: {}", style(format_duration(duration)).dim());
    }
    println!(
        "  Steps: {}/{}",
        record.steps_completed, record.steps_total
    );
    if record.skip_pr_gates {
        println!("  PR gates: {}", style("skipped").yellow());
    }
    if !record.inputs.is_empty() {
        println!("  Inputs:");
        for (key, value) in &record.inputs {
            println!("    {} = {}", style(key).cyan(), value);
        }
    }
    if let Some(error) = &record.error {
        println!("  Error: {}", style(error).red());
    }
    if let Some(snapshot) = &record.config_snapshot {
        println!("  Workflow snapshot:");
        for line in snapshot.lines() {
            println!("    {}", style(line).dim());
        }
    }
}
