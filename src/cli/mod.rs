//! Command-line interface for harmonia.
//!
//! Every invocation bootstraps a fresh in-memory engine, runs one command
//! against it and shuts it down again.

use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{EngineConfig, ResolvedConfig};
use crate::core::{WorkflowDefinition, DEFAULT_WORKFLOW};
use crate::domain::{Content, ExecutionStatus, TriggerKind, WorkflowExecution};
use crate::engine::{Engine, WebhookOutcome};

/// harmonia - Resonance-coordinated workflow engine
#[derive(Parser, Debug)]
#[command(name = "harmonia")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a workflow (the default workflow when none is given)
    Run {
        /// Workflow ID (built-in, or workflows/<id>.yaml)
        #[arg(short, long)]
        workflow: Option<String>,

        /// Input file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Read input from stdin
        #[arg(long)]
        stdin: bool,
    },

    /// Deliver a payload to a webhook path
    Webhook {
        /// Webhook path (e.g. "ingest")
        path: String,

        /// Payload file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Run the recalibration workflow
    Recalibrate,

    /// Show cluster, memory and firewall state as JSON
    Inspect,

    /// List registered workflows
    Workflows,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let resolved = EngineConfig::discover()?;

        if let Commands::Config = self.command {
            return show_config(&resolved);
        }

        let engine = Engine::bootstrap(resolved.engine.clone()).await?;
        let outcome = match self.command {
            Commands::Run {
                workflow,
                input,
                stdin,
            } => run_workflow(&engine, &resolved, workflow, input, stdin).await,
            Commands::Webhook { path, input } => deliver_webhook(&engine, &path, input).await,
            Commands::Recalibrate => recalibrate(&engine).await,
            Commands::Inspect => inspect(&engine).await,
            Commands::Workflows => list_workflows(&engine).await,
            Commands::Config => Ok(()),
        };
        engine.shutdown().await;
        outcome
    }
}

/// Run a workflow with the given input
async fn run_workflow(
    engine: &Engine,
    resolved: &ResolvedConfig,
    workflow_id: Option<String>,
    input_file: Option<PathBuf>,
    use_stdin: bool,
) -> Result<()> {
    let input = read_input(input_file, use_stdin)?;

    let workflow_id = match workflow_id {
        None => DEFAULT_WORKFLOW.to_string(),
        Some(id) => {
            if engine.orchestrator().workflow(&id).await.is_none() {
                let workflow = load_workflow(&resolved.workflows_dir, &id)?;
                engine.define_workflow(workflow).await?;
            }
            id
        }
    };

    if workflow_id == DEFAULT_WORKFLOW {
        let result = engine.submit(input).await?;
        if let Some(content) = &result.result {
            println!("{}", content.as_text());
        }
        if result.attempts > 1 {
            eprintln!("[Recovered after recalibration]");
        }
        match result.status {
            ExecutionStatus::Completed => {
                eprintln!("\n[Execution {} completed successfully]", result.execution_id);
            }
            _ => {
                let reason = result.error.unwrap_or_else(|| "unknown error".to_string());
                let verb = if result.rejected { "rejected" } else { "failed" };
                eprintln!("\n[Execution {} {}: {}]", result.execution_id, verb, reason);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let execution = engine
        .orchestrator()
        .execute(&workflow_id, input, TriggerKind::Manual)
        .await?;
    report_execution(&execution);
    Ok(())
}

/// Deliver a webhook payload
async fn deliver_webhook(engine: &Engine, path: &str, input_file: Option<PathBuf>) -> Result<()> {
    let payload = read_input(input_file, false)?;

    match engine.webhook(path, payload).await? {
        WebhookOutcome::Triggered(handle) => {
            eprintln!("[Webhook '{}' triggered '{}']", path, handle.workflow_id);
            let execution = handle.wait().await?;
            report_execution(&execution);
        }
        WebhookOutcome::PassThrough { path } => {
            eprintln!("[No workflow registered for '{}', payload passed through]", path);
        }
    }
    Ok(())
}

/// Run the recalibration workflow and print the new base frequency
async fn recalibrate(engine: &Engine) -> Result<()> {
    let execution = engine.recalibrate().await?;
    report_execution(&execution);
    println!("Base frequency: {:.2}", engine.orchestrator().base_frequency().await);
    Ok(())
}

/// Print the component projections
async fn inspect(engine: &Engine) -> Result<()> {
    let snapshot = serde_json::json!({
        "base_frequency": engine.orchestrator().base_frequency().await,
        "cluster": engine.cluster_status().await,
        "memory": engine.memory_stats().await,
        "firewall": engine.firewall_status().await,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&snapshot).context("Failed to render engine state")?
    );
    Ok(())
}

/// List registered workflows
async fn list_workflows(engine: &Engine) -> Result<()> {
    let workflows = engine.list_workflows().await;

    println!("{:<20} {:<14} {:<6} {}", "WORKFLOW", "CATEGORY", "STEPS", "NAME");
    println!("{}", "-".repeat(70));

    for workflow in workflows {
        println!(
            "{:<20} {:<14} {:<6} {}",
            workflow.id,
            workflow.category,
            workflow.steps.len(),
            workflow.name
        );
    }
    Ok(())
}

/// Show the resolved configuration
fn show_config(resolved: &ResolvedConfig) -> Result<()> {
    println!("Harmonia Configuration");
    println!();
    println!(
        "Config file: {}",
        resolved
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!("Workflows:   {}", resolved.workflows_dir.display());
    println!();
    print!("{}", resolved.engine.to_yaml()?);
    Ok(())
}

fn report_execution(execution: &WorkflowExecution) {
    for line in execution.log() {
        eprintln!("  {}", line);
    }

    match execution.status {
        ExecutionStatus::Completed => {
            if let Some(result) = &execution.result {
                println!("{}", result.as_text());
            }
            eprintln!("\n[Execution {} completed successfully]", execution.id);
        }
        ExecutionStatus::Failed => {
            let reason = execution.error.as_deref().unwrap_or("unknown error");
            eprintln!("\n[Execution {} failed: {}]", execution.id, reason);
            std::process::exit(1);
        }
        status => {
            eprintln!("\n[Execution {} in state: {:?}]", execution.id, status);
        }
    }
}

/// Read input from a file, or stdin when asked or piped
fn read_input(input_file: Option<PathBuf>, use_stdin: bool) -> Result<Content> {
    let raw = if let Some(path) = input_file {
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?
    } else if use_stdin || !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        buffer
    } else {
        anyhow::bail!("No input provided. Use --input <file> or pipe to stdin");
    };

    if raw.trim().is_empty() {
        anyhow::bail!("Input is empty");
    }
    Ok(parse_content(&raw))
}

/// A JSON object becomes structured content, anything else is text
fn parse_content(raw: &str) -> Content {
    match serde_json::from_str::<serde_json::Value>(raw.trim()) {
        Ok(serde_json::Value::Object(fields)) => Content::structured(fields),
        _ => Content::text(raw.trim_end()),
    }
}

/// Load a workflow by ID from the workflows directory
fn load_workflow(workflows_dir: &Path, id: &str) -> Result<WorkflowDefinition> {
    let path = workflows_dir.join(format!("{}.yaml", id));
    if !path.exists() {
        anyhow::bail!(
            "Workflow '{}' not found. Looked for:\n  - {}",
            id,
            path.display()
        );
    }
    let workflow = WorkflowDefinition::from_file(&path)?;
    workflow.validate()?;
    Ok(workflow)
}
