use anyhow::{Context, Result};
use clap::Parser;
use flowtree_core::{ChannelSink, OrgId, State, StepNode, WorkflowExecutor};
use std::path::PathBuf;
use std::sync::Arc;

mod config;
mod handlers;

use config::{load_state_file, CliConfig, LoggingConfig, WorkflowFile};

#[derive(Parser, Debug)]
#[command(name = "flowtree")]
#[command(about = "Run a tree of automation steps and stream its progress", long_about = None)]
struct Args {
    /// Workflow file (JSON step rows)
    #[arg(short, long)]
    workflow: PathBuf,

    /// Initial state file (JSON object); replaces the workflow's initial state
    #[arg(short, long)]
    state: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long, default_value = "flowtree.toml")]
    config: PathBuf,

    /// Organization to run as; overrides the workflow file
    #[arg(short, long, env = "FLOWTREE_ORG")]
    organization: Option<String>,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.filter.clone().into());

    // stdout carries the event stream, logs go to stderr
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Everything a run needs besides the engine itself
struct RunInput {
    organization_id: OrgId,
    initial_state: State,
    roots: Vec<StepNode>,
}

impl Args {
    fn load_input(&self) -> Result<RunInput> {
        let (file_org, file_state, roots) = WorkflowFile::load(&self.workflow)?.into_tree()?;

        let initial_state = match &self.state {
            Some(path) => load_state_file(path)?,
            None => file_state,
        };
        let organization_id = OrgId::new(
            self.organization
                .clone()
                .or(file_org)
                .unwrap_or_else(|| "local".to_string()),
        );

        Ok(RunInput {
            organization_id,
            initial_state,
            roots,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = CliConfig::load(&args.config)?;
    init_tracing(&config.logging);

    if args.config.exists() {
        tracing::info!("Loaded configuration from {}", args.config.display());
    } else {
        tracing::info!("Configuration file not found, using defaults");
    }

    let input = args.load_input()?;

    let registry = Arc::new(handlers::builtin_registry()?);
    let executor = WorkflowExecutor::new(registry).with_policy(config.executor.clone());

    let (sink, mut events) = ChannelSink::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("Failed to encode progress event: {}", e),
            }
            if event.is_stop() {
                break;
            }
        }
    });

    let outcome = executor
        .run(
            input.organization_id,
            input.initial_state,
            input.roots,
            Arc::new(handlers::EchoModel),
            Arc::new(sink),
        )
        .await;

    printer.await.context("Progress printer failed")?;

    let results = outcome.context("Workflow run rejected")?;
    println!("{}", serde_json::to_string_pretty(&results)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const WORKFLOW: &str = r#"{
        "organization_id": "acme",
        "initial_state": {"topic": "sunsets"},
        "steps": [{"id": "t", "kind": "TRIGGER", "identifier": "manual"}]
    }"#;

    fn write_workflow(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("workflow.json");
        std::fs::write(&path, WORKFLOW).unwrap();
        path
    }

    #[test]
    fn test_args_require_workflow_flag() {
        assert!(Args::try_parse_from(["flowtree"]).is_err());

        let args = Args::try_parse_from(["flowtree", "--workflow", "w.json", "-s", "s.json"]).unwrap();
        assert_eq!(args.workflow, PathBuf::from("w.json"));
        assert_eq!(args.state, Some(PathBuf::from("s.json")));
        assert_eq!(args.config, PathBuf::from("flowtree.toml"));
    }

    #[test]
    fn test_workflow_state_used_without_state_flag() {
        let temp_dir = TempDir::new().unwrap();
        let workflow = write_workflow(&temp_dir);

        let args = Args::try_parse_from(["flowtree", "--workflow", workflow.to_str().unwrap()])
            .unwrap();
        let input = args.load_input().unwrap();

        assert_eq!(input.initial_state.get_str("topic"), Some("sunsets"));
        assert_eq!(input.organization_id, OrgId::new("acme"));
        assert_eq!(input.roots.len(), 1);
    }

    #[test]
    fn test_state_flag_replaces_workflow_state() {
        let temp_dir = TempDir::new().unwrap();
        let workflow = write_workflow(&temp_dir);
        let state = temp_dir.path().join("state.json");
        std::fs::write(&state, r#"{"mood": "calm"}"#).unwrap();

        let args = Args::try_parse_from([
            "flowtree",
            "--workflow",
            workflow.to_str().unwrap(),
            "--state",
            state.to_str().unwrap(),
            "--organization",
            "globex",
        ])
        .unwrap();
        let input = args.load_input().unwrap();

        assert_eq!(input.initial_state, State::new().with("mood", "calm"));
        assert_eq!(input.organization_id, OrgId::new("globex"));
    }
}
