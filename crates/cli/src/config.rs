use anyhow::{Context, Result};
use flowtree_core::workflow::{build_tree, StepRow};
use flowtree_core::{ExecutionPolicy, State, StepNode};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub executor: ExecutionPolicy,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,

    #[serde(default)]
    pub json: bool,
}

fn default_log_filter() -> String {
    "flowtree=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

impl CliConfig {
    /// Load the config file if it exists, otherwise use defaults
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .context("Failed to read configuration file")?;
        let config: Self =
            toml::from_str(&content).context("Failed to parse configuration file")?;

        if config.executor.max_concurrency == Some(0) {
            anyhow::bail!("executor.max_concurrency must be at least 1");
        }

        Ok(config)
    }
}

/// A workflow definition as stored on disk: flat step rows plus the
/// context the run starts from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowFile {
    #[serde(default)]
    pub organization_id: Option<String>,

    #[serde(default)]
    pub initial_state: State,

    pub steps: Vec<StepRow>,
}

impl WorkflowFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse workflow file {}", path.display()))
    }

    /// Assemble the step rows into a single-rooted tree
    pub fn into_tree(self) -> Result<(Option<String>, State, Vec<StepNode>)> {
        let roots = build_tree(self.steps).context("Failed to assemble step tree")?;
        if roots.len() != 1 {
            anyhow::bail!("workflow must have exactly one root step, found {}", roots.len());
        }
        Ok((self.organization_id, self.initial_state, roots))
    }
}

/// Load an initial state file, which must hold a single JSON object
pub fn load_state_file(path: &Path) -> Result<State> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read state file {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse state file {}", path.display()))?;
    State::from_value(value)
        .with_context(|| format!("State file {} must contain a JSON object", path.display()))
}
