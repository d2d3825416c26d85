use crate::state::State;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message recorded on a node whose handler exhausted every attempt
pub const NODE_FAILURE_MESSAGE: &str = "could not process node";

/// Unique identifier for one workflow run, used to correlate logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an organization
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgId(pub String);

impl OrgId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a workflow step
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category of a workflow step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    Trigger,
    ThirdParty,
    GenerateImage,
    GenerateVideo,
    Publish,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Trigger => "TRIGGER",
            StepKind::ThirdParty => "THIRD_PARTY",
            StepKind::GenerateImage => "GENERATE_IMAGE",
            StepKind::GenerateVideo => "GENERATE_VIDEO",
            StepKind::Publish => "PUBLISH",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node of the step tree handed to the executor.
///
/// `config` is kept as the raw JSON text the step was persisted with; the
/// executor parses it right before the node runs. An empty string stands for
/// an empty object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepNode {
    pub id: StepId,
    #[serde(default)]
    pub parent_id: Option<StepId>,
    pub kind: StepKind,
    pub identifier: String,
    #[serde(default)]
    pub config: String,
    #[serde(default)]
    pub children: Vec<StepNode>,
}

impl StepNode {
    pub fn new(id: impl Into<String>, kind: StepKind, identifier: impl Into<String>) -> Self {
        Self {
            id: StepId::new(id),
            parent_id: None,
            kind,
            identifier: identifier.into(),
            config: String::new(),
            children: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: impl Into<String>) -> Self {
        self.config = config.into();
        self
    }

    /// Append a child, wiring its parent id to this node
    pub fn with_child(mut self, mut child: StepNode) -> Self {
        child.parent_id = Some(self.id.clone());
        self.children.push(child);
        self
    }
}

/// Error recorded in place of a node whose handler never succeeded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: StepKind,
    pub identifier: String,
    pub message: String,
}

/// Outcome of one node, mirroring the shape of the step tree.
///
/// Failed nodes carry no children: their subtree never ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecutionResult {
    Completed {
        kind: StepKind,
        identifier: String,
        value: State,
        children: Vec<ExecutionResult>,
    },
    Failed {
        error: ErrorRecord,
    },
}

impl ExecutionResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, ExecutionResult::Failed { .. })
    }

    pub fn kind(&self) -> StepKind {
        match self {
            ExecutionResult::Completed { kind, .. } => *kind,
            ExecutionResult::Failed { error } => error.kind,
        }
    }

    pub fn value(&self) -> Option<&State> {
        match self {
            ExecutionResult::Completed { value, .. } => Some(value),
            ExecutionResult::Failed { .. } => None,
        }
    }

    pub fn children(&self) -> &[ExecutionResult] {
        match self {
            ExecutionResult::Completed { children, .. } => children,
            ExecutionResult::Failed { .. } => &[],
        }
    }

    pub fn error(&self) -> Option<&ErrorRecord> {
        match self {
            ExecutionResult::Completed { .. } => None,
            ExecutionResult::Failed { error } => Some(error),
        }
    }
}

/// Node counts over a finished result tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn from_results(results: &[ExecutionResult]) -> Self {
        let mut summary = Self::default();
        summary.accumulate(results);
        summary
    }

    fn accumulate(&mut self, results: &[ExecutionResult]) {
        for result in results {
            match result {
                ExecutionResult::Completed { children, .. } => {
                    self.completed += 1;
                    self.accumulate(children);
                }
                ExecutionResult::Failed { .. } => self.failed += 1,
            }
        }
    }

    pub fn total(&self) -> usize {
        self.completed + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_kind_wire_names() {
        assert_eq!(
            serde_json::to_value(StepKind::GenerateImage).unwrap(),
            json!("GENERATE_IMAGE")
        );
        let kind: StepKind = serde_json::from_value(json!("THIRD_PARTY")).unwrap();
        assert_eq!(kind, StepKind::ThirdParty);
        assert_eq!(StepKind::Publish.to_string(), "PUBLISH");
    }

    #[test]
    fn test_execution_result_shapes() {
        let failed = ExecutionResult::Failed {
            error: ErrorRecord {
                kind: StepKind::Publish,
                identifier: "instagram".to_string(),
                message: NODE_FAILURE_MESSAGE.to_string(),
            },
        };
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({
                "error": {
                    "kind": "PUBLISH",
                    "identifier": "instagram",
                    "message": "could not process node"
                }
            })
        );
        assert!(failed.children().is_empty());

        let completed = ExecutionResult::Completed {
            kind: StepKind::Trigger,
            identifier: "manual".to_string(),
            value: State::new(),
            children: vec![failed],
        };
        let encoded = serde_json::to_value(&completed).unwrap();
        assert_eq!(encoded["kind"], json!("TRIGGER"));
        assert_eq!(encoded["value"], json!({}));
        assert_eq!(encoded["children"][0]["error"]["kind"], json!("PUBLISH"));
    }

    #[test]
    fn test_run_summary_counts_nested_nodes() {
        let leaf = |kind| ExecutionResult::Completed {
            kind,
            identifier: "x".to_string(),
            value: State::new(),
            children: vec![],
        };
        let results = vec![ExecutionResult::Completed {
            kind: StepKind::Trigger,
            identifier: "manual".to_string(),
            value: State::new(),
            children: vec![
                leaf(StepKind::GenerateImage),
                ExecutionResult::Failed {
                    error: ErrorRecord {
                        kind: StepKind::GenerateVideo,
                        identifier: "x".to_string(),
                        message: NODE_FAILURE_MESSAGE.to_string(),
                    },
                },
            ],
        }];

        let summary = RunSummary::from_results(&results);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total(), 3);
    }

    #[test]
    fn test_step_node_builder_links_parent() {
        let root = StepNode::new("root", StepKind::Trigger, "manual")
            .with_child(StepNode::new("img", StepKind::GenerateImage, "dalle"));
        assert_eq!(root.children[0].parent_id, Some(StepId::new("root")));
        assert!(root.parent_id.is_none());
    }
}
