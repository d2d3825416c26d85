use crate::error::{WorkflowError, WorkflowResult};
use crate::types::{StepId, StepKind, StepNode};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A step as persisted: flat, pointing at its parent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRow {
    pub id: StepId,
    #[serde(default)]
    pub parent_id: Option<StepId>,
    pub kind: StepKind,
    pub identifier: String,
    #[serde(default)]
    pub config: String,
}

impl StepRow {
    /// An absent or empty parent id marks a root
    fn parent(&self) -> Option<&StepId> {
        self.parent_id.as_ref().filter(|p| !p.0.is_empty())
    }
}

/// Assemble flat rows into step trees.
///
/// Children keep the relative order of their rows. Rejects duplicate ids,
/// dangling parent ids and cycles.
pub fn build_tree(rows: Vec<StepRow>) -> WorkflowResult<Vec<StepNode>> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let mut indices: HashMap<StepId, NodeIndex> = HashMap::new();

    for (position, row) in rows.iter().enumerate() {
        if indices.contains_key(&row.id) {
            return Err(WorkflowError::InvalidTree(format!(
                "step {} defined more than once",
                row.id
            )));
        }
        indices.insert(row.id.clone(), graph.add_node(position));
    }

    let mut children: HashMap<StepId, Vec<usize>> = HashMap::new();
    let mut roots = Vec::new();

    for (position, row) in rows.iter().enumerate() {
        match row.parent() {
            None => roots.push(position),
            Some(parent) => {
                let parent_idx = indices.get(parent).ok_or_else(|| {
                    WorkflowError::InvalidTree(format!(
                        "step {} references unknown parent {}",
                        row.id, parent
                    ))
                })?;
                // Edge from parent to child
                graph.add_edge(*parent_idx, indices[&row.id], ());
                children.entry(parent.clone()).or_default().push(position);
            }
        }
    }

    if petgraph::algo::is_cyclic_directed(&graph) {
        return Err(WorkflowError::InvalidTree(
            "step tree contains a cycle".to_string(),
        ));
    }

    let mut slots: Vec<Option<StepRow>> = rows.into_iter().map(Some).collect();
    roots
        .into_iter()
        .map(|position| assemble(position, &mut slots, &children))
        .collect()
}

fn assemble(
    position: usize,
    slots: &mut [Option<StepRow>],
    children: &HashMap<StepId, Vec<usize>>,
) -> WorkflowResult<StepNode> {
    let row = slots[position].take().ok_or_else(|| {
        WorkflowError::InvalidTree(format!("step at row {} reached twice", position))
    })?;

    let child_nodes = children
        .get(&row.id)
        .map(|positions| {
            positions
                .iter()
                .map(|&child| assemble(child, slots, children))
                .collect::<WorkflowResult<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();

    Ok(StepNode {
        parent_id: row.parent().cloned(),
        id: row.id,
        kind: row.kind,
        identifier: row.identifier,
        config: row.config,
        children: child_nodes,
    })
}

/// Count every node of a forest
pub fn count_nodes(nodes: &[StepNode]) -> usize {
    nodes
        .iter()
        .map(|node| 1 + count_nodes(&node.children))
        .sum()
}
