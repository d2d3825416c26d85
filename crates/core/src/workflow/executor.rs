use super::registry::{HandlerRegistry, StepHandler};
use crate::error::{WorkflowError, WorkflowResult};
use crate::events::{ProgressEvent, ProgressSink};
use crate::model::ModelHandle;
use crate::state::State;
use crate::types::{
    ErrorRecord, ExecutionResult, OrgId, RunId, RunSummary, StepNode, NODE_FAILURE_MESSAGE,
};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

/// Total handler invocations allowed per node, first try included
pub const MAX_ATTEMPTS: u32 = 3;

/// Tunables for a workflow executor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    /// Cap on handler invocations in flight across a whole run.
    /// `None` lets every node of a level run at once.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

impl ExecutionPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn limited(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: Some(max_concurrency),
        }
    }
}

/// Walks a step tree, running each node's handler and threading state from
/// parents to children.
///
/// Nodes of one level run concurrently. A node whose handler keeps failing is
/// recorded as an error and its subtree is skipped; its siblings carry on.
pub struct WorkflowExecutor {
    registry: Arc<HandlerRegistry>,
    policy: ExecutionPolicy,
}

impl WorkflowExecutor {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            policy: ExecutionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// Execute a step tree and return its result tree.
    ///
    /// Once the tree settles, successfully or not, a single `stop` event is
    /// published to `sink`; it is the last event of the run.
    pub async fn run(
        &self,
        organization_id: OrgId,
        initial_state: State,
        root_steps: Vec<StepNode>,
        model: ModelHandle,
        sink: Arc<dyn ProgressSink>,
    ) -> WorkflowResult<Vec<ExecutionResult>> {
        let run_id = RunId::new();
        let started = std::time::Instant::now();

        let ctx = Arc::new(RunContext {
            registry: self.registry.clone(),
            organization_id,
            model,
            sink,
            closed: RwLock::new(false),
            permits: self
                .policy
                .max_concurrency
                .map(|limit| Arc::new(Semaphore::new(limit.max(1)))),
        });

        let span = tracing::info_span!("run", run_id = %run_id, org = %ctx.organization_id);
        let outcome = async {
            tracing::info!(
                "Starting workflow execution: {} root step(s), model {}",
                root_steps.len(),
                ctx.model.name()
            );
            run_level(ctx.clone(), Arc::new(initial_state), root_steps).await
        }
        .instrument(span.clone())
        .await;

        ctx.close();

        let _entered = span.enter();
        match &outcome {
            Ok(results) => {
                let summary = RunSummary::from_results(results);
                tracing::info!(
                    completed = summary.completed,
                    failed = summary.failed,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Workflow execution finished"
                );
            }
            Err(e) => {
                tracing::error!("Workflow execution rejected: {}", e);
            }
        }

        outcome
    }
}

/// Context shared by every node of one run
struct RunContext {
    registry: Arc<HandlerRegistry>,
    organization_id: OrgId,
    model: ModelHandle,
    sink: Arc<dyn ProgressSink>,
    /// Set once `stop` went out; aborted tasks still winding down publish nothing
    closed: RwLock<bool>,
    permits: Option<Arc<Semaphore>>,
}

/// A node whose handler is resolved and whose config is parsed
struct PreparedStep {
    node: StepNode,
    handler: Arc<dyn StepHandler>,
    config: serde_json::Value,
}

impl RunContext {
    fn publish(&self, event: ProgressEvent) {
        let closed = self
            .closed
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *closed {
            tracing::debug!("Run already stopped, discarding event");
            return;
        }
        self.sink.publish(event);
    }

    /// Publish the final `stop` event and drop everything published after it
    fn close(&self) {
        let mut closed = self
            .closed
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !*closed {
            *closed = true;
            self.sink.publish(ProgressEvent::Stop);
        }
    }

    /// Resolve the handler and parse the config of a node.
    ///
    /// Runs for every node of a level before any of them starts, so a
    /// failure here leaves the whole level untouched.
    fn prepare(&self, node: StepNode) -> WorkflowResult<PreparedStep> {
        let handler = self.registry.resolve(node.kind, &node.identifier)?;

        let malformed = |reason: String| WorkflowError::ConfigMalformed {
            step_id: node.id.clone(),
            kind: node.kind,
            identifier: node.identifier.clone(),
            reason,
        };

        let config = if node.config.trim().is_empty() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(&node.config).map_err(|e| malformed(e.to_string()))?
        };

        handler
            .check_config(&config)
            .map_err(|e| malformed(format!("{:#}", e)))?;

        Ok(PreparedStep {
            node,
            handler,
            config,
        })
    }

    /// Invoke a handler until it succeeds or runs out of attempts.
    ///
    /// A panicking handler counts as a failed attempt.
    async fn attempt(
        &self,
        handler: &dyn StepHandler,
        config: &serde_json::Value,
        state: &State,
    ) -> anyhow::Result<State> {
        let _permit = match &self.permits {
            Some(permits) => permits.acquire().await.ok(),
            None => None,
        };

        let mut attempt = 1;
        loop {
            tracing::debug!(attempt, "Invoking handler");
            let outcome =
                AssertUnwindSafe(handler.process(config, state, &self.organization_id, &self.model))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(panic_error(payload)));

            match outcome {
                Ok(partial) => return Ok(partial),
                Err(e) if attempt < MAX_ATTEMPTS => {
                    tracing::warn!(
                        attempt,
                        max_attempts = MAX_ATTEMPTS,
                        error = %e,
                        "Handler failed, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn panic_error(payload: Box<dyn std::any::Any + Send>) -> anyhow::Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    anyhow::anyhow!("handler panicked: {}", message)
}

/// Run every node of one level concurrently and collect their results in
/// input order
fn run_level(
    ctx: Arc<RunContext>,
    state: Arc<State>,
    nodes: Vec<StepNode>,
) -> BoxFuture<'static, WorkflowResult<Vec<ExecutionResult>>> {
    async move {
        if nodes.is_empty() {
            return Ok(Vec::new());
        }

        let prepared = nodes
            .into_iter()
            .map(|node| ctx.prepare(node))
            .collect::<WorkflowResult<Vec<_>>>()?;

        let width = prepared.len();
        let mut tasks = JoinSet::new();

        for (position, step) in prepared.into_iter().enumerate() {
            let span = tracing::info_span!(
                "step",
                step_id = %step.node.id,
                kind = %step.node.kind,
                identifier = %step.node.identifier
            );
            let ctx = ctx.clone();
            let state = state.clone();
            tasks.spawn(
                async move { (position, run_node(ctx, state, step).await) }.instrument(span),
            );
        }

        let mut results: Vec<Option<ExecutionResult>> = (0..width).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok((position, Ok(result))) => {
                    results[position] = Some(result);
                    continue;
                }
                Ok((_, Err(e))) => e,
                Err(join_err) => WorkflowError::TaskFailed(join_err),
            };

            // Tasks nested under aborted siblings may still be mid-poll; the
            // closed flag keeps their events from landing after `stop`
            tasks.shutdown().await;
            return Err(failure);
        }

        Ok(results.into_iter().flatten().collect())
    }
    .boxed()
}

async fn run_node(
    ctx: Arc<RunContext>,
    state: Arc<State>,
    step: PreparedStep,
) -> WorkflowResult<ExecutionResult> {
    let PreparedStep {
        node,
        handler,
        config,
    } = step;

    ctx.publish(ProgressEvent::Start {
        kind: node.kind,
        identifier: node.identifier.clone(),
        state: (*state).clone(),
    });

    match ctx.attempt(handler.as_ref(), &config, &state).await {
        Ok(partial) => {
            let merged = Arc::new(state.merged(&partial));
            let children = run_level(ctx.clone(), merged, node.children).await?;

            Ok(ExecutionResult::Completed {
                kind: node.kind,
                identifier: node.identifier,
                value: partial,
                children,
            })
        }
        Err(e) => {
            let message = format!("{:#}", e);
            tracing::error!(
                attempts = MAX_ATTEMPTS,
                skipped_children = node.children.len(),
                "Step failed: {}",
                message
            );

            ctx.publish(ProgressEvent::Error {
                identifier: node.identifier.clone(),
                message,
            });

            Ok(ExecutionResult::Failed {
                error: ErrorRecord {
                    kind: node.kind,
                    identifier: node.identifier,
                    message: NODE_FAILURE_MESSAGE.to_string(),
                },
            })
        }
    }
}
