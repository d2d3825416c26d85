// Tree-walking workflow execution engine

pub mod executor;
pub mod registry;
pub mod tree;

pub use executor::{ExecutionPolicy, WorkflowExecutor, MAX_ATTEMPTS};
pub use registry::{HandlerRegistry, StepHandler};
pub use tree::{build_tree, count_nodes, StepRow};
