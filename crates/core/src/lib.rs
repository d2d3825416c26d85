// Core types and execution engine for flowtree automation workflows

pub mod error;
pub mod events;
pub mod model;
pub mod state;
pub mod types;
pub mod workflow;

pub use error::{WorkflowError, WorkflowResult};
pub use events::{BroadcastSink, ChannelSink, ProgressEvent, ProgressSink, RecordingSink};
pub use model::{ModelHandle, TextModel};
pub use state::State;
pub use types::*;
pub use workflow::{ExecutionPolicy, HandlerRegistry, StepHandler, WorkflowExecutor};
