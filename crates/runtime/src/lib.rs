//! Request orchestration: triage → tool loop → execution → response.

mod orchestrator;
mod presenter;
mod tool_loop;

pub use orchestrator::{Orchestrator, RequestOptions};
pub use presenter::{Language, Presenter};
pub use tool_loop::{
    ToolDispatcher, ToolExecutionRecord, ToolLoopOutcome, is_termination_message,
    json_args_to_map, run_tool_loop, strip_termination,
};
