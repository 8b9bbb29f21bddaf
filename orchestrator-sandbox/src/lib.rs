//! Code-Chat Agent: a ReAct loop for a developer-assistant mode that reuses
//! the orchestrator core's Selector and Inference Client (spec §4.12).

pub mod agent;
pub mod error;
pub mod tools;

pub use agent::{AgentState, CodeChatAgent, CodeChatRequest, CodeChatResult, PlannerModelCaller, ReActStep};
pub use error::{SandboxError, SandboxResult};
pub use tools::{Tool, ToolRegistry};
