//! Code-Chat Agent: ReAct loop over the tool registry (spec §4.12).
//!
//! State machine: PLANNING -> EXECUTING -> OBSERVING -> (PLANNING | COMPLETED
//! | ERROR | CANCELLED). Decoupled from the inference backend the same way
//! the Dialogue Engine decouples from it via `DebateModelCaller`.

use crate::error::{SandboxError, SandboxResult};
use crate::tools::ToolRegistry;
use async_trait::async_trait;
use orchestrator_core::event_bus::EventBus;
use orchestrator_types::{EventType, Severity, SystemEvent};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

const MAX_ITERATIONS: usize = 10;
const CONFIRMATION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5 * 60);
const PLANNER_MAX_TOKENS: u32 = 600;

static ACTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)Thought:\s*(?P<thought>.*?)\nAction:\s*(?P<tool>\w+)\((?P<args>.*?)\)\s*$").unwrap());
static ANSWER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)Thought:\s*(?P<thought>.*?)\nAnswer:\s*(?P<answer>.*)$").unwrap());
static KWARG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?P<key>\w+)\s*=\s*"(?P<value>(?:[^"\\]|\\.)*)""#).unwrap());

#[async_trait]
pub trait PlannerModelCaller: Send + Sync {
    async fn call(&self, prompt: &str, max_tokens: u32) -> SandboxResult<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    Planning,
    Executing,
    Observing,
    Completed,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub args: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReActStep {
    pub state: AgentState,
    pub thought: Option<String>,
    pub action: Option<ToolInvocation>,
    pub observation: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct CodeChatRequest {
    pub query: String,
    pub workspace_root: PathBuf,
    pub max_iterations: usize,
}

impl CodeChatRequest {
    pub fn new(query: impl Into<String>, workspace_root: PathBuf) -> Self {
        Self { query: query.into(), workspace_root, max_iterations: MAX_ITERATIONS }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CodeChatResult {
    pub steps: Vec<ReActStep>,
    pub answer: Option<String>,
    pub final_state: AgentState,
}

enum PlannerOutput {
    Action { thought: String, tool: String, args: Value },
    Answer { thought: String, answer: String },
}

fn parse_planner_output(raw: &str) -> SandboxResult<PlannerOutput> {
    let trimmed = raw.trim();
    if let Some(caps) = ACTION_PATTERN.captures(trimmed) {
        let thought = caps["thought"].trim().to_string();
        let tool = caps["tool"].to_string();
        let args_str = &caps["args"];
        let mut args = serde_json::Map::new();
        for kwarg in KWARG_PATTERN.captures_iter(args_str) {
            args.insert(kwarg["key"].to_string(), Value::String(kwarg["value"].replace("\\\"", "\"")));
        }
        return Ok(PlannerOutput::Action { thought, tool, args: Value::Object(args) });
    }
    if let Some(caps) = ANSWER_PATTERN.captures(trimmed) {
        return Ok(PlannerOutput::Answer {
            thought: caps["thought"].trim().to_string(),
            answer: caps["answer"].trim().to_string(),
        });
    }
    Err(SandboxError::UnparseablePlan(trimmed.to_string()))
}

const SYSTEM_PROMPT_PREAMBLE: &str = "You are an expert coding assistant with access to tools.\n\nRespond in EXACTLY one of these two formats:\n\nThought: <reasoning>\nAction: tool_name(arg1=\"value1\", arg2=\"value2\")\n\nor\n\nThought: <summary>\nAnswer: <final response>\n";

fn build_planner_prompt(tools_description: &str, history: &[ReActStep], query: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(SYSTEM_PROMPT_PREAMBLE);
    prompt.push_str("\nAvailable tools:\n");
    prompt.push_str(tools_description);
    prompt.push_str("\n\nUser request: ");
    prompt.push_str(query);
    for step in history {
        if let Some(thought) = &step.thought {
            prompt.push_str(&format!("\nThought: {thought}"));
        }
        if let Some(action) = &step.action {
            prompt.push_str(&format!("\nAction: {}({})", action.tool, action.args));
        }
        if let Some(observation) = &step.observation {
            prompt.push_str(&format!("\nObservation: {observation}"));
        }
    }
    prompt.push('\n');
    prompt
}

pub struct CodeChatAgent {
    tools: ToolRegistry,
    event_bus: EventBus,
    pending_confirmations: Mutex<HashMap<uuid::Uuid, oneshot::Sender<bool>>>,
}

impl CodeChatAgent {
    pub fn new(tools: ToolRegistry, event_bus: EventBus) -> Self {
        Self { tools, event_bus, pending_confirmations: Mutex::new(HashMap::new()) }
    }

    /// Called by the confirmation channel (CLI, UI) in response to an
    /// `ActionPending` event carrying this `action_id`.
    pub async fn submit_confirmation(&self, action_id: uuid::Uuid, approved: bool) -> bool {
        let mut pending = self.pending_confirmations.lock().await;
        match pending.remove(&action_id) {
            Some(tx) => tx.send(approved).is_ok(),
            None => false,
        }
    }

    async fn wait_for_confirmation(&self, action_id: uuid::Uuid, tool: &str, args: &Value) -> SandboxResult<bool> {
        let (tx, rx) = oneshot::channel();
        self.pending_confirmations.lock().await.insert(action_id, tx);

        self.event_bus
            .publish(
                SystemEvent::new(EventType::ActionPending, Severity::Warning, format!("confirmation required for {tool}"))
                    .with_metadata("actionId", action_id.to_string())
                    .with_metadata("tool", tool)
                    .with_metadata("args", args.clone()),
            )
            .await;

        match tokio::time::timeout(CONFIRMATION_TIMEOUT, rx).await {
            Ok(Ok(approved)) => Ok(approved),
            Ok(Err(_)) | Err(_) => {
                self.pending_confirmations.lock().await.remove(&action_id);
                Err(SandboxError::ConfirmationTimeout(CONFIRMATION_TIMEOUT))
            }
        }
    }

    pub async fn run(
        &self,
        caller: &dyn PlannerModelCaller,
        request: CodeChatRequest,
        cancel: Arc<AtomicBool>,
    ) -> SandboxResult<CodeChatResult> {
        let tools_description = self.tools.describe_all();
        let mut steps: Vec<ReActStep> = Vec::new();
        let max_iterations = request.max_iterations.max(1);

        for iteration in 0..max_iterations {
            if cancel.load(Ordering::SeqCst) {
                self.emit_state_change(AgentState::Cancelled).await;
                return Ok(CodeChatResult { steps, answer: None, final_state: AgentState::Cancelled });
            }

            self.emit_state_change(AgentState::Planning).await;
            let prompt = build_planner_prompt(&tools_description, &steps, &request.query);
            let raw = caller.call(&prompt, PLANNER_MAX_TOKENS).await?;
            let parsed = match parse_planner_output(&raw) {
                Ok(p) => p,
                Err(e) => {
                    warn!(iteration, error = %e, "planner returned an unparseable response");
                    self.emit_state_change(AgentState::Error).await;
                    return Ok(CodeChatResult { steps, answer: None, final_state: AgentState::Error });
                }
            };

            match parsed {
                PlannerOutput::Answer { thought, answer } => {
                    steps.push(ReActStep { state: AgentState::Completed, thought: Some(thought), action: None, observation: None });
                    self.emit_state_change(AgentState::Completed).await;
                    return Ok(CodeChatResult { steps, answer: Some(answer), final_state: AgentState::Completed });
                }
                PlannerOutput::Action { thought, tool, args } => {
                    if cancel.load(Ordering::SeqCst) {
                        self.emit_state_change(AgentState::Cancelled).await;
                        return Ok(CodeChatResult { steps, answer: None, final_state: AgentState::Cancelled });
                    }

                    self.emit_state_change(AgentState::Executing).await;
                    let observation = self.execute_action(&tool, &args, &cancel).await;

                    let (observation_value, terminal) = match observation {
                        Ok(value) => (value, None),
                        Err(SandboxError::ActionRejected) => {
                            (Value::String("action rejected by user".to_string()), None)
                        }
                        Err(e) => (Value::Null, Some(e)),
                    };

                    self.emit_state_change(AgentState::Observing).await;
                    steps.push(ReActStep {
                        state: AgentState::Observing,
                        thought: Some(thought),
                        action: Some(ToolInvocation { tool: tool.clone(), args }),
                        observation: Some(observation_value),
                    });

                    if let Some(e) = terminal {
                        warn!(tool, error = %e, "tool execution failed");
                        self.emit_state_change(AgentState::Error).await;
                        return Ok(CodeChatResult { steps, answer: None, final_state: AgentState::Error });
                    }
                }
            }
        }

        info!(max_iterations, "code-chat agent exhausted its iteration budget");
        Ok(CodeChatResult { steps, answer: None, final_state: AgentState::Error })
    }

    async fn execute_action(&self, tool_name: &str, args: &Value, cancel: &Arc<AtomicBool>) -> SandboxResult<Value> {
        let tool = self.tools.get(tool_name)?;

        if tool.requires_confirmation() {
            let action_id = uuid::Uuid::new_v4();
            let approved = self.wait_for_confirmation(action_id, tool_name, args).await?;
            if cancel.load(Ordering::SeqCst) {
                return Err(SandboxError::Cancelled);
            }
            if !approved {
                return Err(SandboxError::ActionRejected);
            }
        }

        tool.execute(args.clone()).await
    }

    async fn emit_state_change(&self, state: AgentState) {
        self.event_bus
            .publish(
                SystemEvent::new(EventType::AgentStateChange, Severity::Info, format!("agent state: {state:?}"))
                    .with_metadata("state", format!("{state:?}")),
            )
            .await;
    }
}
