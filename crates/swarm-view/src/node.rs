//! Per-agent view: role-filtered logs, the single current mission and the
//! completion round-trip.

use crate::api::{ApiClient, ApiError};
use crate::channel::{CONNECT, DISCONNECT};
use chrono::{DateTime, Utc};
use swarm_core::wire::{event, Envelope, TaskAssignedPayload, WireMsg};
use swarm_core::{Agent, AgentStatus, LogEntry, LogPayload, Task, SYSTEM_AGENT};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Input prefix that reports the current mission as done.
pub const DONE_COMMAND: &str = "/done";

/// Node log filter: the view's own role or the System sentinel, case-sensitive.
pub fn accepts_log(role: &str, author: &str) -> bool {
    author == role || author == SYSTEM_AGENT
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("no task is currently assigned")]
    NoCurrentTask,
    #[error("task {0} is already being reported")]
    AlreadyReporting(String),
    #[error("completion for {got} does not match the report in flight ({expected:?})")]
    TaskMismatch { expected: Option<String>, got: String },
    #[error("completion failed: {0}")]
    SubmissionFailed(#[from] ApiError),
}

/// A completion ready to be sent to the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub task_id: String,
    pub result: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeChange {
    Log(LogEntry),
    Status(AgentStatus),
    Mission(Task),
    Connection(bool),
    Unchanged,
}

#[derive(Debug)]
pub struct NodeView {
    agent_id: String,
    role: String,
    logs: Vec<LogEntry>,
    status: AgentStatus,
    current_task: Option<Task>,
    reporting: Option<String>,
    connected: bool,
    notice: Option<String>,
}

impl NodeView {
    pub fn new(agent_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            role: role.into(),
            logs: Vec::new(),
            status: AgentStatus::Idle,
            current_task: None,
            reporting: None,
            connected: false,
            notice: None,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn current_task(&self) -> Option<&Task> {
        self.current_task.as_ref()
    }

    pub fn is_reporting(&self) -> bool {
        self.reporting.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn agent_log(&mut self, payload: LogPayload, at: DateTime<Utc>) -> Option<LogEntry> {
        if !accepts_log(&self.role, &payload.agent) {
            return None;
        }
        let entry = LogEntry::received(payload, at);
        self.logs.push(entry.clone());
        Some(entry)
    }

    pub fn agent_updated(&mut self, agent: Agent) -> bool {
        if agent.id != self.agent_id {
            return false;
        }
        self.status = agent.status;
        true
    }

    /// Replace the current mission unconditionally and note it locally.
    pub fn task_assigned(&mut self, payload: TaskAssignedPayload, at: DateTime<Utc>) -> Task {
        let task = payload.task;
        info!(event = "mission_received", agent_id = %self.agent_id, task_id = %task.id);
        self.logs.push(LogEntry::received(
            LogPayload::system(format!("MISSION RECEIVED: {}", task.description)),
            at,
        ));
        self.current_task = Some(task.clone());
        task
    }

    pub fn apply(&mut self, envelope: &Envelope, at: DateTime<Utc>) -> NodeChange {
        match envelope.event.as_str() {
            CONNECT | DISCONNECT => {
                self.connected = envelope.event == CONNECT;
                NodeChange::Connection(self.connected)
            }
            event::AGENT_LOG => match envelope.decode_payload::<LogPayload>() {
                Ok(payload) => match self.agent_log(payload, at) {
                    Some(entry) => NodeChange::Log(entry),
                    None => NodeChange::Unchanged,
                },
                Err(err) => dropped(&err),
            },
            event::AGENT_UPDATED => match envelope.decode_payload::<Agent>() {
                Ok(agent) => {
                    if self.agent_updated(agent) {
                        NodeChange::Status(self.status)
                    } else {
                        NodeChange::Unchanged
                    }
                }
                Err(err) => dropped(&err),
            },
            event::TASK_ASSIGNED => match envelope.decode_payload::<TaskAssignedPayload>() {
                Ok(payload) => NodeChange::Mission(self.task_assigned(payload, at)),
                Err(err) => dropped(&err),
            },
            _ => NodeChange::Unchanged,
        }
    }

    /// Start reporting the current mission. Only one report may be in flight.
    pub fn begin_completion(&mut self, result: &str) -> Result<CompletionRequest, CompletionError> {
        if let Some(task_id) = &self.reporting {
            return Err(CompletionError::AlreadyReporting(task_id.clone()));
        }
        let task = self
            .current_task
            .as_ref()
            .ok_or(CompletionError::NoCurrentTask)?;
        self.reporting = Some(task.id.clone());
        self.notice = None;
        Ok(CompletionRequest {
            task_id: task.id.clone(),
            result: result.to_string(),
        })
    }

    /// Settle the report started by [`begin_completion`](Self::begin_completion).
    ///
    /// Success clears the mission if it is still the one reported; failure
    /// keeps it and leaves the view ready to retry.
    pub fn finish_completion(
        &mut self,
        task_id: &str,
        outcome: Result<(), ApiError>,
    ) -> Result<(), CompletionError> {
        if self.reporting.as_deref() != Some(task_id) {
            return Err(CompletionError::TaskMismatch {
                expected: self.reporting.clone(),
                got: task_id.to_string(),
            });
        }
        self.reporting = None;
        match outcome {
            Ok(()) => {
                if self.current_task.as_ref().map(|task| task.id.as_str()) == Some(task_id) {
                    self.current_task = None;
                } else {
                    debug!(event = "completion_superseded", task_id = task_id);
                }
                self.notice = Some(format!("Task {task_id} reported complete."));
                Ok(())
            }
            Err(err) => {
                warn!(event = "completion_failed", task_id = task_id, error = %err);
                self.notice = Some(format!("Failed to report task {task_id}: {err}"));
                Err(CompletionError::SubmissionFailed(err))
            }
        }
    }

    /// Full completion round-trip against the hub.
    pub async fn submit_completion(&mut self, api: &ApiClient, result: &str) -> Result<(), CompletionError> {
        let request = self.begin_completion(result)?;
        let outcome = api
            .submit_task_completion(&request.task_id, &request.result)
            .await;
        self.finish_completion(&request.task_id, outcome)
    }

    /// Log message tagged with this view's role. Not appended locally; it
    /// comes back through the hub like any other log.
    pub fn broadcast_message(&self, text: &str) -> WireMsg {
        WireMsg::AgentLog(LogPayload::new(self.role.clone(), text))
    }
}

fn dropped(err: &swarm_core::wire::FrameError) -> NodeChange {
    warn!(event = "payload_dropped", error = %err);
    NodeChange::Unchanged
}
