use crate::api::{ApiClient, ApiError};
use crate::channel::{CONNECT, DISCONNECT};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use swarm_core::wire::{event, Envelope, TogglePayload, WireMsg};
use swarm_core::{Agent, LogEntry, LogPayload, Task};
use tracing::{debug, warn};

/// Replace the task with the same id in place. Returns false for unknown ids.
pub fn replace_by_id(tasks: &mut [Task], index: &HashMap<String, usize>, task: Task) -> bool {
    match index.get(&task.id).and_then(|pos| tasks.get_mut(*pos)) {
        Some(slot) => {
            *slot = task;
            true
        }
        None => false,
    }
}

/// What a single inbound event did to the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub enum DashboardChange {
    TaskAdded(Task),
    TaskUpdated(Task),
    Log(LogEntry),
    Connection(bool),
    Unchanged,
}

#[derive(Debug, Default)]
pub struct DashboardView {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
    logs: Vec<LogEntry>,
    connected: bool,
    agents: Vec<Agent>,
    auto_trigger: bool,
    notice: Option<String>,
}

impl DashboardView {
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn auto_trigger(&self) -> bool {
        self.auto_trigger
    }

    /// Flip the local switch and build the request for the hub. Off by default.
    pub fn toggle_auto_trigger(&mut self, enabled: bool) -> WireMsg {
        self.auto_trigger = enabled;
        WireMsg::ToggleAutoTrigger(TogglePayload { enabled })
    }

    pub fn task_added(&mut self, task: Task) -> bool {
        if self.index.contains_key(&task.id) {
            debug!(event = "task_added_duplicate", task_id = %task.id);
            return false;
        }
        self.index.insert(task.id.clone(), self.tasks.len());
        self.tasks.push(task);
        true
    }

    pub fn task_updated(&mut self, task: Task) -> bool {
        let task_id = task.id.clone();
        let applied = replace_by_id(&mut self.tasks, &self.index, task);
        if !applied {
            debug!(event = "task_updated_unknown", task_id = %task_id);
        }
        applied
    }

    pub fn agent_log(&mut self, payload: LogPayload, at: DateTime<Utc>) -> LogEntry {
        let entry = LogEntry::received(payload, at);
        self.logs.push(entry.clone());
        entry
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn set_agents(&mut self, agents: Vec<Agent>) {
        self.agents = agents;
    }

    /// Merge one inbound event. Malformed payloads are dropped and logged.
    pub fn apply(&mut self, envelope: &Envelope, at: DateTime<Utc>) -> DashboardChange {
        match envelope.event.as_str() {
            CONNECT => {
                self.set_connected(true);
                DashboardChange::Connection(true)
            }
            DISCONNECT => {
                self.set_connected(false);
                DashboardChange::Connection(false)
            }
            event::TASK_ADDED => match envelope.decode_payload::<Task>() {
                Ok(task) => {
                    if self.task_added(task.clone()) {
                        DashboardChange::TaskAdded(task)
                    } else {
                        DashboardChange::Unchanged
                    }
                }
                Err(err) => drop_malformed(&err),
            },
            event::TASK_UPDATED => match envelope.decode_payload::<Task>() {
                Ok(task) => {
                    if self.task_updated(task.clone()) {
                        DashboardChange::TaskUpdated(task)
                    } else {
                        DashboardChange::Unchanged
                    }
                }
                Err(err) => drop_malformed(&err),
            },
            event::AGENT_LOG => match envelope.decode_payload::<LogPayload>() {
                Ok(payload) => DashboardChange::Log(self.agent_log(payload, at)),
                Err(err) => drop_malformed(&err),
            },
            _ => DashboardChange::Unchanged,
        }
    }

    /// Refresh the agent projection. A failed fetch keeps the previous list.
    pub async fn refresh_agents(&mut self, api: &ApiClient) -> Result<(), ApiError> {
        match api.list_agents().await {
            Ok(agents) => {
                self.set_agents(agents);
                Ok(())
            }
            Err(err) => {
                self.notice = Some(format!("could not load agents: {err}"));
                Err(err)
            }
        }
    }

    /// Create an agent. On failure the registry is untouched and the error is
    /// kept as the current notice.
    pub async fn create_agent(&mut self, api: &ApiClient, role: &str) -> Result<Agent, ApiError> {
        let outcome = api.create_agent(role).await;
        self.agent_created(role, outcome)
    }

    /// Merge the outcome of a create request made elsewhere.
    pub fn agent_created(
        &mut self,
        role: &str,
        outcome: Result<Agent, ApiError>,
    ) -> Result<Agent, ApiError> {
        match outcome {
            Ok(agent) => {
                self.notice = Some(format!("Agent {} deployed ({})", agent.role, agent.id));
                self.agents.push(agent.clone());
                Ok(agent)
            }
            Err(err) => {
                warn!(event = "agent_create_failed", role = role, error = %err);
                self.notice = Some(format!("Failed to create agent: {err}"));
                Err(err)
            }
        }
    }
}

fn drop_malformed(err: &swarm_core::wire::FrameError) -> DashboardChange {
    warn!(event = "payload_dropped", error = %err);
    DashboardChange::Unchanged
}
