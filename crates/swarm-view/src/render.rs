//! Plain-text lines for the terminal views.

use crate::dashboard::DashboardChange;
use crate::node::NodeChange;
use swarm_core::{Agent, LogEntry, Task};

pub fn task_line(task: &Task) -> String {
    let mut line = format!("[{}] {} ({}) {}", task.status, task.id, task.role, task.description);
    if !task.dependencies.is_empty() {
        line.push_str(&format!(" after {}", task.dependencies.join(",")));
    }
    if let Some(result) = &task.result {
        line.push_str(&format!(" => {result}"));
    }
    line
}

pub fn log_line(entry: &LogEntry) -> String {
    format!(
        "{} {}: {}",
        entry.timestamp.format("%H:%M:%S"),
        entry.agent,
        entry.message
    )
}

pub fn connection_line(connected: bool) -> String {
    if connected {
        "-- connected".to_string()
    } else {
        "-- disconnected, reconnecting".to_string()
    }
}

pub fn agent_line(agent: &Agent) -> String {
    format!(
        "agent {} ({}) {}{}",
        agent.id,
        agent.role,
        agent.status,
        agent
            .window_id
            .as_deref()
            .map(|window| format!(" window={window}"))
            .unwrap_or_default()
    )
}

pub fn dashboard_line(change: &DashboardChange) -> Option<String> {
    match change {
        DashboardChange::TaskAdded(task) => Some(format!("+ {}", task_line(task))),
        DashboardChange::TaskUpdated(task) => Some(format!("~ {}", task_line(task))),
        DashboardChange::Log(entry) => Some(log_line(entry)),
        DashboardChange::Connection(connected) => Some(connection_line(*connected)),
        DashboardChange::Unchanged => None,
    }
}

pub fn node_line(change: &NodeChange) -> Option<String> {
    match change {
        NodeChange::Log(entry) => Some(log_line(entry)),
        NodeChange::Status(status) => Some(format!("-- status: {status}")),
        NodeChange::Mission(task) => Some(format!("MISSION RECEIVED: {}", task.description)),
        NodeChange::Connection(connected) => Some(connection_line(*connected)),
        NodeChange::Unchanged => None,
    }
}
