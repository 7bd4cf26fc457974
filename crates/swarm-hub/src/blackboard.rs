//! Authoritative task list and agent registry. Every mutation returns the
//! events it produced so the caller can publish them in order.

use crate::rooms::Route;
use swarm_core::wire::{TaskAssignedPayload, WireMsg};
use swarm_core::{short_id, Agent, AgentStatus, LogPayload, Task, TaskStatus};
use thiserror::Error;
use tracing::{debug, info};

pub const COMMANDER_AGENT: &str = "Commander";
pub const ORCHESTRATOR_AGENT: &str = "Orchestrator";

const PLAN_TEMPLATE: [(&str, &str); 3] = [
    ("Analyze Requirements", "Architect"),
    ("Implement Core Logic", "Coder"),
    ("Review Implementation", "Reviewer"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub route: Route,
    pub msg: WireMsg,
}

impl Outbound {
    fn everyone(msg: WireMsg) -> Self {
        Self {
            route: Route::All,
            msg,
        }
    }

    fn agent(agent_id: &str, msg: WireMsg) -> Self {
        Self {
            route: Route::agent(agent_id),
            msg,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    #[error("task already exists: {0}")]
    DuplicateTask(String),
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("agent not found: {0}")]
    AgentNotFound(String),
    #[error("{0} must not be empty")]
    Blank(&'static str),
    #[error("task {task_id} is {status}, expected pending")]
    NotPending { task_id: String, status: TaskStatus },
    #[error("agent {0} is not idle")]
    AgentBusy(String),
    #[error("task {task_id} cannot carry a result while {status}")]
    ResultOnOpenTask { task_id: String, status: TaskStatus },
}

#[derive(Debug, Default)]
pub struct Blackboard {
    tasks: Vec<Task>,
    agents: Vec<Agent>,
    auto_trigger: bool,
}

impl Blackboard {
    pub fn with_auto_trigger(enabled: bool) -> Self {
        Self {
            auto_trigger: enabled,
            ..Self::default()
        }
    }

    pub fn auto_trigger(&self) -> bool {
        self.auto_trigger
    }

    /// Gate the dispatch loop. Announced to everyone only when the value changes.
    pub fn set_auto_trigger(&mut self, enabled: bool) -> Vec<Outbound> {
        if self.auto_trigger == enabled {
            return Vec::new();
        }
        self.auto_trigger = enabled;
        info!(event = "auto_trigger", enabled = enabled);
        let state = if enabled { "ON" } else { "OFF" };
        vec![self.add_log(LogPayload::system(format!("Auto-Trigger {state}")))]
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == task_id)
    }

    pub fn add_task(&mut self, task: Task) -> Result<Vec<Outbound>, BoardError> {
        if self.task(&task.id).is_some() {
            return Err(BoardError::DuplicateTask(task.id));
        }
        info!(event = "task_added", task_id = %task.id, role = %task.role);
        self.tasks.push(task.clone());
        Ok(vec![Outbound::everyone(WireMsg::TaskAdded(task))])
    }

    pub fn update_task_status(
        &mut self,
        task_id: &str,
        status: TaskStatus,
        result: Option<String>,
    ) -> Result<Vec<Outbound>, BoardError> {
        let task = self
            .tasks
            .iter_mut()
            .find(|task| task.id == task_id)
            .ok_or_else(|| BoardError::TaskNotFound(task_id.to_string()))?;
        if !status.is_terminal() {
            if result.is_some() {
                return Err(BoardError::ResultOnOpenTask {
                    task_id: task_id.to_string(),
                    status,
                });
            }
            task.result = None;
        } else if result.is_some() {
            task.result = result;
        }
        task.status = status;
        info!(event = "task_updated", task_id = task_id, status = %status);
        Ok(vec![Outbound::everyone(WireMsg::TaskUpdated(task.clone()))])
    }

    /// Build an `agent_log` event routed by its author.
    pub fn add_log(&self, payload: LogPayload) -> Outbound {
        Outbound {
            route: self.log_route(&payload.agent),
            msg: WireMsg::AgentLog(payload),
        }
    }

    /// Orchestrator lifecycle notice, routed to the unscoped stream.
    pub fn service_log(&self, message: &str) -> Outbound {
        self.add_log(LogPayload::new(ORCHESTRATOR_AGENT, message))
    }

    pub fn log_route(&self, author: &str) -> Route {
        if author == swarm_core::SYSTEM_AGENT {
            return Route::All;
        }
        Route::Scoped(
            self.agents
                .iter()
                .filter(|agent| agent.role == author)
                .map(|agent| agent.id.clone())
                .collect(),
        )
    }

    pub fn executable_tasks(&self) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Pending)
            .filter(|task| {
                task.dependencies.iter().all(|dep| {
                    self.task(dep)
                        .map(|found| found.status == TaskStatus::Done)
                        .unwrap_or(false)
                })
            })
            .collect()
    }

    pub fn next_task_for_role(&self, role: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| {
            task.role == role
                && matches!(task.status, TaskStatus::InProgress | TaskStatus::Pending)
        })
    }

    pub fn pending_for_role(&self, role: &str) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|task| task.role == role && task.status == TaskStatus::Pending)
            .collect()
    }

    pub fn create_agent(&mut self, role: &str) -> Result<(Agent, Vec<Outbound>), BoardError> {
        let role = role.trim();
        if role.is_empty() {
            return Err(BoardError::Blank("role"));
        }
        let id = short_id();
        let agent = Agent {
            window_id: Some(format!("node-{id}")),
            id,
            role: role.to_string(),
            status: AgentStatus::Idle,
            current_task_id: None,
        };
        info!(event = "agent_created", agent_id = %agent.id, role = %agent.role);
        self.agents.push(agent.clone());
        let events = vec![
            Outbound::agent(&agent.id, WireMsg::AgentUpdated(agent.clone())),
            self.add_log(LogPayload::system(format!(
                "Agent {} deployed ({})",
                agent.role, agent.id
            ))),
        ];
        Ok((agent, events))
    }

    /// Hand a pending task to an idle agent.
    pub fn assign(&mut self, task_id: &str, agent_id: &str) -> Result<Vec<Outbound>, BoardError> {
        let task_index = self
            .tasks
            .iter()
            .position(|task| task.id == task_id)
            .ok_or_else(|| BoardError::TaskNotFound(task_id.to_string()))?;
        let agent_index = self
            .agents
            .iter()
            .position(|agent| agent.id == agent_id)
            .ok_or_else(|| BoardError::AgentNotFound(agent_id.to_string()))?;
        let status = self.tasks[task_index].status;
        if status != TaskStatus::Pending {
            return Err(BoardError::NotPending {
                task_id: task_id.to_string(),
                status,
            });
        }
        let agent = &self.agents[agent_index];
        if agent.status != AgentStatus::Idle || agent.current_task_id.is_some() {
            return Err(BoardError::AgentBusy(agent_id.to_string()));
        }

        let mut events = self.update_task_status(task_id, TaskStatus::InProgress, None)?;
        let agent = &mut self.agents[agent_index];
        agent.status = AgentStatus::Busy;
        agent.current_task_id = Some(task_id.to_string());
        let agent = agent.clone();
        let task = self.tasks[task_index].clone();

        info!(event = "task_assigned", task_id = task_id, agent_id = agent_id, role = %agent.role);
        events.push(Outbound::agent(agent_id, WireMsg::AgentUpdated(agent.clone())));
        events.push(Outbound::agent(
            agent_id,
            WireMsg::TaskAssigned(TaskAssignedPayload { task }),
        ));
        events.push(self.add_log(LogPayload::system(format!(
            "Task {} assigned to {} ({})",
            task_id, agent.role, agent.id
        ))));
        Ok(events)
    }

    /// One pass of the dispatch loop: pair executable tasks with idle agents.
    /// Does nothing while auto-trigger is off.
    pub fn dispatch(&mut self) -> Vec<Outbound> {
        if !self.auto_trigger {
            return Vec::new();
        }
        let candidates: Vec<(String, String)> = self
            .executable_tasks()
            .into_iter()
            .map(|task| (task.id.clone(), task.role.clone()))
            .collect();
        let mut events = Vec::new();
        for (task_id, role) in candidates {
            let idle = self
                .agents
                .iter()
                .find(|agent| {
                    agent.role == role
                        && agent.status == AgentStatus::Idle
                        && agent.current_task_id.is_none()
                })
                .map(|agent| agent.id.clone());
            let Some(agent_id) = idle else {
                debug!(event = "dispatch_wait", task_id = %task_id, role = %role);
                continue;
            };
            match self.assign(&task_id, &agent_id) {
                Ok(mut assigned) => events.append(&mut assigned),
                Err(err) => debug!(event = "dispatch_skip", task_id = %task_id, error = %err),
            }
        }
        events
    }

    /// Mark a task done and release whichever agent held it.
    pub fn complete_task(&mut self, task_id: &str, result: String) -> Result<Vec<Outbound>, BoardError> {
        let mut events = self.update_task_status(task_id, TaskStatus::Done, Some(result))?;
        if let Some(agent) = self
            .agents
            .iter_mut()
            .find(|agent| agent.current_task_id.as_deref() == Some(task_id))
        {
            agent.status = AgentStatus::Idle;
            agent.current_task_id = None;
            let agent = agent.clone();
            let agent_id = agent.id.clone();
            events.push(Outbound::agent(&agent_id, WireMsg::AgentUpdated(agent)));
        }
        events.push(self.add_log(LogPayload::system(format!("Task {task_id} completed via MCP."))));
        Ok(events)
    }

    /// Expand a prompt into the fixed three-step pipeline.
    pub fn plan(&mut self, prompt: &str) -> Result<Vec<Outbound>, BoardError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(BoardError::Blank("prompt"));
        }
        let mut events = vec![self.add_log(LogPayload::new(
            COMMANDER_AGENT,
            format!("Planning task for: {prompt}"),
        ))];
        let plan_id = short_id();
        let mut previous: Option<String> = None;
        for (index, (description, role)) in PLAN_TEMPLATE.iter().enumerate() {
            let id = format!("{plan_id}-{}", index + 1);
            let task = Task::new(id.clone(), *description, *role)
                .with_dependencies(previous.iter().cloned().collect());
            events.append(&mut self.add_task(task)?);
            previous = Some(id);
        }
        events.push(self.add_log(LogPayload::new(
            COMMANDER_AGENT,
            format!("Planning complete. {} tasks created.", PLAN_TEMPLATE.len()),
        )));
        Ok(events)
    }

    /// Queue an ad-hoc task for a role. Returns the new task id.
    pub fn send_command(
        &mut self,
        target_role: &str,
        description: &str,
    ) -> Result<(String, Vec<Outbound>), BoardError> {
        let target_role = target_role.trim();
        if target_role.is_empty() {
            return Err(BoardError::Blank("target_role"));
        }
        if description.trim().is_empty() {
            return Err(BoardError::Blank("description"));
        }
        let task_id = format!("cmd-{}", short_id());
        let mut events = self.add_task(Task::new(task_id.clone(), description, target_role))?;
        events.push(self.add_log(LogPayload::system(format!(
            "Command issued to {target_role}: {description}"
        ))));
        Ok((task_id, events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_names(events: &[Outbound]) -> Vec<&'static str> {
        events.iter().map(|out| out.msg.event_name()).collect()
    }

    fn board_with_agent(role: &str) -> (Blackboard, Agent) {
        let mut board = Blackboard::with_auto_trigger(true);
        let (agent, _) = board.create_agent(role).expect("agent");
        (board, agent)
    }

    #[test]
    fn duplicate_task_ids_are_rejected() {
        let mut board = Blackboard::default();
        board.add_task(Task::new("t1", "Design", "Architect")).expect("first");
        let err = board
            .add_task(Task::new("t1", "Again", "Architect"))
            .expect_err("duplicate");
        assert_eq!(err, BoardError::DuplicateTask("t1".to_string()));
        assert_eq!(board.tasks().len(), 1);
    }

    #[test]
    fn update_keeps_result_unless_provided() {
        let mut board = Blackboard::default();
        board.add_task(Task::new("t1", "Design", "Architect")).expect("add");
        board
            .update_task_status("t1", TaskStatus::Done, Some("drafted".to_string()))
            .expect("done");
        let events = board
            .update_task_status("t1", TaskStatus::Error, None)
            .expect("error");
        match &events[0].msg {
            WireMsg::TaskUpdated(task) => {
                assert_eq!(task.status, TaskStatus::Error);
                assert_eq!(task.result.as_deref(), Some("drafted"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(
            board.update_task_status("missing", TaskStatus::Done, None),
            Err(BoardError::TaskNotFound("missing".to_string()))
        );
    }

    #[test]
    fn results_only_attach_to_terminal_statuses() {
        let mut board = Blackboard::default();
        board.add_task(Task::new("t1", "Design", "Architect")).expect("add");
        assert_eq!(
            board.update_task_status("t1", TaskStatus::InProgress, Some("early".to_string())),
            Err(BoardError::ResultOnOpenTask {
                task_id: "t1".to_string(),
                status: TaskStatus::InProgress,
            })
        );
        assert_eq!(board.task("t1").map(|t| t.status), Some(TaskStatus::Pending));

        board
            .update_task_status("t1", TaskStatus::Error, Some("crashed".to_string()))
            .expect("error");
        board
            .update_task_status("t1", TaskStatus::Pending, None)
            .expect("retry");
        assert!(board.task("t1").and_then(|t| t.result.as_deref()).is_none());
    }

    #[test]
    fn create_agent_assigns_window_and_announces() {
        let (board, agent) = board_with_agent(" Coder ");
        assert_eq!(agent.role, "Coder");
        assert_eq!(agent.status, AgentStatus::Idle);
        assert_eq!(agent.window_id.as_deref(), Some(format!("node-{}", agent.id).as_str()));
        assert_eq!(board.agents().len(), 1);

        let mut blank = Blackboard::default();
        assert_eq!(blank.create_agent("  ").map(|_| ()), Err(BoardError::Blank("role")));
    }

    #[test]
    fn log_routes_follow_the_author() {
        let (board, agent) = board_with_agent("Coder");
        assert_eq!(board.log_route("System"), Route::All);
        assert_eq!(board.log_route("Coder"), Route::agent(&agent.id));
        assert_eq!(board.log_route("Commander"), Route::unscoped());
        assert_eq!(board.service_log("Service started.").route, Route::unscoped());
    }

    #[test]
    fn executable_tasks_wait_for_dependencies() {
        let mut board = Blackboard::default();
        board.add_task(Task::new("a", "first", "Architect")).expect("a");
        board
            .add_task(Task::new("b", "second", "Coder").with_dependencies(vec!["a".to_string()]))
            .expect("b");
        board
            .add_task(Task::new("c", "orphan", "Coder").with_dependencies(vec!["zz".to_string()]))
            .expect("c");
        let ids: Vec<&str> = board.executable_tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);

        board.update_task_status("a", TaskStatus::Done, None).expect("done");
        let ids: Vec<&str> = board.executable_tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[test]
    fn dispatch_assigns_one_task_per_idle_agent() {
        let (mut board, agent) = board_with_agent("Coder");
        board.add_task(Task::new("t1", "one", "Coder")).expect("t1");
        board.add_task(Task::new("t2", "two", "Coder")).expect("t2");
        board.add_task(Task::new("t3", "three", "Reviewer")).expect("t3");

        let events = board.dispatch();
        assert_eq!(
            event_names(&events),
            vec!["task_updated", "agent_updated", "task_assigned", "agent_log"]
        );
        assert_eq!(events[2].route, Route::agent(&agent.id));
        assert_eq!(board.task("t1").map(|t| t.status), Some(TaskStatus::InProgress));
        assert_eq!(board.task("t2").map(|t| t.status), Some(TaskStatus::Pending));
        assert_eq!(board.agents()[0].current_task_id.as_deref(), Some("t1"));
        match &events[3].msg {
            WireMsg::AgentLog(log) => {
                assert_eq!(log.message, format!("Task t1 assigned to Coder ({})", agent.id))
            }
            other => panic!("unexpected event: {other:?}"),
        }

        assert!(board.dispatch().is_empty());
    }

    #[test]
    fn dispatch_waits_for_auto_trigger() {
        let mut board = Blackboard::default();
        board.create_agent("Coder").expect("agent");
        board.add_task(Task::new("t1", "one", "Coder")).expect("t1");
        assert!(!board.auto_trigger());
        assert!(board.dispatch().is_empty());
        assert_eq!(board.task("t1").map(|t| t.status), Some(TaskStatus::Pending));

        let events = board.set_auto_trigger(true);
        match &events[..] {
            [Outbound { route: Route::All, msg: WireMsg::AgentLog(log) }] => {
                assert_eq!(log.message, "Auto-Trigger ON")
            }
            other => panic!("unexpected events: {other:?}"),
        }
        assert!(board.set_auto_trigger(true).is_empty());
        assert_eq!(event_names(&board.dispatch())[2], "task_assigned");

        board.set_auto_trigger(false);
        board.add_task(Task::new("t2", "two", "Coder")).expect("t2");
        board.complete_task("t1", "done".to_string()).expect("complete");
        assert!(board.dispatch().is_empty());
    }

    #[test]
    fn completion_releases_the_agent() {
        let (mut board, agent) = board_with_agent("Coder");
        board.add_task(Task::new("t1", "one", "Coder")).expect("t1");
        board.dispatch();

        let events = board.complete_task("t1", "merged".to_string()).expect("complete");
        assert_eq!(event_names(&events), vec!["task_updated", "agent_updated", "agent_log"]);
        assert_eq!(board.agents()[0].status, AgentStatus::Idle);
        assert!(board.agents()[0].current_task_id.is_none());
        assert_eq!(board.task("t1").and_then(|t| t.result.as_deref()), Some("merged"));
        assert_eq!(events[1].route, Route::agent(&agent.id));
    }

    #[test]
    fn plan_creates_a_chained_pipeline() {
        let mut board = Blackboard::default();
        let events = board.plan("build a todo app").expect("plan");
        assert_eq!(
            event_names(&events),
            vec!["agent_log", "task_added", "task_added", "task_added", "agent_log"]
        );
        let tasks = board.tasks();
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].role, "Architect");
        assert!(tasks[0].dependencies.is_empty());
        assert_eq!(tasks[1].dependencies, vec![tasks[0].id.clone()]);
        assert_eq!(tasks[2].dependencies, vec![tasks[1].id.clone()]);
        assert_eq!(board.plan(" ").map(|_| ()), Err(BoardError::Blank("prompt")));
    }

    #[test]
    fn role_queries_and_commands() {
        let mut board = Blackboard::default();
        let (task_id, events) = board.send_command("Coder", "fix the build").expect("command");
        assert!(task_id.starts_with("cmd-"));
        assert_eq!(event_names(&events), vec!["task_added", "agent_log"]);
        assert_eq!(board.pending_for_role("Coder").len(), 1);
        assert_eq!(board.next_task_for_role("Coder").map(|t| t.id.clone()), Some(task_id));
        assert!(board.next_task_for_role("Reviewer").is_none());
    }
}
