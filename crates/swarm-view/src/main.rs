use chrono::Utc;
use clap::Parser;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use swarm_core::wire::event;
use swarm_core::Agent;
use swarm_view::api::{ApiClient, ApiError};
use swarm_view::channel::{EventChannel, CONNECT, DISCONNECT};
use swarm_view::config::{Cli, Command, ViewConfig};
use swarm_view::dashboard::DashboardView;
use swarm_view::node::{NodeView, DONE_COMMAND};
use swarm_view::render;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const AGENT_COMMAND: &str = "/agent";
const AUTO_COMMAND: &str = "/auto";

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let config = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid hub url: {err}");
            return ExitCode::FAILURE;
        }
    };
    let api = match ApiClient::new(&config.api_url) {
        Ok(api) => Arc::new(api),
        Err(err) => {
            error!(event = "api_client_error", error = %err);
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    let channel = EventChannel::connect(config.hub_url.clone());
    info!(event = "view_start", hub_url = %config.hub_url, api_url = %config.api_url);

    match config.command.clone() {
        Command::Dashboard => run_dashboard(&config, channel, api).await,
        Command::Node { agent_id, role } => run_node(channel, api, agent_id, role).await,
    }
    ExitCode::SUCCESS
}

async fn run_dashboard(config: &ViewConfig, channel: EventChannel, api: Arc<ApiClient>) {
    let scope = channel.scope();
    let mut inbox = scope.subscribe(&[
        CONNECT,
        DISCONNECT,
        event::TASK_ADDED,
        event::TASK_UPDATED,
        event::AGENT_LOG,
    ]);
    scope.watch_all();
    let mut view = DashboardView::default();
    if view.refresh_agents(&api).await.is_ok() {
        for agent in view.agents() {
            println!("{}", render::agent_line(agent));
        }
    }

    let (created_tx, mut created_rx) =
        mpsc::unbounded_channel::<(String, Result<Agent, ApiError>)>();
    let (plan_tx, mut plan_rx) = mpsc::unbounded_channel::<Result<(), ApiError>>();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            Some(envelope) = inbox.recv() => {
                let change = view.apply(&envelope, Utc::now());
                if let Some(line) = render::dashboard_line(&change) {
                    println!("{line}");
                }
            }
            Some((role, outcome)) = created_rx.recv() => {
                match view.agent_created(&role, outcome) {
                    Ok(agent) => {
                        println!("{}", render::agent_line(&agent));
                        println!(
                            "  swarm-view --hub-url {} node --agent-id {} --role {}",
                            config.hub_url, agent.id, agent.role
                        );
                    }
                    Err(_) => println!("{}", view.notice().unwrap_or_default()),
                }
            }
            Some(outcome) = plan_rx.recv() => {
                if let Err(err) = outcome {
                    println!("plan rejected: {err}");
                }
            }
            line = lines.next_line() => {
                let Ok(Some(line)) = line else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Some(role) = line.strip_prefix(AGENT_COMMAND) {
                    let role = role.trim().to_string();
                    let api = api.clone();
                    let created_tx = created_tx.clone();
                    tokio::spawn(async move {
                        let outcome = api.create_agent(&role).await;
                        let _ = created_tx.send((role, outcome));
                    });
                    continue;
                }
                if let Some(arg) = line.strip_prefix(AUTO_COMMAND) {
                    match parse_switch(arg) {
                        Some(enabled) => scope.emit(view.toggle_auto_trigger(enabled)),
                        None => println!("usage: {AUTO_COMMAND} on|off"),
                    }
                    continue;
                }
                let prompt = line.to_string();
                let api = api.clone();
                let plan_tx = plan_tx.clone();
                tokio::spawn(async move {
                    let _ = plan_tx.send(api.submit_plan(&prompt).await);
                });
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
}

async fn run_node(channel: EventChannel, api: Arc<ApiClient>, agent_id: String, role: String) {
    let scope = channel.scope();
    let mut inbox = scope.subscribe(&[
        CONNECT,
        DISCONNECT,
        event::AGENT_LOG,
        event::AGENT_UPDATED,
        event::TASK_ASSIGNED,
    ]);
    scope.join_room(&agent_id);
    let mut view = NodeView::new(agent_id, role);
    println!("node {} ({})", view.agent_id(), view.role());

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(String, Result<(), ApiError>)>();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            Some(envelope) = inbox.recv() => {
                let change = view.apply(&envelope, Utc::now());
                if let Some(line) = render::node_line(&change) {
                    println!("{line}");
                }
            }
            Some((task_id, outcome)) = done_rx.recv() => {
                let _ = view.finish_completion(&task_id, outcome);
                if let Some(notice) = view.notice() {
                    println!("-- {notice}");
                }
            }
            line = lines.next_line() => {
                let Ok(Some(line)) = line else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Some(result) = line.strip_prefix(DONE_COMMAND) {
                    match view.begin_completion(result.trim()) {
                        Ok(request) => {
                            let api = api.clone();
                            let done_tx = done_tx.clone();
                            tokio::spawn(async move {
                                let outcome = api
                                    .submit_task_completion(&request.task_id, &request.result)
                                    .await;
                                let _ = done_tx.send((request.task_id, outcome));
                            });
                        }
                        Err(err) => println!("-- {err}"),
                    }
                    continue;
                }
                scope.emit(view.broadcast_message(line));
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
}

fn parse_switch(arg: &str) -> Option<bool> {
    match arg.trim() {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_enabled = matches!(
        std::env::var("SWARM_LOG_STDOUT").ok().as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("yes") | Some("YES")
    );
    if stderr_enabled {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_command_takes_on_or_off() {
        assert_eq!(parse_switch(" on"), Some(true));
        assert_eq!(parse_switch(" off "), Some(false));
        assert_eq!(parse_switch(""), None);
        assert_eq!(parse_switch(" maybe"), None);
    }
}
