use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use swarm_core::wire::{event, Envelope};
use swarm_core::LogPayload;
use swarm_hub::hub::HubState;
use swarm_hub::{config::Config, serve, serve_hub};
use swarm_view::api::ApiClient;
use swarm_view::channel::{EventChannel, CONNECT, DISCONNECT};
use swarm_view::dashboard::DashboardView;
use swarm_view::node::NodeView;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use url::Url;

fn hub_config(addr: SocketAddr, auto_trigger: bool) -> Config {
    Config {
        addr: addr.to_string(),
        dispatch_interval: Duration::from_millis(50),
        log_dir: String::new(),
        auto_trigger,
        ..Config::default()
    }
}

fn ws_url(addr: SocketAddr) -> Url {
    Url::parse(&format!("ws://{addr}/ws")).expect("ws url")
}

async fn start_hub() -> (String, Url) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let config = hub_config(addr, true);
    tokio::spawn(async move {
        let _ = serve(config, listener, std::future::pending()).await;
    });
    (format!("http://{addr}"), ws_url(addr))
}

async fn wait_for_connection(
    inbox: &mut mpsc::UnboundedReceiver<Envelope>,
    node: &mut NodeView,
    connected: bool,
    within: Duration,
) {
    tokio::time::timeout(within, async {
        while node.is_connected() != connected {
            let envelope = inbox.recv().await.expect("inbox open");
            node.apply(&envelope, Utc::now());
        }
    })
    .await
    .expect("connection state");
}

async fn next_agent_log(inbox: &mut mpsc::UnboundedReceiver<Envelope>) -> LogPayload {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let envelope = inbox.recv().await.expect("inbox open");
            if envelope.event == event::AGENT_LOG {
                return envelope.decode_payload::<LogPayload>().expect("log payload");
            }
        }
    })
    .await
    .expect("agent_log")
}

#[tokio::test]
async fn node_receives_its_mission_and_reports_completion() {
    let (base, ws_url) = start_hub().await;
    let api = ApiClient::new(&base).expect("client");
    let agent = api.create_agent("Architect").await.expect("agent");

    let channel = EventChannel::connect(ws_url);
    let node_scope = channel.scope();
    let mut node_inbox = node_scope.subscribe(&[
        CONNECT,
        event::AGENT_LOG,
        event::AGENT_UPDATED,
        event::TASK_ASSIGNED,
    ]);
    // Asserted before the socket is up; delivered by the rejoin on connect.
    node_scope.join_room(&agent.id);

    let dashboard_scope = channel.scope();
    let mut dashboard_inbox =
        dashboard_scope.subscribe(&[CONNECT, event::TASK_ADDED, event::TASK_UPDATED]);

    let mut node = NodeView::new(agent.id.clone(), "Architect");
    let mut dashboard = DashboardView::default();

    tokio::time::timeout(Duration::from_secs(5), async {
        while !node.is_connected() {
            let envelope = node_inbox.recv().await.expect("inbox open");
            node.apply(&envelope, Utc::now());
        }
    })
    .await
    .expect("connected");
    tokio::time::sleep(Duration::from_millis(200)).await;

    api.submit_plan("build a todo app").await.expect("plan");

    tokio::time::timeout(Duration::from_secs(5), async {
        while node.current_task().is_none() {
            let envelope = node_inbox.recv().await.expect("inbox open");
            node.apply(&envelope, Utc::now());
        }
    })
    .await
    .expect("mission assigned");
    let task_id = node.current_task().map(|t| t.id.clone()).expect("task");
    assert!(node
        .logs()
        .iter()
        .any(|log| log.message == "MISSION RECEIVED: Analyze Requirements"));

    node.submit_completion(&api, "requirements drafted")
        .await
        .expect("completion");
    assert!(node.current_task().is_none());

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let envelope = dashboard_inbox.recv().await.expect("inbox open");
            dashboard.apply(&envelope, Utc::now());
            let done = dashboard
                .tasks()
                .iter()
                .any(|t| t.id == task_id && t.result.as_deref() == Some("requirements drafted"));
            if done {
                break;
            }
        }
    })
    .await
    .expect("dashboard saw completion");
    assert_eq!(dashboard.tasks().len(), 3);
}

#[tokio::test]
async fn dashboard_sharing_a_socket_with_a_node_still_sees_commander_logs() {
    let (base, ws_url) = start_hub().await;
    let api = ApiClient::new(&base).expect("client");
    let agent = api.create_agent("Coder").await.expect("agent");

    let channel = EventChannel::connect(ws_url);
    let node_scope = channel.scope();
    let mut node_inbox = node_scope.subscribe(&[CONNECT]);
    node_scope.join_room(&agent.id);

    let dashboard_scope = channel.scope();
    let mut dashboard_inbox = dashboard_scope.subscribe(&[event::AGENT_LOG]);
    dashboard_scope.watch_all();

    let mut node = NodeView::new(agent.id.clone(), "Coder");
    wait_for_connection(&mut node_inbox, &mut node, true, Duration::from_secs(5)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    api.submit_plan("ship the release").await.expect("plan");

    let first = next_agent_log(&mut dashboard_inbox).await;
    assert_eq!(first.agent, "Commander");
    assert_eq!(first.message, "Planning task for: ship the release");
    let mut last = first;
    while last.message != "Planning complete. 3 tasks created." {
        last = next_agent_log(&mut dashboard_inbox).await;
    }
    assert_eq!(last.agent, "Commander");
}

#[tokio::test]
async fn node_rejoins_its_room_after_the_hub_restarts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let hub = Arc::new(HubState::new(hub_config(addr, false)));
    let coder = hub
        .mutate(|board| board.create_agent("Coder"))
        .await
        .expect("coder");
    hub.mutate(|board| board.create_agent("Reviewer"))
        .await
        .expect("reviewer");

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let first = tokio::spawn(serve_hub(hub.clone(), listener, async move {
        let _ = stop_rx.await;
    }));

    let channel = EventChannel::connect(ws_url(addr));
    let scope = channel.scope();
    let mut inbox = scope.subscribe(&[CONNECT, DISCONNECT, event::AGENT_LOG]);
    scope.join_room(&coder.id);
    let mut node = NodeView::new(coder.id.clone(), "Coder");

    wait_for_connection(&mut inbox, &mut node, true, Duration::from_secs(5)).await;
    assert!(channel.is_connected());

    stop_tx.send(()).expect("stop first hub");
    first.await.expect("first hub task").expect("first hub");
    wait_for_connection(&mut inbox, &mut node, false, Duration::from_secs(5)).await;
    assert!(!channel.is_connected());

    let listener = TcpListener::bind(addr).await.expect("rebind");
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let second = tokio::spawn(serve_hub(hub.clone(), listener, async move {
        let _ = stop_rx.await;
    }));
    wait_for_connection(&mut inbox, &mut node, true, Duration::from_secs(10)).await;
    assert!(channel.is_connected());
    tokio::time::sleep(Duration::from_millis(200)).await;

    hub.mutate(|board| {
        Ok((
            (),
            vec![
                board.add_log(LogPayload::new("Reviewer", "not for you")),
                board.add_log(LogPayload::new("Coder", "welcome back")),
            ],
        ))
    })
    .await
    .expect("logs");

    let log = next_agent_log(&mut inbox).await;
    assert_eq!(log.agent, "Coder");
    assert_eq!(log.message, "welcome back");

    stop_tx.send(()).expect("stop second hub");
    second.await.expect("second hub task").expect("second hub");
}
