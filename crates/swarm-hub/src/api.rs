use crate::blackboard::BoardError;
use crate::hub::HubState;
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{net::SocketAddr, sync::Arc};
use swarm_core::rpc::{
    code, method, CommandParams, CompletionParams, RoleParams, RpcRequest, RpcResponse,
    JSONRPC_VERSION,
};
use swarm_core::{Agent, Task};
use tracing::{info, warn};

pub fn router(hub: Arc<HubState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { "ok" }))
        .route("/api/v1/agents", get(list_agents))
        .route("/api/v1/agents/create", post(create_agent))
        .route("/api/v1/tasks", get(list_tasks))
        .route("/api/v1/plan", post(submit_plan))
        .route("/mcp/messages", post(rpc_messages))
        .with_state(hub)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(hub): State<Arc<HubState>>,
) -> impl IntoResponse {
    if !addr.ip().is_loopback() {
        return StatusCode::FORBIDDEN.into_response();
    }
    ws.on_upgrade(move |socket| async move {
        hub.handle_socket(socket, addr).await;
    })
}

#[derive(Deserialize)]
struct CreateAgentBody {
    role: String,
}

#[derive(Deserialize)]
struct PlanBody {
    prompt: String,
}

fn bad_request(err: BoardError) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, err.to_string())
}

async fn list_agents(State(hub): State<Arc<HubState>>) -> Json<Vec<Agent>> {
    Json(hub.read(|board| board.agents().to_vec()).await)
}

async fn list_tasks(State(hub): State<Arc<HubState>>) -> Json<Vec<Task>> {
    Json(hub.read(|board| board.tasks().to_vec()).await)
}

async fn create_agent(
    State(hub): State<Arc<HubState>>,
    Json(body): Json<CreateAgentBody>,
) -> Result<Json<Agent>, (StatusCode, String)> {
    let agent = hub
        .mutate(|board| board.create_agent(&body.role))
        .await
        .map_err(bad_request)?;
    Ok(Json(agent))
}

async fn submit_plan(
    State(hub): State<Arc<HubState>>,
    Json(body): Json<PlanBody>,
) -> Result<Json<Value>, (StatusCode, String)> {
    info!(event = "plan_requested", prompt = %body.prompt);
    hub.mutate(|board| board.plan(&body.prompt).map(|events| ((), events)))
        .await
        .map_err(bad_request)?;
    Ok(Json(json!({ "status": "planning_started" })))
}

async fn rpc_messages(State(hub): State<Arc<HubState>>, Json(body): Json<Value>) -> Json<RpcResponse> {
    let id = body.get("id").cloned().unwrap_or(Value::Null);
    let request: RpcRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(err) => return Json(RpcResponse::failure(id, code::INVALID_REQUEST, err.to_string())),
    };
    if request.jsonrpc != JSONRPC_VERSION {
        return Json(RpcResponse::failure(
            request.id,
            code::INVALID_REQUEST,
            format!("unsupported jsonrpc version: {}", request.jsonrpc),
        ));
    }
    let response = match dispatch_rpc(&hub, &request).await {
        Ok(result) => RpcResponse::success(request.id, result),
        Err((err_code, message)) => {
            warn!(event = "rpc_error", method = %request.method, code = err_code, message = %message);
            RpcResponse::failure(request.id, err_code, message)
        }
    };
    Json(response)
}

fn params<T: serde::de::DeserializeOwned>(request: &RpcRequest) -> Result<T, (i64, String)> {
    serde_json::from_value(request.params.clone())
        .map_err(|err| (code::INVALID_PARAMS, format!("invalid params: {err}")))
}

fn rpc_board_error(err: BoardError) -> (i64, String) {
    (code::INVALID_PARAMS, err.to_string())
}

async fn dispatch_rpc(hub: &HubState, request: &RpcRequest) -> Result<Value, (i64, String)> {
    info!(event = "rpc_call", method = %request.method);
    match request.method.as_str() {
        method::SUBMIT_TASK_COMPLETION => {
            let CompletionParams { task_id, result } = params(request)?;
            hub.mutate(|board| board.complete_task(&task_id, result).map(|events| ((), events)))
                .await
                .map_err(rpc_board_error)?;
            Ok(json!({ "status": "completed" }))
        }
        method::FETCH_NEXT_TASK => {
            let RoleParams { role } = params(request)?;
            let task = hub
                .read(|board| board.next_task_for_role(&role).cloned())
                .await;
            Ok(json!(task))
        }
        method::POLL_TASKS => {
            let RoleParams { role } = params(request)?;
            let (count, task) = hub
                .read(|board| {
                    let pending = board.pending_for_role(&role);
                    (pending.len(), pending.first().map(|task| (*task).clone()))
                })
                .await;
            Ok(json!({ "count": count, "task": task }))
        }
        method::SEND_COMMAND => {
            let CommandParams {
                target_role,
                description,
            } = params(request)?;
            let task_id = hub
                .mutate(|board| board.send_command(&target_role, &description))
                .await
                .map_err(rpc_board_error)?;
            Ok(json!({ "task_id": task_id }))
        }
        other => Err((code::METHOD_NOT_FOUND, format!("method not found: {other}"))),
    }
}
