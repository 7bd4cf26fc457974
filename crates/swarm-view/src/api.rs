use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use swarm_core::rpc::{method, CompletionParams, RpcRequest, RpcResponse};
use swarm_core::Agent;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// HTTP client for the hub's REST and JSON-RPC endpoints.
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    next_rpc_id: AtomicU64,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .connect_timeout(Duration::from_secs(1))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            next_rpc_id: AtomicU64::new(1),
        })
    }

    async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| ApiError::Decode(err.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?;
        Self::read_json(resp).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;
        Self::read_json(resp).await
    }

    pub async fn create_agent(&self, role: &str) -> Result<Agent, ApiError> {
        self.post("/api/v1/agents/create", &json!({ "role": role })).await
    }

    pub async fn list_agents(&self) -> Result<Vec<Agent>, ApiError> {
        self.get("/api/v1/agents").await
    }

    /// Fire-and-forget mission submission; the response body is not inspected.
    pub async fn submit_plan(&self, prompt: &str) -> Result<(), ApiError> {
        let _: serde_json::Value = self.post("/api/v1/plan", &json!({ "prompt": prompt })).await?;
        Ok(())
    }

    pub async fn submit_task_completion(&self, task_id: &str, result: &str) -> Result<(), ApiError> {
        let id = self.next_rpc_id.fetch_add(1, Ordering::SeqCst);
        let request = RpcRequest::new(
            method::SUBMIT_TASK_COMPLETION,
            CompletionParams {
                task_id: task_id.to_string(),
                result: result.to_string(),
            },
            id,
        )
        .map_err(|err| ApiError::Decode(err.to_string()))?;
        let response: RpcResponse = self.post("/mcp/messages", &request).await?;
        if let Some(err) = response.error {
            warn!(event = "completion_rejected", task_id = task_id, code = err.code, message = %err.message);
            return Err(ApiError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        if response.result.is_none() {
            return Err(ApiError::Decode("rpc response has neither result nor error".to_string()));
        }
        debug!(event = "completion_submitted", task_id = task_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn create_agent_decodes_the_registry_entry() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/agents/create"))
            .and(body_partial_json(json!({ "role": "Coder" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "a1b2c3d4",
                "role": "Coder",
                "status": "idle",
                "window_id": "node-a1b2c3d4"
            })))
            .mount(&mock_server)
            .await;

        let api = ApiClient::new(&mock_server.uri()).expect("client");
        let agent = api.create_agent("Coder").await.expect("agent");
        assert_eq!(agent.id, "a1b2c3d4");
        assert_eq!(agent.window_id.as_deref(), Some("node-a1b2c3d4"));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/agents/create"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .mount(&mock_server)
            .await;

        let api = ApiClient::new(&mock_server.uri()).expect("client");
        match api.create_agent("Coder").await {
            Err(ApiError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "Internal Server Error");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn completion_treats_rpc_error_body_as_failure() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp/messages"))
            .and(body_partial_json(json!({
                "jsonrpc": "2.0",
                "method": "submit_task_completion",
                "params": { "task_id": "t9", "result": "done" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "error": { "code": -32602, "message": "task not found: t9" },
                "id": 1
            })))
            .mount(&mock_server)
            .await;

        let api = ApiClient::new(&mock_server.uri()).expect("client");
        let err = api.submit_task_completion("t9", "done").await.expect_err("rpc error");
        assert!(matches!(err, ApiError::Rpc { code: -32602, .. }));
    }

    #[tokio::test]
    async fn completion_success_and_plan_submission() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "result": { "status": "completed" },
                "id": 1
            })))
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/plan"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "planning_started" })))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/agents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&mock_server)
            .await;

        let api = ApiClient::new(&format!("{}/", mock_server.uri())).expect("client");
        api.submit_task_completion("t1", "shipped").await.expect("completed");
        api.submit_plan("build a todo app").await.expect("plan");
        assert!(api.list_agents().await.expect("agents").is_empty());
    }
}
