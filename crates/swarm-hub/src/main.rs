use std::process::ExitCode;
use swarm_hub::{config::load_config, logging::init_logging, parse_addr, serve};
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let config = load_config();
    let _log_guard = init_logging(&config);
    let addr = match parse_addr(&config.addr) {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err);
            return ExitCode::FAILURE;
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "hub_error", error = %err);
            return ExitCode::FAILURE;
        }
    };

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    if let Err(err) = serve(config, listener, shutdown).await {
        error!(event = "hub_error", error = %err);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
