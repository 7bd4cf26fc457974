use clap::{Parser, Subcommand};
use url::Url;

pub const DEFAULT_HUB_URL: &str = "ws://127.0.0.1:8000/ws";
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";

#[derive(Parser, Debug)]
#[command(name = "swarm-view")]
pub struct Cli {
    /// Websocket endpoint of the hub.
    #[arg(long, default_value = "")]
    pub hub_url: String,
    /// Base URL of the hub's HTTP API.
    #[arg(long, default_value = "")]
    pub api_url: String,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Watch every task and log; stdin lines become plans.
    Dashboard,
    /// Act as one agent's node.
    Node {
        #[arg(long)]
        agent_id: String,
        #[arg(long)]
        role: String,
    },
}

#[derive(Debug, Clone)]
pub struct ViewConfig {
    pub hub_url: Url,
    pub api_url: String,
    pub command: Command,
}

impl Cli {
    pub fn into_config(self) -> Result<ViewConfig, url::ParseError> {
        Ok(ViewConfig {
            hub_url: resolve_hub_url(&self.hub_url)?,
            api_url: resolve_api_url(&self.api_url),
            command: self.command,
        })
    }
}

fn resolve_hub_url(flag_url: &str) -> Result<Url, url::ParseError> {
    if !flag_url.trim().is_empty() {
        return Url::parse(flag_url);
    }
    if let Ok(value) = std::env::var("SWARM_HUB_URL") {
        if !value.trim().is_empty() {
            return Url::parse(&value);
        }
    }
    Url::parse(DEFAULT_HUB_URL)
}

fn resolve_api_url(flag_url: &str) -> String {
    if !flag_url.trim().is_empty() {
        return flag_url.to_string();
    }
    if let Ok(value) = std::env::var("SWARM_API_URL") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    DEFAULT_API_URL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_command_parses_identity() {
        let cli = Cli::parse_from([
            "swarm-view",
            "--hub-url",
            "ws://127.0.0.1:9000/ws",
            "node",
            "--agent-id",
            "a1",
            "--role",
            "Coder",
        ]);
        let config = cli.into_config().expect("config");
        assert_eq!(config.hub_url.as_str(), "ws://127.0.0.1:9000/ws");
        assert_eq!(
            config.command,
            Command::Node {
                agent_id: "a1".to_string(),
                role: "Coder".to_string()
            }
        );
    }

    #[test]
    fn invalid_hub_url_is_an_error() {
        let cli = Cli::parse_from(["swarm-view", "--hub-url", "not a url", "dashboard"]);
        assert!(cli.into_config().is_err());
    }

    #[test]
    fn explicit_api_url_wins() {
        assert_eq!(resolve_api_url("http://hub:1"), "http://hub:1");
    }
}
