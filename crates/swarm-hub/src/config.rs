use clap::Parser;
use std::time::Duration;

pub const DEFAULT_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_LOG_DIR: &str = ".swarm/logs";

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: String,
    pub debug: bool,
    pub stale_seconds: u64,
    pub ping_interval: Duration,
    pub write_timeout: Duration,
    pub dispatch_interval: Duration,
    pub auto_trigger: bool,
    pub log_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            debug: false,
            stale_seconds: 30,
            ping_interval: Duration::from_secs(10),
            write_timeout: Duration::from_secs(2),
            dispatch_interval: Duration::from_secs(1),
            auto_trigger: false,
            log_dir: DEFAULT_LOG_DIR.to_string(),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "swarm-hub")]
pub struct Args {
    #[arg(long, default_value = "")]
    pub addr: String,
    #[arg(long, default_value_t = false)]
    pub debug: bool,
    #[arg(long, default_value_t = 30)]
    pub stale_seconds: u64,
    #[arg(long, default_value_t = 10)]
    pub ping_interval: u64,
    #[arg(long, default_value_t = 2)]
    pub write_timeout: u64,
    /// Dispatch loop period in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub dispatch_interval: u64,
    /// Start with autonomous dispatch enabled.
    #[arg(long, default_value_t = false)]
    pub auto_trigger: bool,
    #[arg(long, default_value = "")]
    pub log_dir: String,
}

impl Args {
    pub fn into_config(self) -> Config {
        Config {
            addr: resolve_addr(&self.addr),
            debug: self.debug || env_true("SWARM_HUB_DEBUG"),
            stale_seconds: self.stale_seconds,
            ping_interval: Duration::from_secs(self.ping_interval),
            write_timeout: Duration::from_secs(self.write_timeout),
            dispatch_interval: Duration::from_millis(self.dispatch_interval),
            auto_trigger: self.auto_trigger || env_true("SWARM_AUTO_TRIGGER"),
            log_dir: resolve_log_dir(&self.log_dir),
        }
    }
}

pub fn load_config() -> Config {
    Args::parse().into_config()
}

pub fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn resolve_addr(addr_flag: &str) -> String {
    if !addr_flag.trim().is_empty() {
        return addr_flag.to_string();
    }
    if let Ok(value) = std::env::var("SWARM_HUB_ADDR") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    DEFAULT_ADDR.to_string()
}

fn resolve_log_dir(log_dir_flag: &str) -> String {
    if !log_dir_flag.trim().is_empty() {
        return log_dir_flag.to_string();
    }
    if let Ok(value) = std::env::var("SWARM_LOG_DIR") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    DEFAULT_LOG_DIR.to_string()
}
