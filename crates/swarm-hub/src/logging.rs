use crate::config::Config;
use std::{
    fs::{File, OpenOptions},
    io,
    path::Path,
    sync::Arc,
};
use tracing_subscriber::{
    fmt::writer::{BoxMakeWriter, MakeWriterExt},
    EnvFilter,
};

const LOG_FILE_NAME: &str = "swarm-hub.log";

/// Keeps the log file handle alive for the life of the process.
pub struct LogGuard {
    _file: Option<Arc<File>>,
}

fn level_for(config: &Config) -> String {
    if config.debug {
        return "debug".to_string();
    }
    std::env::var("SWARM_LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
}

/// Log to stdout, and also to `<log_dir>/swarm-hub.log` when it can be opened.
pub fn init_logging(config: &Config) -> Option<LogGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_for(config)));
    let file = match open_log_file(&config.log_dir) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            None
        }
    };
    let writer = match file.clone() {
        Some(file) => BoxMakeWriter::new(io::stdout.and(file)),
        None => BoxMakeWriter::new(io::stdout),
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok()?;
    Some(LogGuard { _file: file })
}

fn open_log_file(log_dir: &str) -> io::Result<Option<Arc<File>>> {
    if log_dir.trim().is_empty() {
        return Ok(None);
    }
    let dir = Path::new(log_dir);
    std::fs::create_dir_all(dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))?;
    Ok(Some(Arc::new(file)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_log_dir_means_stdout_only() {
        assert!(open_log_file("  ").expect("no file").is_none());
    }

    #[test]
    fn log_file_lands_in_the_configured_dir() {
        let dir = std::env::temp_dir().join(format!("swarm-hub-log-{}", std::process::id()));
        let file = open_log_file(dir.to_str().expect("utf8 path")).expect("open");
        assert!(file.is_some());
        assert!(dir.join(LOG_FILE_NAME).exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn debug_flag_forces_debug_level() {
        let config = Config {
            debug: true,
            ..Config::default()
        };
        assert_eq!(level_for(&config), "debug");
    }
}
