use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("invalid listen address {addr}: {reason}")]
    InvalidAddr { addr: String, reason: String },
    #[error("refusing non-loopback listen address {0}")]
    NonLoopback(String),
    #[error("bind failed: {0}")]
    Bind(#[source] io::Error),
    #[error("server error: {0}")]
    Serve(#[source] io::Error),
}
