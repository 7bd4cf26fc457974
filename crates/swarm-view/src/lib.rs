//! Client side of the swarm: the shared event channel, the dashboard and node
//! view models, and the hub HTTP client.

pub mod api;
pub mod channel;
pub mod config;
pub mod dashboard;
pub mod node;
pub mod render;
