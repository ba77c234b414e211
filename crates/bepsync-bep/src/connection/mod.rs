//! Per-peer connection handling.

pub mod actor;
pub mod cluster_config;
pub mod hello;
pub mod wire;

pub use actor::{
    ConnectionActor, ConnectionContext, ConnectionHandle, ConnectionState, RejectingRequestHandler,
    RequestHandler,
};
pub use cluster_config::ClusterConfigInfo;
pub use wire::Wire;
