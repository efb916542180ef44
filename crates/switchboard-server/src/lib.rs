//! # switchboard-server
//!
//! Bidirectional RPC hub sessions over any ordered byte stream.
//!
//! - [`endpoint`]: hub configuration, startup validation, per-connection entry point
//! - [`hub`]: method table, lifecycle hooks, caller context, client proxies
//! - [`filters`]: middleware around connect, invoke, and disconnect
//! - [`registry`]: live connections, groups, users, and fan-out sends
//! - [`connection`]: per-connection handle, outbound queue, client results
//! - [`session`]: handshake, read loop, invocation state, keep-alive, timeouts
//! - [`server`]: axum host with `/health`, `/metrics`, and the hub WebSocket
//! - [`shutdown`]: graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod connection;
pub mod endpoint;
pub mod errors;
pub mod filters;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod transport;

pub use connection::{ConnectionHandle, ConnectionState};
pub use endpoint::{ConnectionInfo, HubEndpoint, HubEndpointBuilder};
pub use errors::{
    BindingError, ClientResultError, ConfigError, MethodError, RegistryError, SendError,
    SessionError, StreamError,
};
pub use filters::{ConnectNext, DisconnectNext, FilterChain, FilterFactory, HubFilter, InvokeNext};
pub use registry::{LifetimeRegistry, Target};
pub use server::HubServer;
pub use session::uploads::UploadStream;
pub use shutdown::ShutdownCoordinator;
