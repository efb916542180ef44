//! Hub configuration and the per-connection entry point.
//!
//! [`HubEndpointBuilder::build`] does every startup check (options, codec
//! allow-list, duplicate or reserved method names) so a misconfigured hub
//! fails before it accepts a connection. The built [`HubEndpoint`] is cheap
//! to clone and serves any ordered byte stream.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use switchboard_core::protocol::{CodecRegistry, HubCodec};
use switchboard_core::{ConnectionId, UserId};
use switchboard_settings::HubOptions;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::errors::{ConfigError, SessionError};
use crate::filters::{self, FilterFactory, HubFilter};
use crate::hub::clients::HubContext;
use crate::hub::methods::{
    HubLifecycle, MethodDescriptor, MethodResolver, MethodTable, MethodTableBuilder, NoLifecycle,
};
use crate::registry::LifetimeRegistry;
use crate::session;

/// Transport-supplied facts about a new connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionInfo {
    /// Connection id; generated when absent.
    pub id: Option<ConnectionId>,
    /// Authenticated user, if the host established one.
    pub user_id: Option<UserId>,
    /// Initial metadata items.
    pub items: HashMap<String, Value>,
    /// Whether the transport can carry binary payloads.
    pub binary: bool,
}

/// Everything sessions share.
pub(crate) struct HubShared {
    pub(crate) options: HubOptions,
    pub(crate) codecs: CodecRegistry,
    pub(crate) resolver: Arc<dyn MethodResolver>,
    pub(crate) lifecycle: Arc<dyn HubLifecycle>,
    pub(crate) filters: Vec<Arc<dyn FilterFactory>>,
    pub(crate) registry: Arc<LifetimeRegistry>,
    pub(crate) shutdown: CancellationToken,
}

/// A configured hub, ready to serve connections.
#[derive(Clone)]
pub struct HubEndpoint {
    shared: Arc<HubShared>,
}

impl HubEndpoint {
    /// Start configuring a hub.
    pub fn builder() -> HubEndpointBuilder {
        HubEndpointBuilder::default()
    }

    /// Effective options.
    pub fn options(&self) -> &HubOptions {
        &self.shared.options
    }

    /// Registry of live connections.
    pub fn registry(&self) -> &Arc<LifetimeRegistry> {
        &self.shared.registry
    }

    /// Send to clients from outside a hub method.
    pub fn context(&self) -> HubContext {
        HubContext::new(self.shared.registry.clone())
    }

    /// Token that closes every connection when cancelled.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shared.shutdown
    }

    /// Protocols a client may negotiate, sorted.
    pub fn protocols(&self) -> Vec<&str> {
        self.shared.codecs.names()
    }

    /// Serve one connection over a duplex byte stream until it closes.
    pub async fn serve<T>(&self, io: T, info: ConnectionInfo) -> Result<(), SessionError>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(io);
        self.serve_split(read, write, info).await
    }

    /// Serve one connection over separate read and write halves.
    pub async fn serve_split<R, W>(
        &self,
        read: R,
        write: W,
        info: ConnectionInfo,
    ) -> Result<(), SessionError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        session::run(self.shared.clone(), read, write, info).await
    }
}

impl fmt::Debug for HubEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubEndpoint")
            .field("protocols", &self.protocols())
            .field("filters", &self.shared.filters.len())
            .field("connections", &self.shared.registry.connection_count())
            .finish_non_exhaustive()
    }
}

/// Table first, then each extra resolver in registration order.
struct LayeredResolver {
    table: MethodTable,
    fallbacks: Vec<Arc<dyn MethodResolver>>,
}

impl MethodResolver for LayeredResolver {
    fn resolve(&self, name: &str) -> Option<Arc<MethodDescriptor>> {
        self.table
            .resolve(name)
            .or_else(|| self.fallbacks.iter().find_map(|r| r.resolve(name)))
    }
}

/// Collects hub configuration.
pub struct HubEndpointBuilder {
    options: HubOptions,
    codecs: Vec<Arc<dyn HubCodec>>,
    methods: MethodTableBuilder,
    resolvers: Vec<Arc<dyn MethodResolver>>,
    lifecycle: Arc<dyn HubLifecycle>,
    filters: Vec<Arc<dyn FilterFactory>>,
    registry: Option<Arc<LifetimeRegistry>>,
    shutdown: Option<CancellationToken>,
}

impl Default for HubEndpointBuilder {
    fn default() -> Self {
        Self {
            options: HubOptions::default(),
            codecs: Vec::new(),
            methods: MethodTable::builder(),
            resolvers: Vec::new(),
            lifecycle: Arc::new(NoLifecycle),
            filters: Vec::new(),
            registry: None,
            shutdown: None,
        }
    }
}

impl HubEndpointBuilder {
    /// Hub options.
    #[must_use]
    pub fn options(mut self, options: HubOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a codec. The built-in `json` and `messagepack` codecs are
    /// used when none are registered.
    #[must_use]
    pub fn codec(mut self, codec: Arc<dyn HubCodec>) -> Self {
        self.codecs.push(codec);
        self
    }

    /// Add a method to the hub's table.
    #[must_use]
    pub fn method(mut self, descriptor: MethodDescriptor) -> Self {
        self.methods = self.methods.method(descriptor);
        self
    }

    /// Consult `resolver` for names missing from the table.
    #[must_use]
    pub fn resolver(mut self, resolver: impl MethodResolver) -> Self {
        self.resolvers.push(Arc::new(resolver));
        self
    }

    /// Connect and disconnect hooks.
    #[must_use]
    pub fn lifecycle(mut self, lifecycle: impl HubLifecycle) -> Self {
        self.lifecycle = Arc::new(lifecycle);
        self
    }

    /// Add a filter shared by every connection.
    #[must_use]
    pub fn filter(mut self, filter: impl HubFilter) -> Self {
        self.filters.push(filters::shared(Arc::new(filter)));
        self
    }

    /// Add a filter built fresh for each connection.
    #[must_use]
    pub fn filter_factory(mut self, factory: impl FilterFactory) -> Self {
        self.filters.push(Arc::new(factory));
        self
    }

    /// Share a registry with other endpoints.
    #[must_use]
    pub fn registry(mut self, registry: Arc<LifetimeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Close connections when `token` is cancelled.
    #[must_use]
    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Validate everything and build the endpoint.
    pub fn build(self) -> Result<HubEndpoint, ConfigError> {
        self.options.validate()?;
        let codecs = if self.codecs.is_empty() {
            CodecRegistry::builtin()
        } else {
            CodecRegistry::new(self.codecs)?
        };
        let codecs = codecs.restrict(&self.options.supported_protocols)?;
        let table = self.methods.build()?;
        info!(
            methods = table.len(),
            protocols = ?codecs.names(),
            filters = self.filters.len(),
            "hub configured"
        );

        Ok(HubEndpoint {
            shared: Arc::new(HubShared {
                options: self.options,
                codecs,
                resolver: Arc::new(LayeredResolver {
                    table,
                    fallbacks: self.resolvers,
                }),
                lifecycle: self.lifecycle,
                filters: self.filters,
                registry: self.registry.unwrap_or_default(),
                shutdown: self.shutdown.unwrap_or_default(),
            }),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
