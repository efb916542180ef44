//! Ordered middleware around hub methods and lifecycle hooks.
//!
//! The first registered filter is outermost. Each hook receives a `next`
//! continuation; not calling it short-circuits the rest of the chain.
//! Disconnect hooks run only for filters whose connect hook was entered,
//! and the hub's own disconnect hook runs only if its connect hook did.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::errors::{MethodError, SessionError};
use crate::hub::context::{CallerContext, HubCall};
use crate::hub::methods::{HubLifecycle, HubMethod, MethodOutput};

/// Middleware around hub calls.
#[async_trait]
pub trait HubFilter: Send + Sync + 'static {
    /// Wraps the hub's connect hook.
    async fn on_connected(
        &self,
        ctx: &CallerContext,
        next: ConnectNext<'_>,
    ) -> Result<(), MethodError> {
        next.run(ctx).await
    }

    /// Wraps every method invocation.
    async fn invoke(&self, call: HubCall, next: InvokeNext<'_>) -> Result<MethodOutput, MethodError> {
        next.run(call).await
    }

    /// Wraps the hub's disconnect hook.
    async fn on_disconnected(
        &self,
        ctx: &CallerContext,
        error: Option<&SessionError>,
        next: DisconnectNext<'_>,
    ) -> Result<(), MethodError> {
        next.run(ctx, error).await
    }

    /// Runs once after the connection is fully torn down.
    async fn on_dispose(&self) {}
}

/// Builds the filter instance for one connection.
pub trait FilterFactory: Send + Sync + 'static {
    /// Create a filter for a new connection.
    fn create(&self) -> Arc<dyn HubFilter>;
}

impl<F> FilterFactory for F
where
    F: Fn() -> Arc<dyn HubFilter> + Send + Sync + 'static,
{
    fn create(&self) -> Arc<dyn HubFilter> {
        (self)()
    }
}

/// Factory handing every connection the same instance.
pub(crate) fn shared(filter: Arc<dyn HubFilter>) -> Arc<dyn FilterFactory> {
    Arc::new(move || filter.clone())
}

/// Remaining connect chain.
pub struct ConnectNext<'a> {
    filters: &'a [Arc<dyn HubFilter>],
    chain: &'a FilterChain,
    lifecycle: &'a dyn HubLifecycle,
}

impl ConnectNext<'_> {
    /// Run the rest of the chain.
    pub async fn run(self, ctx: &CallerContext) -> Result<(), MethodError> {
        match self.filters.split_first() {
            Some((first, rest)) => {
                let _ = self.chain.entered.fetch_add(1, Ordering::AcqRel);
                let next = ConnectNext {
                    filters: rest,
                    chain: self.chain,
                    lifecycle: self.lifecycle,
                };
                first.on_connected(ctx, next).await
            }
            None => {
                self.chain.reached_hub.store(true, Ordering::Release);
                self.lifecycle.on_connected(ctx).await
            }
        }
    }
}

/// Remaining invoke chain.
pub struct InvokeNext<'a> {
    filters: &'a [Arc<dyn HubFilter>],
    method: &'a dyn HubMethod,
}

impl InvokeNext<'_> {
    /// Run the rest of the chain.
    pub async fn run(self, call: HubCall) -> Result<MethodOutput, MethodError> {
        match self.filters.split_first() {
            Some((first, rest)) => {
                let next = InvokeNext {
                    filters: rest,
                    method: self.method,
                };
                first.invoke(call, next).await
            }
            None => self.method.invoke(call).await,
        }
    }
}

/// Remaining disconnect chain.
pub struct DisconnectNext<'a> {
    filters: &'a [Arc<dyn HubFilter>],
    lifecycle: Option<&'a dyn HubLifecycle>,
}

impl DisconnectNext<'_> {
    /// Run the rest of the chain.
    pub async fn run(
        self,
        ctx: &CallerContext,
        error: Option<&SessionError>,
    ) -> Result<(), MethodError> {
        match self.filters.split_first() {
            Some((first, rest)) => {
                let next = DisconnectNext {
                    filters: rest,
                    lifecycle: self.lifecycle,
                };
                first.on_disconnected(ctx, error, next).await
            }
            None => match self.lifecycle {
                Some(lifecycle) => lifecycle.on_disconnected(ctx, error).await,
                None => Ok(()),
            },
        }
    }
}

/// Filter instances of one connection.
pub struct FilterChain {
    filters: Vec<Arc<dyn HubFilter>>,
    entered: AtomicUsize,
    reached_hub: AtomicBool,
}

impl FilterChain {
    /// Instantiate every factory, in registration order.
    pub fn new(factories: &[Arc<dyn FilterFactory>]) -> Self {
        Self {
            filters: factories.iter().map(|f| f.create()).collect(),
            entered: AtomicUsize::new(0),
            reached_hub: AtomicBool::new(false),
        }
    }

    /// Number of filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether there are no filters.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run the connect chain ending in the hub's connect hook.
    pub async fn on_connected(
        &self,
        ctx: &CallerContext,
        lifecycle: &dyn HubLifecycle,
    ) -> Result<(), MethodError> {
        ConnectNext {
            filters: &self.filters,
            chain: self,
            lifecycle,
        }
        .run(ctx)
        .await
    }

    /// Run the invoke chain ending in `method`.
    pub async fn invoke(
        &self,
        call: HubCall,
        method: &dyn HubMethod,
    ) -> Result<MethodOutput, MethodError> {
        InvokeNext {
            filters: &self.filters,
            method,
        }
        .run(call)
        .await
    }

    /// Run the disconnect chain over the filters that were entered on
    /// connect, ending in the hub's disconnect hook if it was reached.
    pub async fn on_disconnected(
        &self,
        ctx: &CallerContext,
        error: Option<&SessionError>,
        lifecycle: &dyn HubLifecycle,
    ) -> Result<(), MethodError> {
        let entered = self.entered.load(Ordering::Acquire).min(self.filters.len());
        let lifecycle = self.reached_hub.load(Ordering::Acquire).then_some(lifecycle);
        DisconnectNext {
            filters: &self.filters[..entered],
            lifecycle,
        }
        .run(ctx, error)
        .await
    }

    /// Dispose every filter, innermost first.
    pub async fn dispose(&self) {
        for filter in self.filters.iter().rev() {
            filter.on_dispose().await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
