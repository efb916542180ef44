//! Hub method descriptors, the method table, and lifecycle hooks.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;

use crate::errors::{BindingError, ConfigError, MethodError, SessionError};
use crate::hub::context::{CallerContext, HubCall};

/// Names clients may never invoke.
pub const RESERVED_METHODS: [&str; 3] = ["OnConnected", "OnDisconnected", "Dispose"];

/// Whether `name` collides with a lifecycle hook (case-insensitive).
pub fn is_reserved(name: &str) -> bool {
    RESERVED_METHODS.iter().any(|r| r.eq_ignore_ascii_case(name))
}

/// Declared JSON type of one positional argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamType {
    /// Any value, including `null`.
    Any,
    /// A JSON string.
    String,
    /// Any JSON number.
    Number,
    /// A JSON number with no fractional part.
    Integer,
    /// `true` or `false`.
    Bool,
    /// A JSON object.
    Object,
    /// A JSON array.
    Array,
}

impl ParamType {
    /// Whether `value` can bind to this parameter.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Bool => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }

    /// Name used in binding errors.
    pub fn name(self) -> &'static str {
        match self {
            Self::Any => "value",
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Bool => "bool",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

/// What a method produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnKind {
    /// Nothing; callers get an empty completion.
    Unit,
    /// One value.
    Value,
    /// A stream of items; only callable through a streaming invocation.
    Stream,
}

/// Result of running a hub method.
pub enum MethodOutput {
    /// No value.
    Unit,
    /// One value.
    Value(Value),
    /// Items streamed to the caller until the stream ends or errors.
    Stream(BoxStream<'static, Result<Value, MethodError>>),
}

impl MethodOutput {
    /// Serialize a value result.
    pub fn value(value: impl Serialize) -> Result<Self, MethodError> {
        serde_json::to_value(value)
            .map(Self::Value)
            .map_err(|e| MethodError::failure("SerializationError", e.to_string()))
    }

    /// Box a stream result.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Value, MethodError>> + Send + 'static,
    {
        Self::Stream(stream.boxed())
    }
}

impl fmt::Debug for MethodOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => f.write_str("Unit"),
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Body of a hub method.
#[async_trait]
pub trait HubMethod: Send + Sync + 'static {
    /// Run the method for one invocation.
    async fn invoke(&self, call: HubCall) -> Result<MethodOutput, MethodError>;
}

#[async_trait]
impl<F, Fut> HubMethod for F
where
    F: Fn(HubCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<MethodOutput, MethodError>> + Send + 'static,
{
    async fn invoke(&self, call: HubCall) -> Result<MethodOutput, MethodError> {
        (self)(call).await
    }
}

/// A named method with its declared shape.
#[derive(Clone)]
pub struct MethodDescriptor {
    name: String,
    params: Vec<ParamType>,
    upload_streams: usize,
    returns: ReturnKind,
    handler: Arc<dyn HubMethod>,
}

impl MethodDescriptor {
    /// Method returning one value, with no parameters declared yet.
    pub fn new(name: impl Into<String>, handler: impl HubMethod) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            upload_streams: 0,
            returns: ReturnKind::Value,
            handler: Arc::new(handler),
        }
    }

    /// Method streaming its results.
    pub fn streaming(name: impl Into<String>, handler: impl HubMethod) -> Self {
        Self::new(name, handler).returns(ReturnKind::Stream)
    }

    /// Declare positional parameters.
    #[must_use]
    pub fn params(mut self, params: impl IntoIterator<Item = ParamType>) -> Self {
        self.params = params.into_iter().collect();
        self
    }

    /// Declare how many client upload streams the method takes.
    #[must_use]
    pub fn upload_streams(mut self, count: usize) -> Self {
        self.upload_streams = count;
        self
    }

    /// Declare the return kind.
    #[must_use]
    pub fn returns(mut self, returns: ReturnKind) -> Self {
        self.returns = returns;
        self
    }

    /// Method name as registered.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameters.
    pub fn param_types(&self) -> &[ParamType] {
        &self.params
    }

    /// Declared upload stream count.
    pub fn stream_count(&self) -> usize {
        self.upload_streams
    }

    /// Declared return kind.
    pub fn return_kind(&self) -> ReturnKind {
        self.returns
    }

    /// Whether the method streams results.
    pub fn is_streaming(&self) -> bool {
        self.returns == ReturnKind::Stream
    }

    /// Method body.
    pub fn handler(&self) -> &Arc<dyn HubMethod> {
        &self.handler
    }

    /// Check arguments against the declared parameters.
    pub fn bind(&self, arguments: &[Value]) -> Result<(), BindingError> {
        if arguments.len() != self.params.len() {
            return Err(BindingError::Count {
                provided: arguments.len(),
                expected: self.params.len(),
            });
        }
        match self
            .params
            .iter()
            .zip(arguments)
            .position(|(param, arg)| !param.accepts(arg))
        {
            Some(index) => Err(BindingError::Type {
                index,
                expected: self.params[index].name(),
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("upload_streams", &self.upload_streams)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

/// Maps an invocation target to a method.
pub trait MethodResolver: Send + Sync + 'static {
    /// Find the method for `name`, if any.
    fn resolve(&self, name: &str) -> Option<Arc<MethodDescriptor>>;
}

/// Fixed set of methods, looked up case-insensitively.
#[derive(Debug, Default)]
pub struct MethodTable {
    methods: HashMap<String, Arc<MethodDescriptor>>,
}

impl MethodTable {
    /// Start building a table.
    pub fn builder() -> MethodTableBuilder {
        MethodTableBuilder::default()
    }

    /// Registered method names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.values().map(|m| m.name()).collect();
        names.sort_unstable();
        names
    }

    /// Number of methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl MethodResolver for MethodTable {
    fn resolve(&self, name: &str) -> Option<Arc<MethodDescriptor>> {
        self.methods.get(&name.to_ascii_lowercase()).cloned()
    }
}

/// Collects descriptors and validates them into a [`MethodTable`].
#[derive(Debug, Default)]
pub struct MethodTableBuilder {
    methods: Vec<MethodDescriptor>,
}

impl MethodTableBuilder {
    /// Add a method.
    #[must_use]
    pub fn method(mut self, descriptor: MethodDescriptor) -> Self {
        self.methods.push(descriptor);
        self
    }

    /// Validate and build. Fails on reserved or duplicate names.
    pub fn build(self) -> Result<MethodTable, ConfigError> {
        let mut methods = HashMap::with_capacity(self.methods.len());
        for descriptor in self.methods {
            if is_reserved(descriptor.name()) {
                return Err(ConfigError::ReservedMethod(descriptor.name().to_owned()));
            }
            let key = descriptor.name().to_ascii_lowercase();
            if methods.contains_key(&key) {
                return Err(ConfigError::DuplicateMethod(descriptor.name().to_owned()));
            }
            let _ = methods.insert(key, Arc::new(descriptor));
        }
        Ok(MethodTable { methods })
    }
}

/// Resolver backed by a closure, for method sets decided at call time.
pub struct DynamicResolver<F> {
    resolve: F,
}

impl<F> DynamicResolver<F>
where
    F: Fn(&str) -> Option<Arc<MethodDescriptor>> + Send + Sync + 'static,
{
    /// Wrap a lookup function.
    pub fn new(resolve: F) -> Self {
        Self { resolve }
    }
}

impl<F> MethodResolver for DynamicResolver<F>
where
    F: Fn(&str) -> Option<Arc<MethodDescriptor>> + Send + Sync + 'static,
{
    fn resolve(&self, name: &str) -> Option<Arc<MethodDescriptor>> {
        (self.resolve)(name)
    }
}

/// Connect and disconnect hooks of a hub.
#[async_trait]
pub trait HubLifecycle: Send + Sync + 'static {
    /// Runs after the connection is registered, before messages are read.
    async fn on_connected(&self, ctx: &CallerContext) -> Result<(), MethodError> {
        let _ = ctx;
        Ok(())
    }

    /// Runs once when the connection ends, with the error that ended it.
    async fn on_disconnected(
        &self,
        ctx: &CallerContext,
        error: Option<&SessionError>,
    ) -> Result<(), MethodError> {
        let _ = (ctx, error);
        Ok(())
    }
}

/// Lifecycle with no hooks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLifecycle;

impl HubLifecycle for NoLifecycle {}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
