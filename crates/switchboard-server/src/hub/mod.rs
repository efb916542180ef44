//! The application-facing side of a hub: method declarations, lifecycle
//! hooks, and the context a method runs with.

pub mod clients;
pub mod context;
pub mod methods;

pub use clients::{CallerClients, ClientProxy, GroupManager, HubClients, HubContext, SingleClientProxy};
pub use context::{CallerContext, HubCall};
pub use methods::{
    DynamicResolver, HubLifecycle, HubMethod, MethodDescriptor, MethodOutput, MethodResolver,
    MethodTable, MethodTableBuilder, NoLifecycle, ParamType, ReturnKind, is_reserved,
};
