//! Authorization-aware field resolution.
//!
//! A field's return type names a resource and the policy module that owns
//! it; the field names the action and any overrides. The [`Engine`] fetches
//! the subject, loads what the field asks for under the subject's
//! permissions and answers with the value or a typed error.

pub mod batch;
pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
mod fault;
pub mod metadata;
pub mod middleware;
pub mod query;
pub mod resolver;
pub mod types;

pub use batch::{FieldKey, LoaderRegistry, RecordKey, SourceKey};
pub use config::{Configured, SchemaModule, SchemaModules};
pub use context::{RequestHandle, ResolutionContext};
pub use engine::{Engine, Resolution};
pub use errors::GuardError;
pub use metadata::{FieldAuthz, FieldInfo, OperationKind, SchemaMetadata, TypeAuthz};
pub use middleware::{authorize, ResolutionState, LOADED_RESOURCE, LOADED_RESOURCES};
pub use query::{DataSource, ResourceQuery, Scope};
pub use resolver::{Authorizer, Policy, QueryBundle, ScopedAuthorizer};
pub use types::{
    Action, Arity, AuthzModule, FieldError, FieldResponse, Loaded, Outcome, Params, Record,
    ResourceDescriptor, Subject,
};
