//! Per-invocation state: the ambient request handle and the resolution
//! context handed to every configuration callback.

use std::sync::Arc;

use serde_json::Value;

use crate::authz::batch::LoaderRegistry;
use crate::authz::config::{
    resolve_option, BaseQueryFn, FetchSubjectFn, FinalizeQueryFn, HandlerFn, LoaderFn,
    SchemaModules, WrapFn,
};
use crate::authz::metadata::{BatchKey, FieldAuthz, FieldInfo};
use crate::authz::types::{Action, AuthzModule, Params, Record, ResourceDescriptor, Subject};

pub const DEFAULT_ID_PARAM: &str = "id";

/// What the execution engine knows about the request a field runs in.
#[derive(Clone)]
pub struct RequestHandle {
    field: Arc<FieldInfo>,
    subject: Option<Subject>,
    parent: Option<Record>,
    loaders: Option<Arc<LoaderRegistry>>,
}

impl RequestHandle {
    pub fn new(field: Arc<FieldInfo>) -> Self {
        Self {
            field,
            subject: None,
            parent: None,
            loaders: None,
        }
    }

    pub fn with_subject(mut self, subject: Option<Subject>) -> Self {
        self.subject = subject;
        self
    }

    pub fn with_parent(mut self, parent: Option<Record>) -> Self {
        self.parent = parent;
        self
    }

    pub fn with_loaders(mut self, loaders: Arc<LoaderRegistry>) -> Self {
        self.loaders = Some(loaders);
        self
    }

    pub fn field(&self) -> &FieldInfo {
        &self.field
    }

    /// The subject the transport layer attached to the request.
    pub fn subject(&self) -> Option<&Subject> {
        self.subject.as_ref()
    }

    /// The record the enclosing object resolved to, for nested fields.
    pub fn parent(&self) -> Option<&Record> {
        self.parent.as_ref()
    }

    pub fn loaders(&self) -> Option<&Arc<LoaderRegistry>> {
        self.loaders.as_ref()
    }
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("field", &self.field.path())
            .field("subject", &self.subject.as_ref().map(|s| &s.id))
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

/// Field configuration with every override resolved to a callback or
/// left empty for the engine default.
#[derive(Default)]
pub struct FieldConfig {
    pub id_param: String,
    pub id_field: String,
    pub base_query: Option<Arc<BaseQueryFn>>,
    pub finalize_query: Option<Arc<FinalizeQueryFn>>,
    pub fetch_subject: Option<Arc<FetchSubjectFn>>,
    pub handle_unauthorized: Option<Arc<HandlerFn>>,
    pub handle_not_found: Option<Arc<HandlerFn>>,
    pub unauthorized_message: Option<String>,
    pub loader: Option<Arc<LoaderFn>>,
    pub wrap_authorized: Option<Arc<WrapFn>>,
    pub batch_key: Option<BatchKey>,
}

impl FieldConfig {
    pub fn resolve(
        authz: Option<&FieldAuthz>,
        resource: &ResourceDescriptor,
        modules: &SchemaModules,
    ) -> Self {
        let Some(authz) = authz else {
            return Self {
                id_param: DEFAULT_ID_PARAM.to_owned(),
                id_field: resource.primary_key().to_owned(),
                ..Self::default()
            };
        };
        let declared_in = authz.declared_in.as_deref();
        Self {
            id_param: authz
                .id_param
                .clone()
                .unwrap_or_else(|| DEFAULT_ID_PARAM.to_owned()),
            id_field: authz
                .id_field
                .clone()
                .unwrap_or_else(|| resource.primary_key().to_owned()),
            base_query: resolve_option("base_query", authz.base_query.as_ref(), declared_in, modules),
            finalize_query: resolve_option(
                "finalize_query",
                authz.finalize_query.as_ref(),
                declared_in,
                modules,
            ),
            fetch_subject: resolve_option(
                "fetch_subject",
                authz.fetch_subject.as_ref(),
                declared_in,
                modules,
            ),
            handle_unauthorized: resolve_option(
                "handle_unauthorized",
                authz.handle_unauthorized.as_ref(),
                declared_in,
                modules,
            ),
            handle_not_found: resolve_option(
                "handle_not_found",
                authz.handle_not_found.as_ref(),
                declared_in,
                modules,
            ),
            unauthorized_message: authz.unauthorized_message.clone(),
            loader: resolve_option("loader", authz.loader.as_ref(), declared_in, modules),
            wrap_authorized: resolve_option(
                "wrap_authorized",
                authz.wrap_authorized.as_ref(),
                declared_in,
                modules,
            ),
            batch_key: authz.batch_key.clone(),
        }
    }
}

impl std::fmt::Debug for FieldConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldConfig")
            .field("id_param", &self.id_param)
            .field("id_field", &self.id_field)
            .field("base_query", &self.base_query.is_some())
            .field("finalize_query", &self.finalize_query.is_some())
            .field("fetch_subject", &self.fetch_subject.is_some())
            .field("handle_unauthorized", &self.handle_unauthorized.is_some())
            .field("handle_not_found", &self.handle_not_found.is_some())
            .field("unauthorized_message", &self.unauthorized_message)
            .field("loader", &self.loader.is_some())
            .field("wrap_authorized", &self.wrap_authorized.is_some())
            .field("batch_key", &self.batch_key)
            .finish()
    }
}

/// Everything a callback may need about the current field invocation.
/// Built fresh for every invocation.
#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub subject: Option<Subject>,
    pub resource: ResourceDescriptor,
    pub module: AuthzModule,
    pub action: Action,
    pub params: Params,
    pub config: Arc<FieldConfig>,
    pub request: RequestHandle,
}

impl ResolutionContext {
    pub fn with_subject(mut self, subject: Option<Subject>) -> Self {
        self.subject = subject;
        self
    }

    /// The id argument, under the configured parameter name.
    pub fn id(&self) -> Option<&Value> {
        self.params.get(&self.config.id_param)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::config::{wrap, SchemaModule};
    use async_graphql::dynamic::TypeRef;
    use serde_json::json;

    fn tasks() -> ResourceDescriptor {
        ResourceDescriptor::new("tasks", "task_id")
    }

    #[test]
    fn test_defaults_without_field_metadata() {
        let config = FieldConfig::resolve(None, &tasks(), &SchemaModules::new());
        assert_eq!(config.id_param, "id");
        assert_eq!(config.id_field, "task_id");
        assert!(config.loader.is_none());
        assert!(config.wrap_authorized.is_none());
    }

    #[test]
    fn test_overrides_are_resolved() {
        let modules = SchemaModules::new()
            .register(SchemaModule::new("tasks").helper("passthrough", wrap(Ok)));
        let authz = FieldAuthz::new()
            .action("read")
            .id_param("taskId")
            .id_field("id")
            .unauthorized_message("Go away")
            .wrap_authorized("passthrough")
            .handle_not_found("missing")
            .declared_in("tasks");

        let config = FieldConfig::resolve(Some(&authz), &tasks(), &modules);
        assert_eq!(config.id_param, "taskId");
        assert_eq!(config.id_field, "id");
        assert_eq!(config.unauthorized_message.as_deref(), Some("Go away"));
        assert!(config.wrap_authorized.is_some());
        // unknown helper degrades to the default handler
        assert!(config.handle_not_found.is_none());
    }

    #[test]
    fn test_context_id_uses_configured_param() {
        let field = Arc::new(FieldInfo::new("Query", "task", TypeRef::named("Task")));
        let mut params = Params::new();
        params.insert("taskId".into(), json!(9));
        let authz = FieldAuthz::new().id_param("taskId");
        let ctx = ResolutionContext {
            subject: None,
            resource: tasks(),
            module: AuthzModule::from("tasks"),
            action: Action::READ,
            params,
            config: Arc::new(FieldConfig::resolve(Some(&authz), &tasks(), &SchemaModules::new())),
            request: RequestHandle::new(field),
        };
        assert_eq!(ctx.id(), Some(&json!(9)));
    }
}
