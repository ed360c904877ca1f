//! Declarative authorization metadata attached to schema types and fields.

use std::collections::HashMap;
use std::sync::Arc;

use async_graphql::dynamic::TypeRef;

use crate::authz::config::{
    BaseQueryFn, Configured, FetchSubjectFn, FinalizeQueryFn, HandlerFn, LoaderFn, WrapFn,
};
use crate::authz::types::{Action, Arity, AuthzModule, ResourceDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

/// The field currently being resolved, as declared on the schema.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub parent_type: String,
    pub name: String,
    pub return_type: TypeRef,
    pub operation: OperationKind,
}

impl FieldInfo {
    pub fn new(parent_type: impl Into<String>, name: impl Into<String>, return_type: TypeRef) -> Self {
        Self {
            parent_type: parent_type.into(),
            name: name.into(),
            return_type,
            operation: OperationKind::Query,
        }
    }

    pub fn with_operation(mut self, operation: OperationKind) -> Self {
        self.operation = operation;
        self
    }

    pub fn mutation(self) -> Self {
        self.with_operation(OperationKind::Mutation)
    }

    /// `Parent.field`
    pub fn path(&self) -> String {
        format!("{}.{}", self.parent_type, self.name)
    }

    pub fn type_name(&self) -> &str {
        named_type(&self.return_type)
    }

    pub fn arity(&self) -> Arity {
        arity(&self.return_type)
    }
}

/// The named type under any number of non-null and list wrappers.
pub fn named_type(ty: &TypeRef) -> &str {
    match ty {
        TypeRef::Named(name) => name,
        TypeRef::NonNull(inner) | TypeRef::List(inner) => named_type(inner),
    }
}

/// Number of list wrappers between the field and its named type.
pub fn list_depth(ty: &TypeRef) -> usize {
    match ty {
        TypeRef::Named(_) => 0,
        TypeRef::NonNull(inner) => list_depth(inner),
        TypeRef::List(inner) => 1 + list_depth(inner),
    }
}

pub fn arity(ty: &TypeRef) -> Arity {
    if list_depth(ty) > 0 {
        Arity::Many
    } else {
        Arity::One
    }
}

/// Metadata attached to an object type.
#[derive(Debug, Clone)]
pub struct TypeAuthz {
    pub resource: ResourceDescriptor,
    pub module: Option<AuthzModule>,
}

impl TypeAuthz {
    pub fn new(resource: ResourceDescriptor) -> Self {
        Self {
            resource,
            module: None,
        }
    }

    pub fn module(mut self, module: impl Into<AuthzModule>) -> Self {
        self.module = Some(module.into());
        self
    }
}

/// Association keys for a batched field: child rows whose `key_field`
/// equals the parent's `parent_field`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchKey {
    pub key_field: String,
    pub parent_field: String,
}

/// Metadata attached to a single field. Everything except the action is
/// optional, and the action itself defaults for query fields.
#[derive(Debug, Clone, Default)]
pub struct FieldAuthz {
    pub action: Option<Action>,
    pub id_param: Option<String>,
    pub id_field: Option<String>,
    pub base_query: Option<Configured<BaseQueryFn>>,
    pub finalize_query: Option<Configured<FinalizeQueryFn>>,
    pub fetch_subject: Option<Configured<FetchSubjectFn>>,
    pub handle_unauthorized: Option<Configured<HandlerFn>>,
    pub handle_not_found: Option<Configured<HandlerFn>>,
    pub unauthorized_message: Option<String>,
    pub loader: Option<Configured<LoaderFn>>,
    pub wrap_authorized: Option<Configured<WrapFn>>,
    pub batch_key: Option<BatchKey>,
    /// Schema module that declared the field; unqualified helper
    /// references resolve against it.
    pub declared_in: Option<String>,
}

impl FieldAuthz {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action(mut self, action: impl Into<Action>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn id_param(mut self, name: impl Into<String>) -> Self {
        self.id_param = Some(name.into());
        self
    }

    pub fn id_field(mut self, name: impl Into<String>) -> Self {
        self.id_field = Some(name.into());
        self
    }

    pub fn base_query(mut self, value: impl Into<Configured<BaseQueryFn>>) -> Self {
        self.base_query = Some(value.into());
        self
    }

    pub fn finalize_query(mut self, value: impl Into<Configured<FinalizeQueryFn>>) -> Self {
        self.finalize_query = Some(value.into());
        self
    }

    pub fn fetch_subject(mut self, value: impl Into<Configured<FetchSubjectFn>>) -> Self {
        self.fetch_subject = Some(value.into());
        self
    }

    pub fn handle_unauthorized(mut self, value: impl Into<Configured<HandlerFn>>) -> Self {
        self.handle_unauthorized = Some(value.into());
        self
    }

    pub fn handle_not_found(mut self, value: impl Into<Configured<HandlerFn>>) -> Self {
        self.handle_not_found = Some(value.into());
        self
    }

    pub fn unauthorized_message(mut self, message: impl Into<String>) -> Self {
        self.unauthorized_message = Some(message.into());
        self
    }

    pub fn loader(mut self, value: impl Into<Configured<LoaderFn>>) -> Self {
        self.loader = Some(value.into());
        self
    }

    pub fn wrap_authorized(mut self, value: impl Into<Configured<WrapFn>>) -> Self {
        self.wrap_authorized = Some(value.into());
        self
    }

    pub fn batch_key(mut self, key_field: impl Into<String>, parent_field: impl Into<String>) -> Self {
        self.batch_key = Some(BatchKey {
            key_field: key_field.into(),
            parent_field: parent_field.into(),
        });
        self
    }

    pub fn declared_in(mut self, module: impl Into<String>) -> Self {
        self.declared_in = Some(module.into());
        self
    }
}

/// Both halves of the metadata for one field. Either may be missing.
#[derive(Debug, Clone, Copy)]
pub struct FieldMetadata<'a> {
    pub type_level: Option<&'a TypeAuthz>,
    pub field_level: Option<&'a FieldAuthz>,
}

#[derive(Debug, Default)]
pub struct SchemaMetadata {
    types: HashMap<String, TypeAuthz>,
    fields: HashMap<(String, String), Arc<FieldAuthz>>,
}

impl SchemaMetadata {
    pub fn builder() -> SchemaMetadataBuilder {
        SchemaMetadataBuilder::default()
    }

    pub fn type_metadata(&self, type_name: &str) -> Option<&TypeAuthz> {
        self.types.get(type_name)
    }

    pub fn field_metadata(&self, parent_type: &str, field: &str) -> Option<&FieldAuthz> {
        self.fields
            .get(&(parent_type.to_owned(), field.to_owned()))
            .map(Arc::as_ref)
    }

    /// Metadata for the field's return type (after unwrapping) and for the
    /// field itself.
    pub fn lookup(&self, field: &FieldInfo) -> FieldMetadata<'_> {
        FieldMetadata {
            type_level: self.type_metadata(field.type_name()),
            field_level: self.field_metadata(&field.parent_type, &field.name),
        }
    }
}

#[derive(Debug, Default)]
pub struct SchemaMetadataBuilder {
    inner: SchemaMetadata,
}

impl SchemaMetadataBuilder {
    pub fn authorize_type(mut self, type_name: impl Into<String>, authz: TypeAuthz) -> Self {
        self.inner.types.insert(type_name.into(), authz);
        self
    }

    pub fn authorize_field(
        mut self,
        parent_type: impl Into<String>,
        field: impl Into<String>,
        authz: FieldAuthz,
    ) -> Self {
        self.inner
            .fields
            .insert((parent_type.into(), field.into()), Arc::new(authz));
        self
    }

    pub fn build(self) -> SchemaMetadata {
        self.inner
    }
}
