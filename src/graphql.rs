//! Adapters between the engine and async-graphql's dynamic schema.

use std::sync::Arc;

use async_graphql::dynamic::{Field, FieldFuture, FieldValue, ResolverContext, TypeRef};
use async_graphql::ErrorExtensions;
use serde_json::Value;

use crate::authz::{
    Engine, FieldError, FieldInfo, GuardError, Loaded, LoaderRegistry, Params, Record, RequestHandle,
    Subject,
};

pub fn graphql_error(err: FieldError) -> async_graphql::Error {
    let FieldError {
        message,
        code,
        extensions,
    } = err;
    async_graphql::Error::new(message).extend_with(|_, ext| {
        if let Some(code) = code {
            ext.set("code", code);
        }
        for (key, value) in extensions {
            if let Ok(value) = async_graphql::Value::from_json(value) {
                ext.set(key, value);
            }
        }
    })
}

/// Configuration errors surface as field errors with a distinct code.
pub fn configuration_error(err: GuardError) -> async_graphql::Error {
    tracing::error!(error = %err, "Field is misconfigured");
    async_graphql::Error::new(err.to_string()).extend_with(|_, ext| ext.set("code", "CONFIGURATION"))
}

/// Gather what the engine needs to know about the request from the
/// resolver context.
pub fn request_handle(ctx: &ResolverContext<'_>, info: &Arc<FieldInfo>) -> RequestHandle {
    let mut handle = RequestHandle::new(info.clone())
        .with_subject(ctx.ctx.data_opt::<Subject>().cloned())
        .with_parent(ctx.parent_value.try_downcast_ref::<Record>().ok().cloned());
    if let Some(loaders) = ctx.ctx.data_opt::<Arc<LoaderRegistry>>() {
        handle = handle.with_loaders(loaders.clone());
    }
    handle
}

/// Field arguments as JSON.
pub fn field_params(ctx: &ResolverContext<'_>) -> Params {
    ctx.args
        .iter()
        .filter_map(|(name, value)| {
            let json = value.as_value().clone().into_json().ok()?;
            Some((name.to_string(), json))
        })
        .collect()
}

/// Records become opaque parent values for the object's own fields.
pub fn field_value<'a>(loaded: Loaded) -> Option<FieldValue<'a>> {
    match loaded {
        Loaded::Nothing => None,
        Loaded::One(record) => Some(FieldValue::owned_any(record)),
        Loaded::Many(records) => Some(FieldValue::list(
            records.into_iter().map(FieldValue::owned_any),
        )),
    }
}

/// A field resolved by [`Engine::resolve`].
pub fn authorized_field(engine: Arc<Engine>, info: FieldInfo) -> Field {
    let info = Arc::new(info);
    let (name, ty) = (info.name.clone(), info.return_type.clone());
    Field::new(name, ty, move |ctx| {
        let engine = engine.clone();
        let info = info.clone();
        FieldFuture::new(async move {
            let request = request_handle(&ctx, &info);
            let response = engine
                .resolve(field_params(&ctx), request)
                .await
                .map_err(configuration_error)?;
            response.map(field_value).map_err(graphql_error)
        })
    })
}

/// An association field resolved through the request's batch sources.
pub fn batched_field(engine: Arc<Engine>, info: FieldInfo) -> Field {
    let info = Arc::new(info);
    let (name, ty) = (info.name.clone(), info.return_type.clone());
    Field::new(name, ty, move |ctx| {
        let engine = engine.clone();
        let info = info.clone();
        FieldFuture::new(async move {
            let request = request_handle(&ctx, &info);
            let response = engine
                .resolve_batched(field_params(&ctx), request)
                .await
                .map_err(configuration_error)?;
            response.map(field_value).map_err(graphql_error)
        })
    })
}

/// A scalar read straight from the parent record.
pub fn record_field(name: &str, ty: TypeRef, column: &str) -> Field {
    let column = column.to_owned();
    Field::new(name, ty, move |ctx| {
        let column = column.clone();
        FieldFuture::new(async move {
            let record = ctx.parent_value.try_downcast_ref::<Record>()?;
            let value = match record.get(&column) {
                None | Some(Value::Null) => None,
                Some(value) => Some(FieldValue::value(async_graphql::Value::from_json(
                    value.clone(),
                )?)),
            };
            Ok::<_, async_graphql::Error>(value)
        })
    })
}
