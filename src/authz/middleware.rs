//! Middleware form of the engine: authorize before the field's own resolver
//! runs, leaving the loaded value in the resolution state.

use std::collections::HashMap;

use serde_json::Value;

use crate::authz::context::RequestHandle;
use crate::authz::engine::Engine;
use crate::authz::errors::GuardError;
use crate::authz::types::{Arity, FieldResponse, Outcome, Params};

pub const LOADED_RESOURCE: &str = "loaded_resource";
pub const LOADED_RESOURCES: &str = "loaded_resources";

/// Mutable state threaded through a field's middleware chain.
#[derive(Debug)]
pub struct ResolutionState {
    pub params: Params,
    pub request: RequestHandle,
    pub context: HashMap<String, Value>,
    /// Set once the field has a final answer; later steps must not run.
    pub result: Option<FieldResponse>,
}

impl ResolutionState {
    pub fn new(params: Params, request: RequestHandle) -> Self {
        Self {
            params,
            request,
            context: HashMap::new(),
            result: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.result.is_some()
    }

    pub fn loaded_resource(&self) -> Option<&Value> {
        self.context.get(LOADED_RESOURCE)
    }

    pub fn loaded_resources(&self) -> Option<&Value> {
        self.context.get(LOADED_RESOURCES)
    }
}

/// Load and authorize for the field in `state`. On success the value is
/// stored under [`LOADED_RESOURCE`] or [`LOADED_RESOURCES`]; otherwise the
/// state is resolved with the error response.
pub async fn authorize(engine: &Engine, state: &mut ResolutionState, arity: Arity) -> Result<(), GuardError> {
    if state.is_resolved() {
        return Ok(());
    }

    let resolution = engine
        .load(state.params.clone(), state.request.clone(), Some(arity))
        .await?;

    match &resolution.outcome {
        Outcome::Authorized(loaded) => {
            let key = match arity {
                Arity::One => LOADED_RESOURCE,
                Arity::Many => LOADED_RESOURCES,
            };
            state.context.insert(key.to_owned(), loaded.to_json());
        }
        Outcome::Unauthorized | Outcome::NotFound => {
            state.result = Some(engine.respond(resolution));
        }
    }
    Ok(())
}
