//! Resolution of per-field configuration callbacks.
//!
//! An option is either a callable, a reference to a helper exported by a
//! schema module, or a deferred thunk that produces the callable when the
//! field is resolved. Unqualified references are qualified against the
//! schema module that declared the field. Anything that fails to resolve
//! means "no override" and the engine falls back to its default.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::authz::context::{RequestHandle, ResolutionContext};
use crate::authz::query::ResourceQuery;
use crate::authz::types::{FieldError, FieldResponse, Loaded, Subject};

pub type BaseQueryFn = dyn Fn(&ResolutionContext) -> miette::Result<ResourceQuery> + Send + Sync;
pub type FinalizeQueryFn =
    dyn Fn(ResourceQuery, &ResolutionContext) -> miette::Result<ResourceQuery> + Send + Sync;
pub type FetchSubjectFn = dyn Fn(&RequestHandle) -> miette::Result<Option<Subject>> + Send + Sync;
pub type HandlerFn = dyn Fn(&ResolutionContext) -> miette::Result<FieldResponse> + Send + Sync;
pub type LoaderFn = dyn Fn(ResolutionContext) -> BoxFuture<'static, miette::Result<Option<Loaded>>>
    + Send
    + Sync;
pub type WrapFn = dyn Fn(Loaded) -> Result<Loaded, FieldError> + Send + Sync;

type Thunk<F> = dyn Fn() -> miette::Result<Arc<F>> + Send + Sync;

/// A configuration value as declared on the schema.
pub enum Configured<F: ?Sized> {
    Callable(Arc<F>),
    /// `"helper"` (qualified against the declaring module) or `"module::helper"`.
    Reference(String),
    Deferred(Arc<Thunk<F>>),
}

impl<F: ?Sized> Configured<F> {
    pub fn reference(name: impl Into<String>) -> Self {
        Configured::Reference(name.into())
    }

    pub fn deferred(thunk: impl Fn() -> miette::Result<Arc<F>> + Send + Sync + 'static) -> Self {
        Configured::Deferred(Arc::new(thunk))
    }
}

impl<F: ?Sized> Clone for Configured<F> {
    fn clone(&self) -> Self {
        match self {
            Configured::Callable(f) => Configured::Callable(f.clone()),
            Configured::Reference(name) => Configured::Reference(name.clone()),
            Configured::Deferred(thunk) => Configured::Deferred(thunk.clone()),
        }
    }
}

impl<F: ?Sized> std::fmt::Debug for Configured<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Configured::Callable(_) => f.write_str("Callable(..)"),
            Configured::Reference(name) => f.debug_tuple("Reference").field(name).finish(),
            Configured::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

impl<F: ?Sized> From<Arc<F>> for Configured<F> {
    fn from(value: Arc<F>) -> Self {
        Configured::Callable(value)
    }
}

impl<F: ?Sized> From<&str> for Configured<F> {
    fn from(value: &str) -> Self {
        Configured::Reference(value.to_owned())
    }
}

impl<F: ?Sized> From<String> for Configured<F> {
    fn from(value: String) -> Self {
        Configured::Reference(value)
    }
}

// ---------- callback constructors ----------

pub fn base_query(
    f: impl Fn(&ResolutionContext) -> miette::Result<ResourceQuery> + Send + Sync + 'static,
) -> Arc<BaseQueryFn> {
    Arc::new(f)
}

pub fn finalize_query(
    f: impl Fn(ResourceQuery, &ResolutionContext) -> miette::Result<ResourceQuery>
        + Send
        + Sync
        + 'static,
) -> Arc<FinalizeQueryFn> {
    Arc::new(f)
}

pub fn fetch_subject(
    f: impl Fn(&RequestHandle) -> miette::Result<Option<Subject>> + Send + Sync + 'static,
) -> Arc<FetchSubjectFn> {
    Arc::new(f)
}

pub fn handler(
    f: impl Fn(&ResolutionContext) -> miette::Result<FieldResponse> + Send + Sync + 'static,
) -> Arc<HandlerFn> {
    Arc::new(f)
}

pub fn loader<Fut>(f: impl Fn(ResolutionContext) -> Fut + Send + Sync + 'static) -> Arc<LoaderFn>
where
    Fut: Future<Output = miette::Result<Option<Loaded>>> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

pub fn wrap(
    f: impl Fn(Loaded) -> Result<Loaded, FieldError> + Send + Sync + 'static,
) -> Arc<WrapFn> {
    Arc::new(f)
}

// ---------- schema modules ----------

#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("reference `{0}` is unqualified and the field has no declaring module")]
    Unqualified(String),
    #[error("unknown schema module `{0}`")]
    UnknownModule(String),
    #[error("`{0}` is not defined")]
    UnknownHelper(String),
    #[error("`{0}` is private to its module")]
    PrivateHelper(String),
    #[error("`{0}` does not have the signature this option expects")]
    SignatureMismatch(String),
}

struct Helper {
    value: Arc<dyn Any + Send + Sync>,
    public: bool,
}

/// Named helpers defined alongside a group of schema fields.
pub struct SchemaModule {
    name: String,
    helpers: HashMap<String, Helper>,
}

impl SchemaModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            helpers: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Export a helper that field configuration may reference.
    pub fn helper<F: ?Sized + Send + Sync + 'static>(self, name: &str, f: Arc<F>) -> Self {
        self.insert(name, f, true)
    }

    /// Define a helper that is not visible to configuration references.
    pub fn private_helper<F: ?Sized + Send + Sync + 'static>(self, name: &str, f: Arc<F>) -> Self {
        self.insert(name, f, false)
    }

    fn insert<F: ?Sized + Send + Sync + 'static>(mut self, name: &str, f: Arc<F>, public: bool) -> Self {
        self.helpers.insert(
            name.to_owned(),
            Helper {
                value: Arc::new(f),
                public,
            },
        );
        self
    }
}

#[derive(Default)]
pub struct SchemaModules {
    modules: HashMap<String, SchemaModule>,
}

impl SchemaModules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, module: SchemaModule) -> Self {
        self.modules.insert(module.name.clone(), module);
        self
    }

    /// Look up a fully qualified `module::helper` reference.
    pub fn lookup<F: ?Sized + Send + Sync + 'static>(
        &self,
        qualified: &str,
    ) -> Result<Arc<F>, ReferenceError> {
        let (module, helper) = qualified
            .rsplit_once("::")
            .ok_or_else(|| ReferenceError::Unqualified(qualified.to_owned()))?;
        let module = self
            .modules
            .get(module)
            .ok_or_else(|| ReferenceError::UnknownModule(module.to_owned()))?;
        let entry = module
            .helpers
            .get(helper)
            .ok_or_else(|| ReferenceError::UnknownHelper(qualified.to_owned()))?;
        if !entry.public {
            return Err(ReferenceError::PrivateHelper(qualified.to_owned()));
        }
        entry
            .value
            .downcast_ref::<Arc<F>>()
            .cloned()
            .ok_or_else(|| ReferenceError::SignatureMismatch(qualified.to_owned()))
    }
}

/// Rewrite an unqualified reference to point at the declaring module.
pub fn qualify(reference: &str, declared_in: Option<&str>) -> Result<String, ReferenceError> {
    if reference.contains("::") {
        return Ok(reference.to_owned());
    }
    match declared_in {
        Some(module) => Ok(format!("{module}::{reference}")),
        None => Err(ReferenceError::Unqualified(reference.to_owned())),
    }
}

/// Turn a configured option into an invocable callback, or `None` when the
/// option is absent or cannot be resolved.
pub fn resolve_option<F: ?Sized + Send + Sync + 'static>(
    option: &'static str,
    value: Option<&Configured<F>>,
    declared_in: Option<&str>,
    modules: &SchemaModules,
) -> Option<Arc<F>> {
    match value? {
        Configured::Callable(f) => Some(f.clone()),
        Configured::Reference(reference) => {
            match qualify(reference, declared_in).and_then(|q| modules.lookup::<F>(&q)) {
                Ok(f) => Some(f),
                Err(err) => {
                    tracing::warn!(option, error = %err, "Ignoring unresolvable configuration reference");
                    None
                }
            }
        }
        Configured::Deferred(thunk) => match catch_unwind(AssertUnwindSafe(|| thunk())) {
            Ok(Ok(f)) => Some(f),
            Ok(Err(report)) => {
                tracing::warn!(option, error = %report, "Deferred configuration failed");
                None
            }
            Err(_) => {
                tracing::warn!(option, "Deferred configuration panicked");
                None
            }
        },
    }
}
