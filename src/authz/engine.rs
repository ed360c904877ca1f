//! The load-and-authorize pipeline for a single field invocation.

use std::sync::Arc;

use crate::authz::batch::{AuthorizedBatchSource, LoaderRegistry, RecordKey, SourceKey};
use crate::authz::config::{LoaderFn, SchemaModules};
use crate::authz::context::{FieldConfig, RequestHandle, ResolutionContext};
use crate::authz::errors::GuardError;
use crate::authz::fault;
use crate::authz::metadata::{BatchKey, OperationKind, SchemaMetadata};
use crate::authz::query::{DataSource, ResourceQuery};
use crate::authz::resolver::{Authorizer, QueryBundle};
use crate::authz::types::{
    Action, Arity, FieldError, FieldResponse, Loaded, Outcome, Params, Record, Subject,
};
use crate::settings::{EngineSettings, LoaderSettings};

/// An outcome together with the context it was decided in.
#[derive(Debug)]
pub struct Resolution {
    pub context: ResolutionContext,
    pub outcome: Outcome<Loaded>,
}

pub struct Engine {
    metadata: Arc<SchemaMetadata>,
    modules: Arc<SchemaModules>,
    authorizer: Arc<dyn Authorizer>,
    data: Arc<dyn DataSource>,
    settings: EngineSettings,
    loader_settings: LoaderSettings,
}

impl Engine {
    pub fn new(
        metadata: SchemaMetadata,
        authorizer: Arc<dyn Authorizer>,
        data: Arc<dyn DataSource>,
    ) -> Self {
        Self {
            metadata: Arc::new(metadata),
            modules: Arc::new(SchemaModules::new()),
            authorizer,
            data,
            settings: EngineSettings::default(),
            loader_settings: LoaderSettings::default(),
        }
    }

    pub fn with_modules(mut self, modules: SchemaModules) -> Self {
        self.modules = Arc::new(modules);
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_loader_settings(mut self, settings: LoaderSettings) -> Self {
        self.loader_settings = settings;
        self
    }

    /// Build the resolution context for a field, without a subject yet.
    ///
    /// Fails only on configuration errors: a return type without a resource
    /// or module, or a mutation without an action.
    pub fn context(&self, params: Params, request: RequestHandle) -> Result<ResolutionContext, GuardError> {
        let field = request.field();
        let found = self.metadata.lookup(field);

        let type_level = found.type_level.ok_or_else(|| GuardError::MissingResource {
            type_name: field.type_name().to_owned(),
        })?;
        let module = type_level
            .module
            .clone()
            .ok_or_else(|| GuardError::MissingModule {
                type_name: field.type_name().to_owned(),
            })?;

        let action = match (found.field_level.and_then(|f| f.action.clone()), field.operation) {
            (Some(action), _) => action,
            (None, OperationKind::Mutation) => {
                return Err(GuardError::MissingAction {
                    parent_type: field.parent_type.clone(),
                    field: field.name.clone(),
                })
            }
            (None, _) => Action::new(self.settings.default_query_action.clone()),
        };

        let config = FieldConfig::resolve(found.field_level, &type_level.resource, &self.modules);

        Ok(ResolutionContext {
            subject: None,
            resource: type_level.resource.clone(),
            module,
            action,
            params,
            config: Arc::new(config),
            request,
        })
    }

    fn fetch_subject(&self, ctx: &ResolutionContext) -> Option<Subject> {
        match &ctx.config.fetch_subject {
            Some(fetch) => fault::guard("fetch_subject", || fetch(&ctx.request)).flatten(),
            None => ctx.request.subject().cloned(),
        }
    }

    /// Run the decision pipeline and return the raw outcome. `arity_hint`
    /// overrides the arity derived from the field's return type.
    pub async fn load(
        &self,
        params: Params,
        request: RequestHandle,
        arity_hint: Option<Arity>,
    ) -> Result<Resolution, GuardError> {
        let ctx = self.context(params, request)?;
        let subject = self.fetch_subject(&ctx);
        let ctx = ctx.with_subject(subject);
        let outcome = self.decide(&ctx, arity_hint).await;

        tracing::debug!(
            field = %ctx.request.field().path(),
            resource = ctx.resource.name(),
            action = %ctx.action,
            outcome = outcome.kind(),
            "Resolved field"
        );
        Ok(Resolution {
            context: ctx,
            outcome,
        })
    }

    async fn decide(&self, ctx: &ResolutionContext, arity_hint: Option<Arity>) -> Outcome<Loaded> {
        let Some(subject) = ctx.subject.as_ref() else {
            return Outcome::Unauthorized;
        };

        if self.settings.is_create(ctx.action.as_str()) {
            let placeholder = ctx.resource.placeholder();
            return if self
                .authorizer
                .authorized(subject, &ctx.module, &placeholder, &ctx.action)
            {
                Outcome::Authorized(Loaded::Nothing)
            } else {
                Outcome::Unauthorized
            };
        }

        let arity = arity_hint.unwrap_or_else(|| ctx.request.field().arity());

        if let Some(loader) = &ctx.config.loader {
            return self.custom_load(loader, ctx, subject, arity).await;
        }

        let finalize = |query: ResourceQuery| self.finalize_query(ctx, query);
        let bundle = QueryBundle {
            params: &ctx.params,
            request: &ctx.request,
            base_query: self.base_query(ctx),
            finalize: &finalize,
        };
        match self
            .authorizer
            .resolve(subject, &ctx.module, &ctx.action, bundle, arity)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(
                    field = %ctx.request.field().path(),
                    error = %err,
                    "Load failed, reporting not found"
                );
                Outcome::NotFound
            }
        }
    }

    async fn custom_load(
        &self,
        loader: &Arc<LoaderFn>,
        ctx: &ResolutionContext,
        subject: &Subject,
        arity: Arity,
    ) -> Outcome<Loaded> {
        let loaded = match fault::guard_async("loader", || loader(ctx.clone())).await {
            Some(Some(loaded)) if loaded != Loaded::Nothing => loaded,
            _ => return Outcome::NotFound,
        };
        let permitted =
            |record: &Record| self.authorizer.authorized(subject, &ctx.module, record, &ctx.action);

        match arity {
            Arity::Many => {
                let records = loaded.into_many().into_iter().filter(|r| permitted(r)).collect();
                Outcome::Authorized(Loaded::Many(records))
            }
            Arity::One => match loaded.into_one() {
                None => Outcome::NotFound,
                Some(record) if permitted(&record) => Outcome::Authorized(Loaded::One(record)),
                Some(_) => Outcome::Unauthorized,
            },
        }
    }

    /// `SELECT * FROM resource`, filtered by id when the id argument is
    /// present, unless the field overrides it.
    fn base_query(&self, ctx: &ResolutionContext) -> ResourceQuery {
        if let Some(build) = &ctx.config.base_query {
            if let Some(query) = fault::guard("base_query", || build(ctx)) {
                return query;
            }
        }
        let query = ResourceQuery::from(&ctx.resource);
        match ctx.id() {
            Some(id) => query.filter_by(&ctx.config.id_field, id),
            None => query,
        }
    }

    fn finalize_query(&self, ctx: &ResolutionContext, query: ResourceQuery) -> ResourceQuery {
        match &ctx.config.finalize_query {
            Some(finalize) => {
                let fallback = query.clone();
                fault::guard("finalize_query", || finalize(query, ctx)).unwrap_or(fallback)
            }
            None => query,
        }
    }

    /// Map an outcome to the final field response.
    pub fn respond(&self, resolution: Resolution) -> FieldResponse {
        let Resolution { context, outcome } = resolution;
        match outcome {
            Outcome::Authorized(value) => self.wrap(&context, value),
            Outcome::Unauthorized => self.unauthorized(&context),
            Outcome::NotFound => self.not_found(&context),
        }
    }

    pub fn unauthorized(&self, ctx: &ResolutionContext) -> FieldResponse {
        if let Some(handle) = &ctx.config.handle_unauthorized {
            if let Some(response) = fault::guard("handle_unauthorized", || handle(ctx)) {
                return response;
            }
        }
        let message = ctx
            .config
            .unauthorized_message
            .as_deref()
            .unwrap_or(self.settings.unauthorized_message.as_str());
        Err(FieldError::unauthorized(message))
    }

    pub fn not_found(&self, ctx: &ResolutionContext) -> FieldResponse {
        if let Some(handle) = &ctx.config.handle_not_found {
            if let Some(response) = fault::guard("handle_not_found", || handle(ctx)) {
                return response;
            }
        }
        Err(FieldError::not_found(self.settings.not_found_message.as_str()))
    }

    fn wrap(&self, ctx: &ResolutionContext, value: Loaded) -> FieldResponse {
        let Some(wrap) = &ctx.config.wrap_authorized else {
            return Ok(value);
        };
        match fault::catch("wrap_authorized", || wrap(value)) {
            None => Err(FieldError::new("wrap function raised")),
            Some(Err(err)) => Err(err),
            Some(Ok(wrapped)) => {
                let shape_matches = !matches!(
                    (ctx.request.field().arity(), &wrapped),
                    (Arity::One, Loaded::Many(_)) | (Arity::Many, Loaded::One(_))
                );
                if shape_matches {
                    Ok(wrapped)
                } else {
                    Err(FieldError::new("wrap function returned an invalid result"))
                }
            }
        }
    }

    /// Resolver entry point: load, authorize and respond.
    pub async fn resolve(&self, params: Params, request: RequestHandle) -> Result<FieldResponse, GuardError> {
        let resolution = self.load(params, request, None).await?;
        Ok(self.respond(resolution))
    }

    /// Resolve an association field through the request's batch sources.
    pub async fn resolve_batched(
        &self,
        params: Params,
        request: RequestHandle,
    ) -> Result<FieldResponse, GuardError> {
        let ctx = self.context(params, request)?;
        let batch_key = ctx
            .config
            .batch_key
            .clone()
            .ok_or_else(|| GuardError::MissingBatchKey {
                field: ctx.request.field().path(),
            })?;
        let registry = ctx
            .request
            .loaders()
            .cloned()
            .ok_or(GuardError::MissingLoaderRegistry)?;

        let subject = self.fetch_subject(&ctx);
        let ctx = ctx.with_subject(subject);
        let outcome = self.batched_outcome(&ctx, &batch_key, &registry).await;

        tracing::debug!(
            field = %ctx.request.field().path(),
            resource = ctx.resource.name(),
            action = %ctx.action,
            outcome = outcome.kind(),
            "Resolved batched field"
        );
        Ok(self.respond(Resolution {
            context: ctx,
            outcome,
        }))
    }

    async fn batched_outcome(
        &self,
        ctx: &ResolutionContext,
        batch_key: &BatchKey,
        registry: &LoaderRegistry,
    ) -> Outcome<Loaded> {
        let Some(subject) = ctx.subject.as_ref() else {
            return Outcome::Unauthorized;
        };
        let arity = ctx.request.field().arity();

        let parent_key = ctx
            .request
            .parent()
            .and_then(|parent| parent.get(&batch_key.parent_field))
            .and_then(RecordKey::from_json);
        let Some(parent_key) = parent_key else {
            return match arity {
                Arity::Many => Outcome::Authorized(Loaded::Many(Vec::new())),
                Arity::One => Outcome::NotFound,
            };
        };

        let key = SourceKey::new(ctx.module.clone(), ctx.request.field().path(), ctx.action.clone());
        let (key, loader) = registry.source_for(key, &self.loader_settings, |key| {
            AuthorizedBatchSource::new(
                key.clone(),
                ctx.resource.clone(),
                batch_key.key_field.clone(),
                subject.clone(),
                self.authorizer.clone(),
                self.data.clone(),
                self.loader_settings.timeout(),
            )
        });

        match loader.load_one(parent_key).await {
            Ok(rows) => {
                let rows = rows.unwrap_or_default();
                match arity {
                    Arity::Many => Outcome::Authorized(Loaded::Many(rows)),
                    Arity::One => match rows.into_iter().next() {
                        Some(record) => Outcome::Authorized(Loaded::One(record)),
                        None => Outcome::NotFound,
                    },
                }
            }
            Err(err) => {
                tracing::warn!(
                    source = %key,
                    error = %err,
                    "Batch load failed, reporting not found"
                );
                Outcome::NotFound
            }
        }
    }
}
