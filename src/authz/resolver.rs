//! The authorization-rule evaluator the engine consumes, and a generic
//! implementation over a [`Policy`] and a [`DataSource`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::authz::context::RequestHandle;
use crate::authz::errors::GuardError;
use crate::authz::query::{DataSource, ResourceQuery, Scope};
use crate::authz::types::{Action, Arity, AuthzModule, Loaded, Outcome, Params, Record, Subject};

/// Finishing step applied to a query after it has been scoped.
pub type Finalize<'a> = &'a (dyn Fn(ResourceQuery) -> ResourceQuery + Send + Sync);

/// Inputs to a combined load-and-check.
pub struct QueryBundle<'a> {
    pub params: &'a Params,
    pub request: &'a RequestHandle,
    pub base_query: ResourceQuery,
    pub finalize: Finalize<'a>,
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Load and authorize in one step, telling a missing record apart from
    /// one the subject may not see.
    async fn resolve(
        &self,
        subject: &Subject,
        module: &AuthzModule,
        action: &Action,
        bundle: QueryBundle<'_>,
        arity: Arity,
    ) -> Result<Outcome<Loaded>, GuardError>;

    /// Per-record check.
    fn authorized(&self, subject: &Subject, module: &AuthzModule, record: &Record, action: &Action) -> bool;

    /// Restrict a query to what the subject may see.
    fn scope(&self, subject: &Subject, module: &AuthzModule, action: &Action, query: &ResourceQuery) -> Scope;
}

/// Permission rules for a set of resources.
pub trait Policy: Send + Sync {
    fn permits(&self, subject: &Subject, module: &AuthzModule, action: &Action, record: &Record) -> bool;

    /// Query-level form of [`Policy::permits`]. Without one, every row is
    /// fetched and filtered record by record.
    fn scope(
        &self,
        _subject: &Subject,
        _module: &AuthzModule,
        _action: &Action,
        _query: &ResourceQuery,
    ) -> Scope {
        Scope::all()
    }
}

pub struct ScopedAuthorizer<P> {
    policy: P,
    data: Arc<dyn DataSource>,
}

impl<P: Policy> ScopedAuthorizer<P> {
    pub fn new(policy: P, data: Arc<dyn DataSource>) -> Self {
        Self { policy, data }
    }
}

#[async_trait]
impl<P: Policy> Authorizer for ScopedAuthorizer<P> {
    async fn resolve(
        &self,
        subject: &Subject,
        module: &AuthzModule,
        action: &Action,
        bundle: QueryBundle<'_>,
        arity: Arity,
    ) -> Result<Outcome<Loaded>, GuardError> {
        let QueryBundle {
            base_query,
            finalize,
            ..
        } = bundle;

        let scope = self.policy.scope(subject, module, action, &base_query);
        let scoped = finalize(scope.apply(base_query.clone()));
        let visible: Vec<Record> = self
            .data
            .fetch_all(&scoped)
            .await?
            .into_iter()
            .filter(|record| self.policy.permits(subject, module, action, record))
            .collect();

        match arity {
            Arity::Many => Ok(Outcome::Authorized(Loaded::Many(visible))),
            Arity::One => {
                if let Some(record) = visible.into_iter().next() {
                    return Ok(Outcome::Authorized(Loaded::One(record)));
                }
                // Nothing visible: re-run unscoped to tell absent from forbidden.
                let exists = !self.data.fetch_all(&finalize(base_query)).await?.is_empty();
                Ok(if exists {
                    Outcome::Unauthorized
                } else {
                    Outcome::NotFound
                })
            }
        }
    }

    fn authorized(&self, subject: &Subject, module: &AuthzModule, record: &Record, action: &Action) -> bool {
        self.policy.permits(subject, module, action, record)
    }

    fn scope(&self, subject: &Subject, module: &AuthzModule, action: &Action, query: &ResourceQuery) -> Scope {
        self.policy.scope(subject, module, action, query)
    }
}
