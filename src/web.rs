use std::net::SocketAddr;
use std::sync::Arc;

use async_graphql::dynamic::Schema;
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::{
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use miette::IntoDiagnostic;

use crate::authz::{LoaderRegistry, Subject};
use crate::settings::Settings;

pub const SUBJECT_HEADER: &str = "x-subject";
pub const ROLES_HEADER: &str = "x-roles";

#[derive(Clone)]
pub struct AppState {
    pub schema: Schema,
}

/// The acting subject, from `x-subject` and comma-separated `x-roles`.
/// Requests without a subject run anonymously.
pub fn subject_from_headers(headers: &HeaderMap) -> Option<Subject> {
    let id = headers.get(SUBJECT_HEADER)?.to_str().ok()?.trim();
    if id.is_empty() {
        return None;
    }
    let roles = headers
        .get(ROLES_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    Some(
        roles
            .split(',')
            .map(str::trim)
            .filter(|role| !role.is_empty())
            .fold(Subject::new(id), Subject::with_role),
    )
}

/// Each request gets its own loader registry, so batch sources never
/// outlive the request that created them.
async fn graphql_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    req: GraphQLRequest,
) -> GraphQLResponse {
    let registry = Arc::new(LoaderRegistry::new());
    let mut request = req.into_inner().data(registry.clone());
    if let Some(subject) = subject_from_headers(&headers) {
        tracing::debug!(subject = %subject.id, "Executing request");
        request = request.data(subject);
    }
    let response = state.schema.execute(request).await;
    if !registry.is_empty() {
        tracing::debug!(sources = registry.len(), "Request used batch sources");
    }
    response.into()
}

async fn playground() -> impl IntoResponse {
    axum::response::Html(
        async_graphql::http::GraphiQLSource::build()
            .endpoint("/graphql")
            .finish(),
    )
}

pub fn router(schema: Schema) -> Router {
    let state = Arc::new(AppState { schema });
    Router::new()
        .route("/graphql", post(graphql_handler))
        .route("/playground", get(playground))
        .with_state(state)
}

pub async fn serve(settings: &Settings, schema: Schema) -> miette::Result<()> {
    let addr: SocketAddr = settings
        .bind_address()
        .parse()
        .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    tracing::info!(%addr, "GraphQL API listening");
    tracing::info!("GraphQL Playground available at http://{}/playground", addr);

    axum::serve(listener, router(schema)).await.into_diagnostic()?;
    Ok(())
}
