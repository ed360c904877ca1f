//! Query building and execution against the data-access layer.

use async_trait::async_trait;
use sea_orm::sea_query::{
    Alias, Asterisk, Condition, Expr, IntoCondition, Order, Query, SelectStatement, SimpleExpr,
    SqliteQueryBuilder, Value as SqlValue,
};
use sea_orm::{ConnectionTrait, DatabaseConnection, FromQueryResult, JsonValue};
use serde_json::Value;

use crate::authz::errors::GuardError;
use crate::authz::types::{Record, ResourceDescriptor};

/// A `SELECT *` over one resource, refined by filters.
#[derive(Debug, Clone)]
pub struct ResourceQuery {
    statement: SelectStatement,
}

impl ResourceQuery {
    pub fn from(resource: &ResourceDescriptor) -> Self {
        let statement = Query::select()
            .column(Asterisk)
            .from(Alias::new(resource.name()))
            .to_owned();
        Self { statement }
    }

    /// `WHERE field = value`; a JSON value with no SQL scalar form matches
    /// only NULL.
    pub fn filter_by(self, field: &str, value: &Value) -> Self {
        let condition = match sql_value(value) {
            Some(v) => column(field).eq(v),
            None => column(field).is_null(),
        };
        self.filter(condition)
    }

    pub fn filter_in(self, field: &str, values: impl IntoIterator<Item = SqlValue>) -> Self {
        let condition = column(field).is_in(values);
        self.filter(condition)
    }

    pub fn filter(mut self, condition: impl IntoCondition) -> Self {
        self.statement.cond_where(condition);
        self
    }

    pub fn order_by(mut self, field: &str, order: Order) -> Self {
        self.statement.order_by(Alias::new(field), order);
        self
    }

    pub fn statement(&self) -> &SelectStatement {
        &self.statement
    }

    /// Render for logs and tests, with values inlined.
    pub fn to_sql(&self) -> String {
        self.statement.to_string(SqliteQueryBuilder)
    }
}

/// Column reference for building conditions.
pub fn column(name: &str) -> Expr {
    Expr::col(Alias::new(name))
}

/// Convert a JSON scalar to a SQL value.
pub fn sql_value(value: &Value) -> Option<SqlValue> {
    match value {
        Value::Bool(b) => Some((*b).into()),
        Value::Number(n) => n
            .as_i64()
            .map(SqlValue::from)
            .or_else(|| n.as_f64().map(SqlValue::from)),
        Value::String(s) => Some(s.clone().into()),
        _ => None,
    }
}

/// What a policy returns when asked to scope a query: either the query
/// rewritten, or a bare condition to be added as a filter.
#[derive(Debug, Clone)]
pub enum Scope {
    Query(ResourceQuery),
    Filter(Condition),
}

impl Scope {
    pub fn all() -> Self {
        Scope::Filter(Condition::all())
    }

    pub fn filter(expr: SimpleExpr) -> Self {
        Scope::Filter(Condition::all().add(expr))
    }

    pub fn apply(self, query: ResourceQuery) -> ResourceQuery {
        match self {
            Scope::Query(scoped) => scoped,
            Scope::Filter(condition) => query.filter(condition),
        }
    }
}

/// The data-access capability the engine and batch sources read through.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch_all(&self, query: &ResourceQuery) -> Result<Vec<Record>, GuardError>;
}

#[async_trait]
impl DataSource for DatabaseConnection {
    async fn fetch_all(&self, query: &ResourceQuery) -> Result<Vec<Record>, GuardError> {
        let statement = self.get_database_backend().build(query.statement());
        tracing::trace!(sql = %statement.sql, "Executing resource query");
        let rows = JsonValue::find_by_statement(statement).all(self).await?;
        Ok(rows)
    }
}
