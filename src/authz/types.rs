use std::borrow::Cow;

use sea_orm::{EntityTrait, IdenStatic, Iterable, PrimaryKeyToColumn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A loaded row, as a JSON object keyed by column name.
pub type Record = Value;

/// Raw field arguments.
pub type Params = Map<String, Value>;

/// The acting principal. Opaque to the engine; only policies look inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Subject {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Symbolic operation name, e.g. "read" or "update".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action(Cow<'static, str>);

impl Action {
    pub const READ: Action = Action(Cow::Borrowed("read"));
    pub const CREATE: Action = Action(Cow::Borrowed("create"));
    pub const UPDATE: Action = Action(Cow::Borrowed("update"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for Action {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the policy set that owns a resource type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthzModule(Cow<'static, str>);

impl AuthzModule {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for AuthzModule {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Display for AuthzModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps a GraphQL type onto a concrete table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    name: String,
    primary_key: String,
    columns: Vec<String>,
}

impl ResourceDescriptor {
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            columns: Vec::new(),
        }
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Derive the descriptor from a SeaORM entity: table name, first primary
    /// key column and the full column list.
    pub fn of<E: EntityTrait>() -> Self {
        let primary_key = E::PrimaryKey::iter()
            .next()
            .map(|pk| IdenStatic::as_str(&pk.into_column()).to_owned())
            .unwrap_or_else(|| "id".to_owned());
        Self {
            name: E::default().table_name().to_owned(),
            primary_key,
            columns: E::Column::iter()
                .map(|c| IdenStatic::as_str(&c).to_owned())
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// A blank instance: every known column present and null.
    pub fn placeholder(&self) -> Record {
        let mut object = Map::new();
        object.insert(self.primary_key.clone(), Value::Null);
        for column in &self.columns {
            object.insert(column.clone(), Value::Null);
        }
        Value::Object(object)
    }
}

/// Whether a field resolves to one record or a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    One,
    Many,
}

/// A value produced by a load. `Nothing` is the result of an authorized
/// create, where no record exists yet.
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded {
    Nothing,
    One(Record),
    Many(Vec<Record>),
}

impl Loaded {
    /// Normalise to a list: nothing is empty, a single record a singleton.
    pub fn into_many(self) -> Vec<Record> {
        match self {
            Loaded::Nothing => Vec::new(),
            Loaded::One(record) => vec![record],
            Loaded::Many(records) => records,
        }
    }

    /// Normalise to a single record, taking the first element of a list.
    pub fn into_one(self) -> Option<Record> {
        match self {
            Loaded::Nothing => None,
            Loaded::One(record) => Some(record),
            Loaded::Many(records) => records.into_iter().next(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Loaded::Nothing => Value::Null,
            Loaded::One(record) => record.clone(),
            Loaded::Many(records) => Value::Array(records.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Authorized(T),
    Unauthorized,
    NotFound,
}

impl<T> Outcome<T> {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Outcome::Authorized(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Authorized(_) => "authorized",
            Outcome::Unauthorized => "unauthorized",
            Outcome::NotFound => "not_found",
        }
    }
}

pub const UNAUTHORIZED_CODE: &str = "UNAUTHORIZED";
pub const NOT_FOUND_CODE: &str = "NOT_FOUND";

/// Client-facing failure of a single field.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct FieldError {
    pub message: String,
    pub code: Option<String>,
    pub extensions: Map<String, Value>,
}

impl FieldError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            extensions: Map::new(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(message).with_code(UNAUTHORIZED_CODE)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(message).with_code(NOT_FOUND_CODE)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }
}

/// Final per-field response: `{ok, value}` or `{error, ...}`.
pub type FieldResponse = Result<Loaded, FieldError>;
