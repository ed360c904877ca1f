//! Request-scoped batch sources for association fields.
//!
//! Each distinct (module, field, action) gets its own source so that rows
//! fetched under one authorization scope are never served to a field with
//! another.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_graphql::dataloader::{DataLoader, HashMapCache, Loader};
use sea_orm::sea_query::Value as SqlValue;
use serde_json::Value;

use crate::authz::errors::GuardError;
use crate::authz::query::{DataSource, ResourceQuery};
use crate::authz::resolver::Authorizer;
use crate::authz::types::{Action, AuthzModule, Record, ResourceDescriptor, Subject};
use crate::settings::LoaderSettings;

/// Full identity of a batch source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey {
    pub module: AuthzModule,
    pub field: String,
    pub action: Action,
}

impl SourceKey {
    pub fn new(module: AuthzModule, field: impl Into<String>, action: Action) -> Self {
        Self {
            module,
            field: field.into(),
            action,
        }
    }

    pub fn field_key(&self) -> FieldKey {
        FieldKey {
            module: self.module.clone(),
            field: self.field.clone(),
        }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.module, self.field, self.action)
    }
}

/// Action-free lookup key for "the source this field last used".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldKey {
    pub module: AuthzModule,
    pub field: String,
}

/// Association key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Int(i64),
    Text(String),
}

impl RecordKey {
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RecordKey::Int),
            Value::String(s) => Some(RecordKey::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_sql(&self) -> SqlValue {
        match self {
            RecordKey::Int(i) => SqlValue::from(*i),
            RecordKey::Text(s) => SqlValue::from(s.clone()),
        }
    }
}

/// Fetches child rows for a batch of parent keys, restricted to what the
/// request's subject may see under one action.
pub struct AuthorizedBatchSource {
    source_key: SourceKey,
    resource: ResourceDescriptor,
    key_field: String,
    subject: Subject,
    authorizer: Arc<dyn Authorizer>,
    data: Arc<dyn DataSource>,
    timeout: Duration,
}

impl AuthorizedBatchSource {
    pub fn new(
        source_key: SourceKey,
        resource: ResourceDescriptor,
        key_field: impl Into<String>,
        subject: Subject,
        authorizer: Arc<dyn Authorizer>,
        data: Arc<dyn DataSource>,
        timeout: Duration,
    ) -> Self {
        Self {
            source_key,
            resource,
            key_field: key_field.into(),
            subject,
            authorizer,
            data,
            timeout,
        }
    }

    fn query(&self, keys: &[RecordKey]) -> ResourceQuery {
        let query = ResourceQuery::from(&self.resource)
            .filter_in(&self.key_field, keys.iter().map(RecordKey::to_sql));
        self.authorizer
            .scope(&self.subject, &self.source_key.module, &self.source_key.action, &query)
            .apply(query)
    }
}

impl Loader<RecordKey> for AuthorizedBatchSource {
    type Value = Vec<Record>;
    type Error = Arc<GuardError>;

    async fn load(&self, keys: &[RecordKey]) -> Result<HashMap<RecordKey, Self::Value>, Self::Error> {
        let query = self.query(keys);
        tracing::debug!(
            source = %self.source_key,
            keys = keys.len(),
            "Loading batch"
        );
        let rows = tokio::time::timeout(self.timeout, self.data.fetch_all(&query))
            .await
            .map_err(|_| {
                Arc::new(GuardError::LoadTimeout {
                    source_key: self.source_key.clone(),
                    millis: self.timeout.as_millis() as u64,
                })
            })?
            .map_err(Arc::new)?;

        let mut grouped: HashMap<RecordKey, Vec<Record>> = HashMap::new();
        for row in rows {
            if !self.authorizer.authorized(
                &self.subject,
                &self.source_key.module,
                &row,
                &self.source_key.action,
            ) {
                continue;
            }
            if let Some(key) = row.get(&self.key_field).and_then(RecordKey::from_json) {
                grouped.entry(key).or_default().push(row);
            }
        }
        Ok(grouped)
    }
}

pub type BatchLoader = DataLoader<AuthorizedBatchSource, HashMapCache>;

#[derive(Default)]
struct RegistryState {
    sources: HashMap<SourceKey, Arc<BatchLoader>>,
    latest: HashMap<FieldKey, SourceKey>,
}

/// Batch sources for one request. Dropped with the request.
#[derive(Default)]
pub struct LoaderRegistry {
    state: Mutex<RegistryState>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the key and the source registered under it, building the
    /// source on first use. The check and the insert happen under one lock,
    /// so concurrent siblings converge on a single source.
    pub fn source_for(
        &self,
        key: SourceKey,
        settings: &LoaderSettings,
        build: impl FnOnce(&SourceKey) -> AuthorizedBatchSource,
    ) -> (SourceKey, Arc<BatchLoader>) {
        let mut state = self.state();
        state.latest.insert(key.field_key(), key.clone());
        if let Some(existing) = state.sources.get(&key) {
            let existing = existing.clone();
            return (key, existing);
        }

        tracing::info!(source = %key, "Creating batch source");
        let loader = Arc::new(
            DataLoader::with_cache(build(&key), tokio::spawn, HashMapCache::default())
                .delay(settings.delay())
                .max_batch_size(settings.max_batch_size),
        );
        state.sources.insert(key.clone(), loader.clone());
        (key, loader)
    }

    /// The full key most recently used by a field.
    pub fn latest(&self, field: &FieldKey) -> Option<SourceKey> {
        self.state().latest.get(field).cloned()
    }

    pub fn len(&self) -> usize {
        self.state().sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::query::{column, Scope};
    use crate::authz::resolver::QueryBundle;
    use crate::authz::types::{Arity, Loaded, Outcome};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Barrier;

    struct Tasks {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DataSource for Tasks {
        async fn fetch_all(&self, query: &ResourceQuery) -> Result<Vec<Record>, GuardError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let sql = query.to_sql();
            let rows = vec![
                json!({"id": 1, "project_id": 1, "owner": "alice"}),
                json!({"id": 2, "project_id": 1, "owner": "bob"}),
                json!({"id": 3, "project_id": 2, "owner": "alice"}),
            ];
            Ok(rows
                .into_iter()
                .filter(|r| !sql.contains("\"owner\" = 'alice'") || r["owner"] == "alice")
                .collect())
        }
    }

    /// Reads see everything, updates only the subject's own rows.
    struct UpdateOwnOnly;

    #[async_trait]
    impl Authorizer for UpdateOwnOnly {
        async fn resolve(
            &self,
            _: &Subject,
            _: &AuthzModule,
            _: &Action,
            _: QueryBundle<'_>,
            _: Arity,
        ) -> Result<Outcome<Loaded>, GuardError> {
            Ok(Outcome::NotFound)
        }

        fn authorized(&self, subject: &Subject, _: &AuthzModule, record: &Record, action: &Action) -> bool {
            *action == Action::READ || record["owner"] == json!(subject.id)
        }

        fn scope(&self, subject: &Subject, _: &AuthzModule, action: &Action, _: &ResourceQuery) -> Scope {
            if *action == Action::READ {
                Scope::all()
            } else {
                Scope::filter(column("owner").eq(subject.id.clone()))
            }
        }
    }

    fn source(key: &SourceKey, data: Arc<Tasks>) -> AuthorizedBatchSource {
        AuthorizedBatchSource::new(
            key.clone(),
            ResourceDescriptor::new("tasks", "id"),
            "project_id",
            Subject::new("alice"),
            Arc::new(UpdateOwnOnly),
            data,
            Duration::from_secs(5),
        )
    }

    fn key(field: &str, action: Action) -> SourceKey {
        SourceKey::new(AuthzModule::from("tasks"), field, action)
    }

    #[tokio::test]
    async fn test_same_key_reuses_source() {
        let registry = LoaderRegistry::new();
        let data = Arc::new(Tasks {
            calls: AtomicUsize::new(0),
        });
        let settings = LoaderSettings::default();
        let k = key("Project.tasks", Action::READ);

        let (first_key, first) = registry.source_for(k.clone(), &settings, |key| source(key, data.clone()));
        let (second_key, second) = registry.source_for(k.clone(), &settings, |_| panic!("must not rebuild"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first_key, k);
        assert_eq!(second_key, k);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_sibling_actions_get_separate_sources() {
        let registry = LoaderRegistry::new();
        let data = Arc::new(Tasks {
            calls: AtomicUsize::new(0),
        });
        let settings = LoaderSettings::default();
        let read = key("Project.tasks", Action::READ);
        let update = key("Project.tasks", Action::UPDATE);
        assert_ne!(read, update);

        let (_, readable) = registry.source_for(read.clone(), &settings, |key| source(key, data.clone()));
        let (_, editable) = registry.source_for(update.clone(), &settings, |key| source(key, data.clone()));
        assert!(!Arc::ptr_eq(&readable, &editable));
        assert_eq!(registry.len(), 2);
        // The field key points at whichever action ran last.
        assert_eq!(registry.latest(&read.field_key()), Some(update.clone()));

        let all = readable.load_one(RecordKey::Int(1)).await.unwrap().unwrap();
        let own = editable.load_one(RecordKey::Int(1)).await.unwrap().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(own.len(), 1);
        assert_eq!(own[0]["owner"], "alice");
    }

    #[tokio::test]
    async fn test_keys_are_batched_and_cached() {
        let registry = LoaderRegistry::new();
        let data = Arc::new(Tasks {
            calls: AtomicUsize::new(0),
        });
        let k = key("Project.tasks", Action::READ);
        let (_, loader) = registry.source_for(k, &LoaderSettings::default(), |key| source(key, data.clone()));

        let (one, two) = tokio::join!(
            loader.load_one(RecordKey::Int(1)),
            loader.load_one(RecordKey::Int(2))
        );
        assert_eq!(one.unwrap().unwrap().len(), 2);
        assert_eq!(two.unwrap().unwrap().len(), 1);
        assert_eq!(data.calls.load(Ordering::SeqCst), 1);

        loader.load_one(RecordKey::Int(1)).await.unwrap();
        assert_eq!(data.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_siblings_converge_on_one_source() {
        const SIBLINGS: usize = 32;
        let registry = Arc::new(LoaderRegistry::new());
        let data = Arc::new(Tasks {
            calls: AtomicUsize::new(0),
        });
        let built = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(SIBLINGS));
        let k = key("Project.tasks", Action::READ);

        let handles: Vec<_> = (0..SIBLINGS)
            .map(|_| {
                let registry = registry.clone();
                let data = data.clone();
                let built = built.clone();
                let barrier = barrier.clone();
                let k = k.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    let (_, loader) = registry.source_for(k, &LoaderSettings::default(), |key| {
                        built.fetch_add(1, Ordering::SeqCst);
                        source(key, data)
                    });
                    loader
                })
            })
            .collect();

        let mut loaders = Vec::with_capacity(SIBLINGS);
        for handle in handles {
            loaders.push(handle.await.unwrap());
        }
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
        assert!(loaders.iter().all(|loader| Arc::ptr_eq(loader, &loaders[0])));
    }

    #[test]
    fn test_record_key_from_json() {
        assert_eq!(RecordKey::from_json(&json!(4)), Some(RecordKey::Int(4)));
        assert_eq!(RecordKey::from_json(&json!("a")), Some(RecordKey::Text("a".into())));
        assert_eq!(RecordKey::from_json(&json!(null)), None);
    }
}
