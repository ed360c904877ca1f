//! Projects and tasks served through the authorization engine.
//!
//! Admins see and change everything. Everyone else sees their own rows and
//! any published task, may change only their own rows, and needs the
//! editor role to create tasks.

use std::sync::Arc;

use async_graphql::dynamic::{
    Field, FieldFuture, FieldValue, InputValue, Object, ResolverContext, Schema, SchemaError,
    TypeRef,
};
use miette::{IntoDiagnostic, Result};
use sea_orm::sea_query::{Condition, Order};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, PaginatorTrait, Set};
use serde_json::Value;

use crate::authz::config::{finalize_query, SchemaModule, SchemaModules};
use crate::authz::query::column;
use crate::authz::{
    authorize, Action, Arity, AuthzModule, DataSource, Engine, FieldAuthz, FieldInfo, Policy,
    Record, ResolutionState, ResourceDescriptor, ResourceQuery, SchemaMetadata, Scope,
    ScopedAuthorizer, Subject, TypeAuthz,
};
use crate::entities::{project, task};
use crate::graphql::{
    authorized_field, batched_field, configuration_error, field_params, field_value,
    graphql_error, record_field, request_handle,
};
use crate::settings::Settings;

pub const ADMIN_ROLE: &str = "admin";
pub const EDITOR_ROLE: &str = "editor";

pub const PROJECTS: &str = "projects";
pub const TASKS: &str = "tasks";

pub struct OwnershipPolicy;

fn owns(subject: &Subject, record: &Record) -> bool {
    record.get("owner").and_then(Value::as_str) == Some(subject.id.as_str())
}

fn published(record: &Record) -> bool {
    record.get("published").and_then(Value::as_i64) == Some(1)
}

impl Policy for OwnershipPolicy {
    fn permits(&self, subject: &Subject, module: &AuthzModule, action: &Action, record: &Record) -> bool {
        if subject.has_role(ADMIN_ROLE) {
            return true;
        }
        if *action == Action::CREATE {
            return subject.has_role(EDITOR_ROLE);
        }
        owns(subject, record) || (*action == Action::READ && module.as_str() == TASKS && published(record))
    }

    fn scope(&self, subject: &Subject, module: &AuthzModule, action: &Action, _query: &ResourceQuery) -> Scope {
        if subject.has_role(ADMIN_ROLE) {
            return Scope::all();
        }
        let own = column("owner").eq(subject.id.clone());
        if *action == Action::READ && module.as_str() == TASKS {
            Scope::Filter(Condition::any().add(own).add(column("published").eq(1)))
        } else {
            Scope::filter(own)
        }
    }
}

pub fn metadata() -> SchemaMetadata {
    SchemaMetadata::builder()
        .authorize_type(
            "Project",
            TypeAuthz::new(ResourceDescriptor::of::<project::Entity>()).module(PROJECTS),
        )
        .authorize_type(
            "Task",
            TypeAuthz::new(ResourceDescriptor::of::<task::Entity>()).module(TASKS),
        )
        .authorize_field(
            "Query",
            "tasks",
            FieldAuthz::new()
                .finalize_query("newest_first")
                .declared_in(TASKS),
        )
        .authorize_field(
            "Query",
            "task",
            FieldAuthz::new().unauthorized_message("You may not see this task"),
        )
        .authorize_field("Project", "tasks", FieldAuthz::new().batch_key("project_id", "id"))
        .authorize_field(
            "Project",
            "editableTasks",
            FieldAuthz::new()
                .action(Action::UPDATE)
                .batch_key("project_id", "id"),
        )
        .authorize_field("Task", "project", FieldAuthz::new().batch_key("id", "project_id"))
        .authorize_field("Mutation", "createTask", FieldAuthz::new().action(Action::CREATE))
        .authorize_field("Mutation", "updateTask", FieldAuthz::new().action(Action::UPDATE))
        .build()
}

pub fn modules() -> SchemaModules {
    SchemaModules::new().register(SchemaModule::new(TASKS).helper(
        "newest_first",
        finalize_query(|query, _| Ok(query.order_by("id", Order::Desc))),
    ))
}

pub fn engine(db: DatabaseConnection, settings: &Settings) -> Engine {
    let data: Arc<dyn DataSource> = Arc::new(db);
    let authorizer = Arc::new(ScopedAuthorizer::new(OwnershipPolicy, data.clone()));
    Engine::new(metadata(), authorizer, data)
        .with_modules(modules())
        .with_settings(settings.engine.clone())
        .with_loader_settings(settings.loader.clone())
}

fn id_arg() -> InputValue {
    InputValue::new("id", TypeRef::named_nn(TypeRef::INT))
}

/// A key column value; rejected rather than wrapped when it does not fit.
fn key_value(name: &str, value: i64) -> async_graphql::Result<i32> {
    i32::try_from(value).map_err(|_| async_graphql::Error::new(format!("{name} out of range")))
}

fn key_arg(ctx: &ResolverContext<'_>, name: &str) -> async_graphql::Result<i32> {
    key_value(name, ctx.args.try_get(name)?.i64()?)
}

pub fn schema(engine: Arc<Engine>, db: DatabaseConnection) -> std::result::Result<Schema, SchemaError> {
    let project = Object::new("Project")
        .field(record_field("id", TypeRef::named_nn(TypeRef::INT), "id"))
        .field(record_field("name", TypeRef::named_nn(TypeRef::STRING), "name"))
        .field(record_field("owner", TypeRef::named_nn(TypeRef::STRING), "owner"))
        .field(batched_field(
            engine.clone(),
            FieldInfo::new("Project", "tasks", TypeRef::named_nn_list_nn("Task")),
        ))
        .field(batched_field(
            engine.clone(),
            FieldInfo::new("Project", "editableTasks", TypeRef::named_nn_list_nn("Task")),
        ));

    let task = Object::new("Task")
        .field(record_field("id", TypeRef::named_nn(TypeRef::INT), "id"))
        .field(record_field("projectId", TypeRef::named_nn(TypeRef::INT), "project_id"))
        .field(record_field("title", TypeRef::named_nn(TypeRef::STRING), "title"))
        .field(record_field("owner", TypeRef::named_nn(TypeRef::STRING), "owner"))
        .field(record_field("published", TypeRef::named_nn(TypeRef::INT), "published"))
        .field(batched_field(
            engine.clone(),
            FieldInfo::new("Task", "project", TypeRef::named("Project")),
        ));

    let query = Object::new("Query")
        .field(
            authorized_field(engine.clone(), FieldInfo::new("Query", "project", TypeRef::named("Project")))
                .argument(id_arg()),
        )
        .field(authorized_field(
            engine.clone(),
            FieldInfo::new("Query", "projects", TypeRef::named_nn_list_nn("Project")),
        ))
        .field(
            authorized_field(engine.clone(), FieldInfo::new("Query", "task", TypeRef::named("Task")))
                .argument(id_arg()),
        )
        .field(authorized_field(
            engine.clone(),
            FieldInfo::new("Query", "tasks", TypeRef::named_nn_list_nn("Task")),
        ));

    let mutation = Object::new("Mutation")
        .field(create_task(engine.clone()))
        .field(update_task(engine));

    Schema::build("Query", Some("Mutation"), None)
        .register(project)
        .register(task)
        .register(query)
        .register(mutation)
        .data(db)
        .finish()
}

/// `createTask(projectId, title, published)`: authorized against a blank
/// task, owned by the caller.
fn create_task(engine: Arc<Engine>) -> Field {
    let info = Arc::new(FieldInfo::new("Mutation", "createTask", TypeRef::named("Task")).mutation());
    Field::new("createTask", TypeRef::named("Task"), move |ctx| {
        let engine = engine.clone();
        let info = info.clone();
        FieldFuture::new(async move {
            let mut state = ResolutionState::new(field_params(&ctx), request_handle(&ctx, &info));
            authorize(&engine, &mut state, Arity::One)
                .await
                .map_err(configuration_error)?;
            if let Some(result) = state.result.take() {
                return result.map(field_value).map_err(graphql_error);
            }

            let db = ctx.ctx.data::<DatabaseConnection>()?;
            let owner = ctx.ctx.data::<Subject>()?.id.clone();
            let published = match ctx.args.get("published") {
                Some(flag) => flag.boolean()?,
                None => false,
            };
            let created = task::ActiveModel {
                project_id: Set(key_arg(&ctx, "projectId")?),
                title: Set(ctx.args.try_get("title")?.string()?.to_owned()),
                owner: Set(owner),
                published: Set(i64::from(published)),
                ..Default::default()
            }
            .insert(db)
            .await?;
            tracing::info!(task = created.id, owner = %created.owner, "Created task");
            Ok(Some(FieldValue::owned_any(serde_json::to_value(created)?)))
        })
    })
    .argument(InputValue::new("projectId", TypeRef::named_nn(TypeRef::INT)))
    .argument(InputValue::new("title", TypeRef::named_nn(TypeRef::STRING)))
    .argument(InputValue::new("published", TypeRef::named(TypeRef::BOOLEAN)))
}

/// `updateTask(id, title)`: the task is loaded and authorized for update
/// before the write.
fn update_task(engine: Arc<Engine>) -> Field {
    let info = Arc::new(FieldInfo::new("Mutation", "updateTask", TypeRef::named("Task")).mutation());
    Field::new("updateTask", TypeRef::named("Task"), move |ctx| {
        let engine = engine.clone();
        let info = info.clone();
        FieldFuture::new(async move {
            let mut state = ResolutionState::new(field_params(&ctx), request_handle(&ctx, &info));
            authorize(&engine, &mut state, Arity::One)
                .await
                .map_err(configuration_error)?;
            if let Some(result) = state.result.take() {
                return result.map(field_value).map_err(graphql_error);
            }

            let id = state
                .loaded_resource()
                .and_then(|task| task.get("id"))
                .and_then(Value::as_i64)
                .ok_or_else(|| async_graphql::Error::new("Loaded task has no id"))?;
            let db = ctx.ctx.data::<DatabaseConnection>()?;
            let updated = task::ActiveModel {
                id: Set(key_value("id", id)?),
                title: Set(ctx.args.try_get("title")?.string()?.to_owned()),
                ..Default::default()
            }
            .update(db)
            .await?;
            Ok(Some(FieldValue::owned_any(serde_json::to_value(updated)?)))
        })
    })
    .argument(id_arg())
    .argument(InputValue::new("title", TypeRef::named_nn(TypeRef::STRING)))
}

/// Insert sample data into an empty database.
pub async fn seed(db: &DatabaseConnection) -> Result<()> {
    if project::Entity::find().count(db).await.into_diagnostic()? > 0 {
        return Ok(());
    }

    let projects = [("Apollo", "alice"), ("Gemini", "bob")];
    let mut ids = Vec::new();
    for (name, owner) in projects {
        let created = project::ActiveModel {
            name: Set(name.to_string()),
            owner: Set(owner.to_string()),
            ..Default::default()
        }
        .insert(db)
        .await
        .into_diagnostic()?;
        ids.push(created.id);
    }

    let tasks = [
        (ids[0], "Draft the plan", "alice", 0),
        (ids[0], "Review the plan", "bob", 1),
        (ids[0], "Private notes", "bob", 0),
        (ids[1], "Launch", "bob", 0),
    ];
    for (project_id, title, owner, published) in tasks {
        task::ActiveModel {
            project_id: Set(project_id),
            title: Set(title.to_string()),
            owner: Set(owner.to_string()),
            published: Set(published),
            ..Default::default()
        }
        .insert(db)
        .await
        .into_diagnostic()?;
    }

    tracing::info!(projects = ids.len(), "Seeded sample data");
    Ok(())
}
