use std::sync::Arc;

use async_graphql::dynamic::TypeRef;
use gatekeeper::authz::{Engine, FieldInfo, RequestHandle, Subject};
use gatekeeper::demo::{self, ADMIN_ROLE, EDITOR_ROLE};
use gatekeeper::entities::{project, task};
use gatekeeper::settings::Settings;

use super::{ProjectBuilder, TaskBuilder, TestDb};

pub fn admin() -> Subject {
    Subject::new("root").with_role(ADMIN_ROLE)
}

pub fn editor() -> Subject {
    Subject::new("carol").with_role(EDITOR_ROLE)
}

pub fn bob() -> Subject {
    Subject::new("bob")
}

pub fn request(parent: &str, field: &str, ty: TypeRef, subject: &Subject) -> RequestHandle {
    anonymous_request(parent, field, ty).with_subject(Some(subject.clone()))
}

pub fn anonymous_request(parent: &str, field: &str, ty: TypeRef) -> RequestHandle {
    let mut info = FieldInfo::new(parent, field, ty);
    if parent == "Mutation" {
        info = info.mutation();
    }
    RequestHandle::new(Arc::new(info))
}

/// Two projects and four tasks:
///
/// | project | task     | owner | published |
/// |---------|----------|-------|-----------|
/// | apollo  | draft    | alice | no        |
/// | apollo  | review   | bob   | yes       |
/// | apollo  | notes    | bob   | no        |
/// | gemini  | launch   | bob   | no        |
pub struct Fixture {
    pub db: TestDb,
    pub engine: Arc<Engine>,
    pub apollo: project::Model,
    pub gemini: project::Model,
    pub draft: task::Model,
    pub review: task::Model,
    pub notes: task::Model,
    pub launch: task::Model,
}

impl Fixture {
    pub async fn new() -> Self {
        let db = TestDb::new().await;
        let conn = db.connection();

        let apollo = ProjectBuilder::new("Apollo").owned_by("alice").create(conn).await;
        let gemini = ProjectBuilder::new("Gemini").owned_by("bob").create(conn).await;
        let draft = TaskBuilder::new(apollo.id, "Draft").owned_by("alice").create(conn).await;
        let review = TaskBuilder::new(apollo.id, "Review")
            .owned_by("bob")
            .published()
            .create(conn)
            .await;
        let notes = TaskBuilder::new(apollo.id, "Notes").owned_by("bob").create(conn).await;
        let launch = TaskBuilder::new(gemini.id, "Launch").owned_by("bob").create(conn).await;

        let engine = Arc::new(demo::engine(conn.clone(), &Settings::default()));

        Self {
            db,
            engine,
            apollo,
            gemini,
            draft,
            review,
            notes,
            launch,
        }
    }
}
