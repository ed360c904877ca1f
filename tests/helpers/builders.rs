use gatekeeper::entities;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};

/// Builder for creating test projects
pub struct ProjectBuilder {
    name: String,
    owner: String,
}

impl ProjectBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            owner: "alice".to_string(),
        }
    }

    pub fn owned_by(mut self, owner: &str) -> Self {
        self.owner = owner.to_string();
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> entities::project::Model {
        entities::project::ActiveModel {
            name: Set(self.name),
            owner: Set(self.owner),
            ..Default::default()
        }
        .insert(db)
        .await
        .expect("Failed to create test project")
    }
}

/// Builder for creating test tasks
pub struct TaskBuilder {
    project_id: i32,
    title: String,
    owner: String,
    published: bool,
}

impl TaskBuilder {
    pub fn new(project_id: i32, title: &str) -> Self {
        Self {
            project_id,
            title: title.to_string(),
            owner: "alice".to_string(),
            published: false,
        }
    }

    pub fn owned_by(mut self, owner: &str) -> Self {
        self.owner = owner.to_string();
        self
    }

    pub fn published(mut self) -> Self {
        self.published = true;
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> entities::task::Model {
        entities::task::ActiveModel {
            project_id: Set(self.project_id),
            title: Set(self.title),
            owner: Set(self.owner),
            published: Set(i64::from(self.published)),
            ..Default::default()
        }
        .insert(db)
        .await
        .expect("Failed to create test task")
    }
}
