pub mod project;
pub mod task;

pub use project::Entity as Project;
pub use task::Entity as Task;
