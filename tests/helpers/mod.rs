#![allow(dead_code)]

pub mod builders;
pub mod db;
pub mod fixtures;

pub use builders::{ProjectBuilder, TaskBuilder};
pub use db::TestDb;
pub use fixtures::{admin, anonymous_request, bob, editor, request, Fixture};
