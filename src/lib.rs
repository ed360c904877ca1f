//! Gatekeeper - authorization-aware field resolution for GraphQL
//!
//! This library provides the load-and-authorize engine, its async-graphql
//! adapters and a small projects/tasks schema built on them.
//! It exposes all modules for testing purposes.

pub mod authz;
pub mod demo;
pub mod entities;
pub mod graphql;
pub mod settings;
pub mod web;
