use miette::Diagnostic;
use thiserror::Error;

use crate::authz::batch::SourceKey;

#[derive(Debug, Error, Diagnostic)]
pub enum GuardError {
    #[error("Mutation field `{parent_type}.{field}` does not declare an action")]
    #[diagnostic(
        code(gatekeeper::config::missing_action),
        help("Mutation fields must set an explicit action, e.g. FieldAuthz::new().action(\"update\")")
    )]
    MissingAction { parent_type: String, field: String },

    #[error("Type `{type_name}` has no resource descriptor")]
    #[diagnostic(
        code(gatekeeper::config::missing_resource),
        help("Attach one with SchemaMetadata::builder().authorize_type(\"{type_name}\", TypeAuthz::new(...))")
    )]
    MissingResource { type_name: String },

    #[error("Type `{type_name}` has no owning authorization module")]
    #[diagnostic(
        code(gatekeeper::config::missing_module),
        help("Set the module with TypeAuthz::module(\"<name>\")")
    )]
    MissingModule { type_name: String },

    #[error("Batched field `{field}` does not declare association keys")]
    #[diagnostic(
        code(gatekeeper::config::missing_batch_key),
        help("Configure FieldAuthz::batch_key(\"<child column>\", \"<parent column>\")")
    )]
    MissingBatchKey { field: String },

    #[error("No loader registry attached to the request")]
    #[diagnostic(
        code(gatekeeper::config::missing_loader_registry),
        help("Insert an Arc<LoaderRegistry> into the request data before executing the query")
    )]
    MissingLoaderRegistry,

    #[error("Database error: {0}")]
    #[diagnostic(code(gatekeeper::db))]
    Database(#[from] sea_orm::DbErr),

    #[error("Batch load for `{source_key}` exceeded {millis}ms")]
    #[diagnostic(
        code(gatekeeper::batch::timeout),
        help("Raise loader.timeout_ms or reduce loader.max_batch_size")
    )]
    LoadTimeout { source_key: SourceKey, millis: u64 },
}

impl GuardError {
    /// Configuration errors are the only faults allowed to escape a field
    /// resolution; everything else is normalised into an outcome.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            GuardError::MissingAction { .. }
                | GuardError::MissingResource { .. }
                | GuardError::MissingModule { .. }
                | GuardError::MissingBatchKey { .. }
                | GuardError::MissingLoaderRegistry
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        let err = GuardError::MissingAction {
            parent_type: "Mutation".into(),
            field: "updateTask".into(),
        };
        assert!(err.is_configuration());
        assert_eq!(
            err.to_string(),
            "Mutation field `Mutation.updateTask` does not declare an action"
        );

        assert!(GuardError::MissingLoaderRegistry.is_configuration());
        assert!(!GuardError::Database(sea_orm::DbErr::Custom("down".into())).is_configuration());
    }
}
