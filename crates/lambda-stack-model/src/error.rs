//! Definition-time error types

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The entity whose construction produced a [`DefinitionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Stack,
    Storage,
    Compute,
    AccessGrant,
    EventSubscription,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Stack => "stack",
            EntityKind::Storage => "storage",
            EntityKind::Compute => "compute",
            EntityKind::AccessGrant => "access grant",
            EntityKind::EventSubscription => "event subscription",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when any part of a stack description fails validation.
///
/// Every variant identifies the entity that could not be built so the caller
/// can fix the configuration and evaluate the definition again.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum DefinitionError {
    #[error("invalid {entity} identifier '{value}': {reason}")]
    InvalidIdentifier {
        entity: EntityKind,
        value: String,
        reason: String,
    },

    #[error("invalid {entity} setting: {reason}")]
    InvalidSetting { entity: EntityKind, reason: String },

    #[error("artifact '{name}' does not resolve to a pre-built binary")]
    UnresolvedArtifact { name: String },

    #[error("inconsistent {entity}: {reason}")]
    Inconsistent { entity: EntityKind, reason: String },
}

impl DefinitionError {
    pub fn invalid_identifier(
        entity: EntityKind,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidIdentifier {
            entity,
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_setting(entity: EntityKind, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            entity,
            reason: reason.into(),
        }
    }

    pub fn unresolved_artifact(name: impl Into<String>) -> Self {
        Self::UnresolvedArtifact { name: name.into() }
    }

    pub fn inconsistent(entity: EntityKind, reason: impl Into<String>) -> Self {
        Self::Inconsistent {
            entity,
            reason: reason.into(),
        }
    }

    /// Entity whose construction failed.
    pub fn entity(&self) -> EntityKind {
        match self {
            DefinitionError::InvalidIdentifier { entity, .. }
            | DefinitionError::InvalidSetting { entity, .. }
            | DefinitionError::Inconsistent { entity, .. } => *entity,
            DefinitionError::UnresolvedArtifact { .. } => EntityKind::Compute,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_artifact_is_attributed_to_compute() {
        let err = DefinitionError::unresolved_artifact("rust_lambda");
        assert_eq!(err.entity(), EntityKind::Compute);
        assert_eq!(
            err.to_string(),
            "artifact 'rust_lambda' does not resolve to a pre-built binary"
        );
    }

    #[test]
    fn message_names_the_failing_entity() {
        let err = DefinitionError::invalid_identifier(EntityKind::Storage, "a/b", "contains '/'");
        assert_eq!(err.entity(), EntityKind::Storage);
        assert_eq!(err.to_string(), "invalid storage identifier 'a/b': contains '/'");

        let err = DefinitionError::inconsistent(EntityKind::EventSubscription, "grant mismatch");
        assert!(err.to_string().starts_with("inconsistent event subscription"));
    }
}
