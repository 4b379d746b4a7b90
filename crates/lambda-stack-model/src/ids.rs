//! Identifier value objects.
//!
//! Construct ids name nodes of the definition tree (`<stack>/<bucket>/...`),
//! logical ids are the template keys derived from those paths, binary names
//! reference pre-built artifacts and stack names label the deployed stack.
//! Every constructor validates its input and reports the offending entity.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{DefinitionError, EntityKind};

const MAX_CONSTRUCT_ID_LEN: usize = 255;
const MAX_LOGICAL_ID_LEN: usize = 255;
const MAX_BINARY_NAME_LEN: usize = 64;
const MAX_STACK_NAME_LEN: usize = 128;
const HASH_SUFFIX_LEN: usize = 8;

/// Path components that do not contribute to the human-readable part of a
/// logical id.
const HIDDEN_DEFAULT: &str = "Default";
const HIDDEN_RESOURCE: &str = "Resource";

/// Identifier of a single node in the construct tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstructId(String);

impl ConstructId {
    pub fn new(entity: EntityKind, value: impl Into<String>) -> Result<Self, DefinitionError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DefinitionError::invalid_identifier(
                entity,
                value,
                "construct id must not be empty",
            ));
        }
        if value.len() > MAX_CONSTRUCT_ID_LEN {
            return Err(DefinitionError::invalid_identifier(
                entity,
                value,
                format!("construct id exceeds {MAX_CONSTRUCT_ID_LEN} characters"),
            ));
        }
        if value.contains('/') {
            return Err(DefinitionError::invalid_identifier(
                entity,
                value,
                "construct id must not contain '/'",
            ));
        }
        if !value.chars().any(|c| c.is_ascii_alphanumeric()) {
            return Err(DefinitionError::invalid_identifier(
                entity,
                value,
                "construct id needs at least one ASCII letter or digit",
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConstructId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Template key for a rendered resource, stable for a given construct path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalId(String);

impl LogicalId {
    /// Derives the logical id of the resource at `path`, given relative to the
    /// stack. The readable part is followed by an 8 character hash suffix of
    /// the full path so that two paths sharing the same readable form never
    /// collide.
    pub fn from_path(path: &[&str]) -> Self {
        let mut human: Vec<&str> = Vec::with_capacity(path.len());
        for (idx, component) in path.iter().enumerate() {
            let is_last = idx + 1 == path.len();
            if *component == HIDDEN_DEFAULT || (is_last && *component == HIDDEN_RESOURCE) {
                continue;
            }
            if human.last() == Some(component) {
                continue;
            }
            human.push(component);
        }

        let mut readable: String = human.iter().map(|c| alphanumeric(c)).collect();
        readable.truncate(MAX_LOGICAL_ID_LEN - HASH_SUFFIX_LEN);
        Self(format!("{readable}{}", path_hash(path)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a pre-built executable produced by the build pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BinaryName(String);

impl BinaryName {
    pub fn new(value: impl Into<String>) -> Result<Self, DefinitionError> {
        let value = value.into();
        let reject = |reason: &str| {
            Err(DefinitionError::invalid_identifier(
                EntityKind::Compute,
                value.clone(),
                reason,
            ))
        };

        let Some(first) = value.chars().next() else {
            return reject("artifact reference must not be empty");
        };
        if value.len() > MAX_BINARY_NAME_LEN {
            return reject("artifact reference is too long");
        }
        if first.is_ascii_digit() || first == '-' {
            return reject("artifact reference must start with a letter or '_'");
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return reject("artifact reference may only contain ASCII letters, digits, '_' and '-'");
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BinaryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name under which the provisioning engine deploys the stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StackName(String);

impl StackName {
    pub fn new(value: impl Into<String>) -> Result<Self, DefinitionError> {
        let value = value.into();
        let valid = value.len() <= MAX_STACK_NAME_LEN
            && value.starts_with(|c: char| c.is_ascii_alphabetic())
            && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(DefinitionError::invalid_identifier(
                EntityKind::Stack,
                value,
                "stack name must match [A-Za-z][A-Za-z0-9-]* and be at most 128 characters",
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StackName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn alphanumeric(component: &str) -> String {
    component
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

fn path_hash(path: &[&str]) -> String {
    let digest = Sha256::digest(path.join("/").as_bytes());
    let mut hex = format!("{digest:X}");
    hex.truncate(HASH_SUFFIX_LEN);
    hex
}
