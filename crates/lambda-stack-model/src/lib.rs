//! Resource model of the Lambda Rust stack.
//!
//! A stack description is a plain configuration record: one storage bucket,
//! one function packaged from a pre-built binary, the read/write grant that
//! lets the function work on the bucket and the subscription that invokes the
//! function whenever an object is created. This crate holds those records,
//! the identifier rules they obey and the rendering of a description into a
//! template the external provisioning engine consumes. Nothing here talks to
//! the cloud.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod error;
pub mod ids;
pub mod resources;
pub mod template;

pub use error::{DefinitionError, EntityKind};
pub use ids::{BinaryName, ConstructId, LogicalId, StackName};
pub use resources::{
    AccessGrant, AccessRights, Architecture, ArtifactRef, ComputeResourceSpec, EventKind,
    EventSubscription, FunctionSettings, Runtime, StorageResourceSpec, TeardownPolicy,
};
pub use template::{RenderedIds, Template, TemplateResource};

/// Qualifier of the asset bootstrap bucket the engine deploys from.
pub const DEFAULT_BOOTSTRAP_QUALIFIER: &str = "hnb659fds";

const MAX_DESCRIPTION_LEN: usize = 1024;
const MAX_TAG_KEY_LEN: usize = 128;
const MAX_TAG_VALUE_LEN: usize = 256;
/// Tag namespaces owned by the platform and by the rendered template itself.
const RESERVED_TAG_PREFIXES: &[&str] = &["aws:", "aws-cdk:"];

/// Stack-level identity and pass-through settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackMetadata {
    pub id: ConstructId,
    pub stack_name: StackName,
    pub account: Option<String>,
    pub region: Option<String>,
    pub description: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub bootstrap_qualifier: String,
}

impl StackMetadata {
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if let Some(account) = self.account.as_deref() {
            if account.len() != 12 || !account.chars().all(|c| c.is_ascii_digit()) {
                return Err(DefinitionError::invalid_identifier(
                    EntityKind::Stack,
                    account,
                    "account must be 12 digits",
                ));
            }
        }

        if let Some(region) = self.region.as_deref() {
            let well_formed = !region.is_empty()
                && region
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                && region.matches('-').count() >= 2
                && !region.starts_with('-')
                && !region.ends_with('-');
            if !well_formed {
                return Err(DefinitionError::invalid_identifier(
                    EntityKind::Stack,
                    region,
                    "region must look like 'eu-central-1'",
                ));
            }
        }

        if let Some(description) = self.description.as_deref() {
            if description.len() > MAX_DESCRIPTION_LEN {
                return Err(DefinitionError::invalid_setting(
                    EntityKind::Stack,
                    format!("description exceeds {MAX_DESCRIPTION_LEN} characters"),
                ));
            }
        }

        for (key, value) in &self.tags {
            if key.is_empty() || key.len() > MAX_TAG_KEY_LEN {
                return Err(DefinitionError::invalid_identifier(
                    EntityKind::Stack,
                    key.clone(),
                    format!("tag keys must be 1..={MAX_TAG_KEY_LEN} characters"),
                ));
            }
            let lowered = key.to_ascii_lowercase();
            if let Some(prefix) = RESERVED_TAG_PREFIXES
                .iter()
                .find(|prefix| lowered.starts_with(*prefix))
            {
                return Err(DefinitionError::invalid_identifier(
                    EntityKind::Stack,
                    key.clone(),
                    format!("tag keys with the '{prefix}' prefix are reserved"),
                ));
            }
            if value.len() > MAX_TAG_VALUE_LEN {
                return Err(DefinitionError::invalid_setting(
                    EntityKind::Stack,
                    format!("value of tag '{key}' exceeds {MAX_TAG_VALUE_LEN} characters"),
                ));
            }
        }

        let qualifier = self.bootstrap_qualifier.as_str();
        if qualifier.is_empty()
            || qualifier.len() > 10
            || !qualifier
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(DefinitionError::invalid_identifier(
                EntityKind::Stack,
                qualifier,
                "bootstrap qualifier must be 1..=10 lowercase letters or digits",
            ));
        }

        Ok(())
    }

    /// Deployment environment in `aws://<account>/<region>` form; unset parts
    /// are left for the engine to resolve.
    pub fn environment(&self) -> String {
        format!(
            "aws://{}/{}",
            self.account.as_deref().unwrap_or("unknown-account"),
            self.region.as_deref().unwrap_or("unknown-region")
        )
    }
}

/// Complete description produced by evaluating a stack definition. Holds
/// exactly one instance of each entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackDescription {
    metadata: StackMetadata,
    storage: StorageResourceSpec,
    compute: ComputeResourceSpec,
    grant: AccessGrant,
    subscription: EventSubscription,
}

impl StackDescription {
    /// Bundles the entities after checking they reference each other.
    pub fn new(
        metadata: StackMetadata,
        storage: StorageResourceSpec,
        compute: ComputeResourceSpec,
        grant: AccessGrant,
        subscription: EventSubscription,
    ) -> Result<Self, DefinitionError> {
        metadata.validate()?;

        if storage.construct_id() == compute.construct_id() {
            return Err(DefinitionError::inconsistent(
                EntityKind::Compute,
                format!("construct id '{}' is used twice", compute.construct_id()),
            ));
        }
        if grant.subject() != compute.logical_id() || grant.object() != storage.logical_id() {
            return Err(DefinitionError::inconsistent(
                EntityKind::AccessGrant,
                "grant does not bind the declared compute and storage resources",
            ));
        }
        if subscription.source() != storage.logical_id()
            || subscription.destination() != compute.logical_id()
        {
            return Err(DefinitionError::inconsistent(
                EntityKind::EventSubscription,
                "subscription does not bind the declared storage and compute resources",
            ));
        }

        debug!(
            stack = %metadata.stack_name,
            bucket = %storage.logical_id(),
            function = %compute.logical_id(),
            "stack description assembled"
        );

        Ok(Self {
            metadata,
            storage,
            compute,
            grant,
            subscription,
        })
    }

    pub fn metadata(&self) -> &StackMetadata {
        &self.metadata
    }

    pub fn storage(&self) -> &StorageResourceSpec {
        &self.storage
    }

    pub fn compute(&self) -> &ComputeResourceSpec {
        &self.compute
    }

    pub fn grant(&self) -> &AccessGrant {
        &self.grant
    }

    pub fn subscription(&self) -> &EventSubscription {
        &self.subscription
    }

    pub fn render(&self) -> Template {
        template::render(self)
    }
}
