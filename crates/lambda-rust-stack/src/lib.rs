//! Stack definition for a bucket-triggered Rust function.
//!
//! Evaluating a [`StackDefinition`] declares the storage bucket, the function
//! packaged from a pre-built binary, the read/write grant between them and
//! the object-created subscription, in that order. Evaluation is pure
//! in-memory description building: binaries are resolved beforehand through
//! an [`ArtifactResolver`] and the resulting description is handed to the
//! provisioning engine by the [`AssemblyWriter`].

mod artifacts;
mod assembly;
mod config;

use std::collections::BTreeMap;

use lambda_stack_model::{
    AccessGrant, BinaryName, ComputeResourceSpec, ConstructId, EntityKind, EventSubscription,
    FunctionSettings, StackMetadata, StackName, StorageResourceSpec,
    DEFAULT_BOOTSTRAP_QUALIFIER,
};
use tracing::{info, instrument, warn};

pub use artifacts::{ArtifactCatalog, ArtifactRecord, ArtifactResolver, BOOTSTRAP_FILE};
pub use assembly::{
    AssemblyConfig, AssemblyOutput, AssemblyWriter, AssetEntry, Manifest, StackArtifact,
    StackArtifactProperties, MANIFEST_FILE, MANIFEST_VERSION,
};
pub use config::{
    parse_bounded, parse_tags, EnvConfig, ENV_ACCOUNT, ENV_ARCHITECTURE, ENV_ARTIFACT_DIR,
    ENV_BINARY, ENV_BOOTSTRAP_QUALIFIER, ENV_DESCRIPTION, ENV_HMAC_KEY, ENV_MEMORY_MB,
    ENV_OUT_DIR, ENV_REGION, ENV_STACK_NAME, ENV_TAGS, ENV_TIMEOUT_SECONDS,
};
pub use lambda_stack_model::{DefinitionError, StackDescription, Template};

pub const DEFAULT_STACK_ID: &str = "LambdaRustStack";
pub const DEFAULT_BINARY_NAME: &str = "rust_lambda";

/// Construct ids of the declared resources.
pub const BUCKET_ID: &str = "HelloRustBucket";
pub const FUNCTION_ID: &str = "HelloRust";

/// Stack-level configuration. Region, account, tags and naming are passed
/// through to the description untouched apart from validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackProps {
    pub stack_name: Option<String>,
    pub account: Option<String>,
    pub region: Option<String>,
    pub description: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub bootstrap_qualifier: String,
    /// Reference to the pre-built binary the function runs.
    pub binary_name: String,
    pub function: FunctionSettings,
}

impl Default for StackProps {
    fn default() -> Self {
        Self {
            stack_name: None,
            account: None,
            region: None,
            description: None,
            tags: BTreeMap::new(),
            bootstrap_qualifier: DEFAULT_BOOTSTRAP_QUALIFIER.to_string(),
            binary_name: DEFAULT_BINARY_NAME.to_string(),
            function: FunctionSettings::default(),
        }
    }
}

/// Declarative unit producing a [`StackDescription`].
#[derive(Debug, Clone)]
pub struct StackDefinition {
    id: String,
    props: StackProps,
}

impl StackDefinition {
    pub fn new(id: impl Into<String>, props: StackProps) -> Self {
        Self {
            id: id.into(),
            props,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn props(&self) -> &StackProps {
        &self.props
    }

    /// Builds storage, compute, grant and subscription in that order. The
    /// first failure aborts the evaluation and no description is returned.
    #[instrument(skip(self, artifacts), fields(stack = %self.id))]
    pub fn define<A>(&self, artifacts: &A) -> Result<StackDescription, DefinitionError>
    where
        A: ArtifactResolver + ?Sized,
    {
        match self.evaluate(artifacts) {
            Ok(description) => {
                info!(
                    stack_name = %description.metadata().stack_name,
                    bucket = %description.storage().logical_id(),
                    function = %description.compute().logical_id(),
                    "stack defined"
                );
                Ok(description)
            }
            Err(err) => {
                warn!(entity = %err.entity(), error = %err, "stack definition rejected");
                Err(err)
            }
        }
    }

    fn evaluate<A>(&self, artifacts: &A) -> Result<StackDescription, DefinitionError>
    where
        A: ArtifactResolver + ?Sized,
    {
        let metadata = self.define_metadata()?;
        let storage = self.define_storage()?;
        let compute = self.define_compute(artifacts)?;
        let grant = AccessGrant::read_write(&compute, &storage);
        let subscription = EventSubscription::object_created(&storage, &compute, &grant)?;
        StackDescription::new(metadata, storage, compute, grant, subscription)
    }

    fn define_metadata(&self) -> Result<StackMetadata, DefinitionError> {
        let id = ConstructId::new(EntityKind::Stack, self.id.as_str())?;
        let stack_name = StackName::new(
            self.props
                .stack_name
                .clone()
                .unwrap_or_else(|| self.id.clone()),
        )?;

        let metadata = StackMetadata {
            id,
            stack_name,
            account: self.props.account.clone(),
            region: self.props.region.clone(),
            description: self.props.description.clone(),
            tags: self.props.tags.clone(),
            bootstrap_qualifier: self.props.bootstrap_qualifier.clone(),
        };
        metadata.validate()?;
        Ok(metadata)
    }

    fn define_storage(&self) -> Result<StorageResourceSpec, DefinitionError> {
        let id = ConstructId::new(EntityKind::Storage, BUCKET_ID)?;
        Ok(StorageResourceSpec::new(id))
    }

    fn define_compute<A>(&self, artifacts: &A) -> Result<ComputeResourceSpec, DefinitionError>
    where
        A: ArtifactResolver + ?Sized,
    {
        let id = ConstructId::new(EntityKind::Compute, FUNCTION_ID)?;
        let binary = BinaryName::new(self.props.binary_name.as_str())?;
        let artifact = artifacts
            .resolve(&binary)
            .ok_or_else(|| DefinitionError::unresolved_artifact(binary.as_str()))?;
        if artifact.binary_name() != &binary {
            return Err(DefinitionError::inconsistent(
                EntityKind::Compute,
                format!(
                    "artifact reference '{binary}' resolved to binary '{}'",
                    artifact.binary_name()
                ),
            ));
        }
        ComputeResourceSpec::new(id, artifact, self.props.function.clone())
    }
}
