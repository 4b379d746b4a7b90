//! Configuration records for the four entities of a stack description.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{DefinitionError, EntityKind};
use crate::ids::{BinaryName, ConstructId, LogicalId};

/// Smallest and largest memory allocation accepted by the function runtime, in MiB.
pub const MIN_MEMORY_MB: u32 = 128;
pub const MAX_MEMORY_MB: u32 = 10_240;
/// Upper bound on a single invocation, in seconds.
pub const MAX_TIMEOUT_SECONDS: u32 = 900;

const RESERVED_ENV_KEYS: &[&str] = &[
    "_HANDLER",
    "_X_AMZN_TRACE_ID",
    "AWS_DEFAULT_REGION",
    "AWS_REGION",
    "AWS_EXECUTION_ENV",
    "AWS_LAMBDA_FUNCTION_NAME",
    "AWS_LAMBDA_FUNCTION_MEMORY_SIZE",
    "AWS_LAMBDA_FUNCTION_VERSION",
    "AWS_LAMBDA_RUNTIME_API",
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "LAMBDA_TASK_ROOT",
    "LAMBDA_RUNTIME_DIR",
];

/// What happens to the storage resource when the stack is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownPolicy {
    Destroy,
    Retain,
}

impl TeardownPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeardownPolicy::Destroy => "destroy",
            TeardownPolicy::Retain => "retain",
        }
    }

    /// Value of the template's `DeletionPolicy` attribute.
    pub fn deletion_policy(&self) -> &'static str {
        match self {
            TeardownPolicy::Destroy => "Delete",
            TeardownPolicy::Retain => "Retain",
        }
    }
}

/// Object store bucket declared by the stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageResourceSpec {
    construct_id: ConstructId,
    logical_id: LogicalId,
    enforce_transport_encryption: bool,
    teardown_policy: TeardownPolicy,
    auto_purge_on_teardown: bool,
}

impl StorageResourceSpec {
    /// Bucket with the fixed policy of this stack: encrypted transport only,
    /// destroyed on teardown and emptied beforehand.
    pub fn new(construct_id: ConstructId) -> Self {
        let logical_id = LogicalId::from_path(&[construct_id.as_str(), "Resource"]);
        Self {
            construct_id,
            logical_id,
            enforce_transport_encryption: true,
            teardown_policy: TeardownPolicy::Destroy,
            auto_purge_on_teardown: true,
        }
    }

    /// Bucket with an explicit teardown policy. Purging the contents is only
    /// meaningful when the bucket itself is destroyed.
    pub fn with_teardown(
        construct_id: ConstructId,
        teardown_policy: TeardownPolicy,
        auto_purge_on_teardown: bool,
    ) -> Result<Self, DefinitionError> {
        if auto_purge_on_teardown && teardown_policy != TeardownPolicy::Destroy {
            return Err(DefinitionError::invalid_setting(
                EntityKind::Storage,
                "auto-purge on teardown requires the destroy teardown policy",
            ));
        }

        let mut spec = Self::new(construct_id);
        spec.teardown_policy = teardown_policy;
        spec.auto_purge_on_teardown = auto_purge_on_teardown;
        Ok(spec)
    }

    pub fn construct_id(&self) -> &ConstructId {
        &self.construct_id
    }

    pub fn logical_id(&self) -> &LogicalId {
        &self.logical_id
    }

    pub fn enforces_transport_encryption(&self) -> bool {
        self.enforce_transport_encryption
    }

    pub fn teardown_policy(&self) -> TeardownPolicy {
        self.teardown_policy
    }

    pub fn auto_purge_on_teardown(&self) -> bool {
        self.auto_purge_on_teardown
    }

    /// True when teardown deletes every object before deleting the bucket.
    /// Without it teardown fails on a non-empty bucket.
    pub fn purges_before_delete(&self) -> bool {
        self.teardown_policy == TeardownPolicy::Destroy && self.auto_purge_on_teardown
    }
}

/// Execution environment the pre-built binary targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Runtime {
    #[serde(rename = "provided.al2023")]
    ProvidedAl2023,
    #[serde(rename = "provided.al2")]
    ProvidedAl2,
}

impl Runtime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Runtime::ProvidedAl2023 => "provided.al2023",
            Runtime::ProvidedAl2 => "provided.al2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    X86_64,
    Arm64,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x86_64" | "x86-64" | "amd64" => Ok(Architecture::X86_64),
            "arm64" | "aarch64" => Ok(Architecture::Arm64),
            other => Err(DefinitionError::invalid_setting(
                EntityKind::Compute,
                format!("unknown architecture '{other}'"),
            )),
        }
    }
}

/// Tunables of the compute resource. They never change which entities are
/// produced, only how the function is rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSettings {
    pub runtime: Runtime,
    pub architecture: Architecture,
    pub memory_size_mb: u32,
    pub timeout_seconds: u32,
    pub environment: BTreeMap<String, String>,
}

impl Default for FunctionSettings {
    fn default() -> Self {
        Self {
            runtime: Runtime::ProvidedAl2023,
            architecture: Architecture::X86_64,
            memory_size_mb: MIN_MEMORY_MB,
            timeout_seconds: 3,
            environment: BTreeMap::new(),
        }
    }
}

impl FunctionSettings {
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if !(MIN_MEMORY_MB..=MAX_MEMORY_MB).contains(&self.memory_size_mb) {
            return Err(DefinitionError::invalid_setting(
                EntityKind::Compute,
                format!(
                    "memory size {} MiB outside {MIN_MEMORY_MB}..={MAX_MEMORY_MB}",
                    self.memory_size_mb
                ),
            ));
        }
        if !(1..=MAX_TIMEOUT_SECONDS).contains(&self.timeout_seconds) {
            return Err(DefinitionError::invalid_setting(
                EntityKind::Compute,
                format!(
                    "timeout {}s outside 1..={MAX_TIMEOUT_SECONDS}",
                    self.timeout_seconds
                ),
            ));
        }
        for key in self.environment.keys() {
            let well_formed = key.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
                && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !well_formed {
                return Err(DefinitionError::invalid_identifier(
                    EntityKind::Compute,
                    key.clone(),
                    "environment variable names must match [A-Za-z_][A-Za-z0-9_]*",
                ));
            }
            if RESERVED_ENV_KEYS.contains(&key.as_str()) {
                return Err(DefinitionError::invalid_identifier(
                    EntityKind::Compute,
                    key.clone(),
                    "environment variable is reserved by the function runtime",
                ));
            }
        }
        Ok(())
    }
}

/// Reference to an already-built binary and the content hash it was
/// published under. Only [`ArtifactRef::new`] builds one, so the hash is
/// always a well-formed digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ArtifactRef {
    binary_name: BinaryName,
    asset_hash: String,
}

impl ArtifactRef {
    pub fn new(binary_name: BinaryName, asset_hash: impl Into<String>) -> Result<Self, DefinitionError> {
        let asset_hash = asset_hash.into();
        let valid = asset_hash.len() == 64
            && asset_hash
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if !valid {
            return Err(DefinitionError::invalid_identifier(
                EntityKind::Compute,
                asset_hash,
                "asset hash must be a lowercase hex SHA-256 digest",
            ));
        }
        Ok(Self {
            binary_name,
            asset_hash,
        })
    }

    pub fn binary_name(&self) -> &BinaryName {
        &self.binary_name
    }

    pub fn asset_hash(&self) -> &str {
        &self.asset_hash
    }

    /// Object key the packaged binary is uploaded under.
    pub fn object_key(&self) -> String {
        format!("{}.zip", self.asset_hash)
    }
}

/// Function packaged from a pre-built binary and invoked on events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComputeResourceSpec {
    construct_id: ConstructId,
    logical_id: LogicalId,
    artifact: ArtifactRef,
    entry_point: String,
    settings: FunctionSettings,
}

impl ComputeResourceSpec {
    pub fn new(
        construct_id: ConstructId,
        artifact: ArtifactRef,
        settings: FunctionSettings,
    ) -> Result<Self, DefinitionError> {
        settings.validate()?;
        let logical_id = LogicalId::from_path(&[construct_id.as_str(), "Resource"]);
        let entry_point = artifact.binary_name().as_str().to_owned();
        Ok(Self {
            construct_id,
            logical_id,
            artifact,
            entry_point,
            settings,
        })
    }

    pub fn construct_id(&self) -> &ConstructId {
        &self.construct_id
    }

    pub fn logical_id(&self) -> &LogicalId {
        &self.logical_id
    }

    pub fn artifact(&self) -> &ArtifactRef {
        &self.artifact
    }

    /// Name of the binary's invocable entry point.
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn settings(&self) -> &FunctionSettings {
        &self.settings
    }
}

/// Rights held by the subject of an [`AccessGrant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessRights {
    pub read: bool,
    pub write: bool,
}

impl AccessRights {
    pub const READ: Self = Self {
        read: true,
        write: false,
    };
    pub const WRITE: Self = Self {
        read: false,
        write: true,
    };
    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
    };

    pub fn contains(&self, other: AccessRights) -> bool {
        (self.read || !other.read) && (self.write || !other.write)
    }

    /// Storage actions allowed by these rights.
    pub fn storage_actions(&self) -> Vec<&'static str> {
        let mut actions = Vec::new();
        if self.read {
            actions.extend(["s3:GetObject*", "s3:GetBucket*", "s3:List*"]);
        }
        if self.write {
            actions.extend([
                "s3:DeleteObject*",
                "s3:PutObject",
                "s3:PutObjectLegalHold",
                "s3:PutObjectRetention",
                "s3:PutObjectTagging",
                "s3:PutObjectVersionTagging",
                "s3:Abort*",
            ]);
        }
        actions
    }
}

/// Directed permission of the compute resource on the storage resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessGrant {
    subject: LogicalId,
    object: LogicalId,
    rights: AccessRights,
}

impl AccessGrant {
    pub fn read_write(subject: &ComputeResourceSpec, object: &StorageResourceSpec) -> Self {
        Self {
            subject: subject.logical_id().clone(),
            object: object.logical_id().clone(),
            rights: AccessRights::READ_WRITE,
        }
    }

    pub fn subject(&self) -> &LogicalId {
        &self.subject
    }

    pub fn object(&self) -> &LogicalId {
        &self.object
    }

    pub fn rights(&self) -> AccessRights {
        self.rights
    }

    pub fn covers(&self, subject: &LogicalId, object: &LogicalId, required: AccessRights) -> bool {
        &self.subject == subject && &self.object == object && self.rights.contains(required)
    }
}

/// Storage events a subscription can listen to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ObjectCreated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ObjectCreated => "object_created",
        }
    }

    /// Event name used in the bucket notification configuration.
    pub fn notification_event(&self) -> &'static str {
        match self {
            EventKind::ObjectCreated => "s3:ObjectCreated:*",
        }
    }

    /// Rights the destination needs to act on the objects it is notified about.
    pub fn required_rights(&self) -> AccessRights {
        match self {
            EventKind::ObjectCreated => AccessRights::READ,
        }
    }
}

/// Registration of the compute resource as destination of storage events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSubscription {
    source: LogicalId,
    event_kind: EventKind,
    destination: LogicalId,
}

impl EventSubscription {
    /// Subscribes `destination` to `event_kind` on `source`. The grant has to
    /// exist first and give the destination the rights the event requires.
    pub fn new(
        source: &StorageResourceSpec,
        event_kind: EventKind,
        destination: &ComputeResourceSpec,
        grant: &AccessGrant,
    ) -> Result<Self, DefinitionError> {
        if !grant.covers(
            destination.logical_id(),
            source.logical_id(),
            event_kind.required_rights(),
        ) {
            return Err(DefinitionError::inconsistent(
                EntityKind::EventSubscription,
                format!(
                    "destination {} holds no grant on {} covering {} events",
                    destination.logical_id(),
                    source.logical_id(),
                    event_kind.as_str()
                ),
            ));
        }

        Ok(Self {
            source: source.logical_id().clone(),
            event_kind,
            destination: destination.logical_id().clone(),
        })
    }

    pub fn object_created(
        source: &StorageResourceSpec,
        destination: &ComputeResourceSpec,
        grant: &AccessGrant,
    ) -> Result<Self, DefinitionError> {
        Self::new(source, EventKind::ObjectCreated, destination, grant)
    }

    pub fn source(&self) -> &LogicalId {
        &self.source
    }

    pub fn event_kind(&self) -> EventKind {
        self.event_kind
    }

    pub fn destination(&self) -> &LogicalId {
        &self.destination
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    fn storage(id: &str) -> StorageResourceSpec {
        StorageResourceSpec::new(ConstructId::new(EntityKind::Storage, id).unwrap())
    }

    fn compute(id: &str) -> ComputeResourceSpec {
        let artifact = ArtifactRef::new(BinaryName::new("rust_lambda").unwrap(), HASH).unwrap();
        ComputeResourceSpec::new(
            ConstructId::new(EntityKind::Compute, id).unwrap(),
            artifact,
            FunctionSettings::default(),
        )
        .unwrap()
    }

    #[test]
    fn storage_defaults_destroy_and_purge() {
        let bucket = storage("HelloRustBucket");
        assert!(bucket.enforces_transport_encryption());
        assert_eq!(bucket.teardown_policy(), TeardownPolicy::Destroy);
        assert!(bucket.purges_before_delete());
    }

    #[test]
    fn purge_with_retain_is_rejected() {
        let id = ConstructId::new(EntityKind::Storage, "Bucket").unwrap();
        let err = StorageResourceSpec::with_teardown(id.clone(), TeardownPolicy::Retain, true)
            .unwrap_err();
        assert_eq!(err.entity(), EntityKind::Storage);

        let retained = StorageResourceSpec::with_teardown(id, TeardownPolicy::Retain, false).unwrap();
        assert!(!retained.purges_before_delete());
        assert_eq!(retained.teardown_policy().deletion_policy(), "Retain");
    }

    #[test]
    fn compute_entry_point_matches_binary() {
        let function = compute("HelloRust");
        assert_eq!(function.entry_point(), "rust_lambda");
        assert_eq!(function.artifact().object_key(), format!("{HASH}.zip"));
    }

    #[test]
    fn asset_hash_must_be_hex_digest() {
        let name = BinaryName::new("rust_lambda").unwrap();
        assert!(ArtifactRef::new(name.clone(), "abc").is_err());
        assert!(ArtifactRef::new(name.clone(), HASH.to_uppercase()).is_err());

        let err = ArtifactRef::new(name.clone(), "").unwrap_err();
        assert_eq!(err.entity(), EntityKind::Compute);

        let artifact = ArtifactRef::new(name, HASH).unwrap();
        assert_eq!(artifact.asset_hash(), HASH);
        assert_eq!(artifact.binary_name().as_str(), "rust_lambda");
    }

    #[test]
    fn function_settings_bounds() {
        let mut settings = FunctionSettings::default();
        assert!(settings.validate().is_ok());

        settings.memory_size_mb = 64;
        assert!(settings.validate().is_err());

        settings.memory_size_mb = 512;
        settings.timeout_seconds = 0;
        assert!(settings.validate().is_err());

        settings.timeout_seconds = 30;
        settings
            .environment
            .insert("AWS_REGION".into(), "eu-west-1".into());
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("reserved"));

        settings.environment.clear();
        settings.environment.insert("RUST LOG".into(), "info".into());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn architecture_parsing() {
        assert_eq!("aarch64".parse::<Architecture>().unwrap(), Architecture::Arm64);
        assert_eq!(" X86_64 ".parse::<Architecture>().unwrap(), Architecture::X86_64);
        assert!("sparc".parse::<Architecture>().is_err());
    }

    #[test]
    fn read_write_covers_lesser_rights() {
        assert!(AccessRights::READ_WRITE.contains(AccessRights::READ));
        assert!(AccessRights::READ_WRITE.contains(AccessRights::WRITE));
        assert!(!AccessRights::READ.contains(AccessRights::WRITE));

        let actions = AccessRights::READ_WRITE.storage_actions();
        assert!(actions.contains(&"s3:GetObject*"));
        assert!(actions.contains(&"s3:PutObject"));
        assert!(actions.contains(&"s3:DeleteObject*"));
    }

    #[test]
    fn subscription_requires_matching_grant() {
        let bucket = storage("HelloRustBucket");
        let function = compute("HelloRust");
        let grant = AccessGrant::read_write(&function, &bucket);

        let subscription = EventSubscription::object_created(&bucket, &function, &grant).unwrap();
        assert_eq!(subscription.event_kind(), EventKind::ObjectCreated);
        assert_eq!(subscription.source(), bucket.logical_id());
        assert_eq!(subscription.destination(), function.logical_id());

        let other_bucket = storage("OtherBucket");
        let err = EventSubscription::object_created(&other_bucket, &function, &grant).unwrap_err();
        assert_eq!(err.entity(), EntityKind::EventSubscription);
    }
}
