use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lambda_stack_model::{ArtifactRef, BinaryName, DefinitionError};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, instrument, warn};

/// Executable name the build pipeline places in each artifact directory.
pub const BOOTSTRAP_FILE: &str = "bootstrap";

const HASH_CHUNK_BYTES: usize = 64 * 1024;

/// Resolves artifact references to already-built binaries at definition time.
/// A returned reference must name the binary that was asked for.
pub trait ArtifactResolver {
    fn resolve(&self, name: &BinaryName) -> Option<ArtifactRef>;
}

/// A pre-built binary found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub binary_name: BinaryName,
    pub path: PathBuf,
    pub asset_hash: String,
    pub size_bytes: u64,
}

impl ArtifactRecord {
    pub fn artifact_ref(&self) -> Result<ArtifactRef, DefinitionError> {
        ArtifactRef::new(self.binary_name.clone(), self.asset_hash.as_str())
    }
}

/// Index of the binaries under `<root>/<binary>/bootstrap`.
#[derive(Debug, Clone)]
pub struct ArtifactCatalog {
    root: PathBuf,
    entries: BTreeMap<BinaryName, ArtifactRecord>,
}

impl ArtifactCatalog {
    pub fn empty(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Walks the artifact root and hashes every bootstrap binary. A missing
    /// root yields an empty catalog.
    #[instrument(skip_all, fields(root = %root.as_ref().display()))]
    pub async fn scan(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let mut catalog = Self::empty(root);

        let mut dir = match fs::read_dir(root).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!("artifact root does not exist; no binaries available");
                return Ok(catalog);
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading artifact root {}", root.display()))
            }
        };

        while let Some(entry) = dir
            .next_entry()
            .await
            .with_context(|| format!("listing artifact root {}", root.display()))?
        {
            let file_type = entry
                .file_type()
                .await
                .with_context(|| format!("inspecting {}", entry.path().display()))?;
            if !file_type.is_dir() {
                continue;
            }

            let dir_name = entry.file_name().to_string_lossy().into_owned();
            let binary_name = match BinaryName::new(dir_name.as_str()) {
                Ok(name) => name,
                Err(err) => {
                    debug!(directory = %dir_name, error = %err, "skipping non-artifact directory");
                    continue;
                }
            };

            let path = entry.path().join(BOOTSTRAP_FILE);
            let metadata = match fs::metadata(&path).await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("inspecting {}", path.display()))
                }
            };

            if metadata.len() == 0 {
                warn!(binary = %binary_name, path = %path.display(), "ignoring empty bootstrap binary");
                continue;
            }

            let asset_hash = hash_file(&path).await?;
            debug!(binary = %binary_name, %asset_hash, "artifact indexed");
            catalog
                .insert(ArtifactRecord {
                    binary_name,
                    path,
                    asset_hash,
                    size_bytes: metadata.len(),
                })
                .context("indexing scanned artifact")?;
        }

        info!(artifacts = catalog.len(), "artifact catalog ready");
        Ok(catalog)
    }

    /// Registers (or replaces) a record. Records whose hash is not a
    /// lowercase hex SHA-256 digest are rejected.
    pub fn insert(&mut self, record: ArtifactRecord) -> Result<(), DefinitionError> {
        record.artifact_ref()?;
        self.entries.insert(record.binary_name.clone(), record);
        Ok(())
    }

    pub fn get(&self, name: &BinaryName) -> Option<&ArtifactRecord> {
        self.entries.get(name)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArtifactRecord> {
        self.entries.values()
    }
}

impl ArtifactResolver for ArtifactCatalog {
    fn resolve(&self, name: &BinaryName) -> Option<ArtifactRef> {
        self.get(name)
            .and_then(|record| record.artifact_ref().ok())
    }
}

/// Lowercase hex SHA-256 of the file contents.
pub(crate) async fn hash_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_BYTES];
    loop {
        let read = file
            .read(&mut buf)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // sha256("hello")
    const HELLO_HASH: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    async fn write_bootstrap(root: &Path, binary: &str, contents: &[u8]) {
        let dir = root.join(binary);
        fs::create_dir_all(&dir).await.unwrap();
        fs::write(dir.join(BOOTSTRAP_FILE), contents).await.unwrap();
    }

    #[tokio::test]
    async fn scan_indexes_bootstrap_binaries() {
        let tmp = tempfile::tempdir().unwrap();
        write_bootstrap(tmp.path(), "rust_lambda", b"hello").await;

        let catalog = ArtifactCatalog::scan(tmp.path()).await.unwrap();
        assert_eq!(catalog.len(), 1);

        let name = BinaryName::new("rust_lambda").unwrap();
        let record = catalog.get(&name).unwrap();
        assert_eq!(record.asset_hash, HELLO_HASH);
        assert_eq!(record.size_bytes, 5);
        assert_eq!(catalog.resolve(&name).unwrap().asset_hash(), HELLO_HASH);
    }

    #[test]
    fn insert_rejects_malformed_hash() {
        let mut catalog = ArtifactCatalog::empty("target/lambda");
        let name = BinaryName::new("rust_lambda").unwrap();
        let err = catalog
            .insert(ArtifactRecord {
                binary_name: name.clone(),
                path: PathBuf::from("target/lambda/rust_lambda/bootstrap"),
                asset_hash: String::new(),
                size_bytes: 5,
            })
            .unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidIdentifier { .. }));
        assert!(catalog.is_empty());
        assert!(catalog.resolve(&name).is_none());
    }

    #[tokio::test]
    async fn scan_skips_empty_and_malformed_entries() {
        let tmp = tempfile::tempdir().unwrap();
        write_bootstrap(tmp.path(), "empty_lambda", b"").await;
        write_bootstrap(tmp.path(), "not a binary", b"hello").await;
        fs::create_dir_all(tmp.path().join("no_bootstrap"))
            .await
            .unwrap();
        fs::write(tmp.path().join("stray-file"), b"x").await.unwrap();

        let catalog = ArtifactCatalog::scan(tmp.path()).await.unwrap();
        assert!(catalog.is_empty());
    }

    #[tokio::test]
    async fn missing_root_yields_empty_catalog() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = ArtifactCatalog::scan(tmp.path().join("target/lambda"))
            .await
            .unwrap();
        assert!(catalog.is_empty());
        assert!(catalog
            .resolve(&BinaryName::new("rust_lambda").unwrap())
            .is_none());
    }

    #[tokio::test]
    async fn hash_spans_multiple_chunks() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("large");
        let contents = vec![7u8; HASH_CHUNK_BYTES * 2 + 13];
        fs::write(&path, &contents).await.unwrap();

        let expected = format!("{:x}", Sha256::digest(&contents));
        assert_eq!(hash_file(&path).await.unwrap(), expected);
    }
}
