use std::collections::BTreeMap;
use std::fs as std_fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use lambda_stack_model::StackDescription;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{info, instrument};

use crate::artifacts::ArtifactCatalog;

type HmacSha256 = Hmac<Sha256>;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const MANIFEST_VERSION: &str = "1.0.0";
const STACK_ARTIFACT_TYPE: &str = "aws:cloudformation:stack";

#[derive(Debug, Clone)]
pub struct AssemblyConfig {
    pub out_dir: PathBuf,
    pub hmac_key: Option<Vec<u8>>,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("./cdk.out"),
            hmac_key: None,
        }
    }
}

/// Manifest the provisioning engine reads to locate templates and assets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: String,
    pub artifacts: BTreeMap<String, StackArtifact>,
    pub assets: Vec<AssetEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackArtifact {
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub environment: String,
    pub properties: StackArtifactProperties,
    pub template_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackArtifactProperties {
    pub template_file: String,
    pub stack_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetEntry {
    pub binary_name: String,
    pub asset_hash: String,
    pub bucket: String,
    pub object_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
}

impl Manifest {
    /// Checks the signature against `key`. Unsigned manifests never verify.
    pub fn verify(&self, key: &[u8]) -> Result<bool> {
        let Some(signature) = self.signature.as_deref() else {
            return Ok(false);
        };
        let Ok(decoded) = STANDARD_NO_PAD.decode(signature.as_bytes()) else {
            return Ok(false);
        };
        let mac = keyed_mac(&self.unsigned(), key)?;
        Ok(mac.verify_slice(&decoded).is_ok())
    }

    fn unsigned(&self) -> Self {
        Self {
            signature: None,
            ..self.clone()
        }
    }
}

/// Paths and hashes of a written assembly.
#[derive(Debug, Clone)]
pub struct AssemblyOutput {
    pub dir: PathBuf,
    pub template_path: PathBuf,
    pub manifest_path: PathBuf,
    pub template_hash: String,
    pub manifest: Manifest,
}

/// Writes stack descriptions into a cloud assembly directory.
#[derive(Debug)]
pub struct AssemblyWriter {
    out_dir: PathBuf,
    hmac_key: Option<Vec<u8>>,
}

impl AssemblyWriter {
    pub fn try_new(config: &AssemblyConfig) -> Result<Self> {
        if config.hmac_key.as_ref().is_some_and(|key| key.is_empty()) {
            return Err(anyhow!("configured assembly HMAC key is empty"));
        }

        std_fs::create_dir_all(&config.out_dir).with_context(|| {
            format!("creating assembly directory {}", config.out_dir.display())
        })?;

        Ok(Self {
            out_dir: config.out_dir.clone(),
            hmac_key: config.hmac_key.clone(),
        })
    }

    /// Writes the template, then the manifest. The manifest is written last so
    /// its presence marks a complete assembly.
    #[instrument(skip_all, fields(stack = %description.metadata().stack_name))]
    pub async fn write(
        &self,
        description: &StackDescription,
        artifacts: &ArtifactCatalog,
    ) -> Result<AssemblyOutput> {
        let metadata = description.metadata();
        let template = description.render();
        let template_bytes =
            serde_json::to_vec_pretty(&template).context("serializing stack template")?;
        let template_hash = format!("{:x}", Sha256::digest(&template_bytes));

        let template_file = format!("{}.template.json", metadata.stack_name);
        let template_path = self.out_dir.join(&template_file);
        fs::write(&template_path, &template_bytes)
            .await
            .with_context(|| format!("writing template {}", template_path.display()))?;

        let artifact = description.compute().artifact();
        let source_path = artifacts
            .get(artifact.binary_name())
            .map(|record| record.path.display().to_string());
        let asset = AssetEntry {
            binary_name: artifact.binary_name().to_string(),
            asset_hash: artifact.asset_hash().to_string(),
            bucket: format!(
                "cdk-{}-assets-${{AWS::AccountId}}-${{AWS::Region}}",
                metadata.bootstrap_qualifier
            ),
            object_key: artifact.object_key(),
            source_path,
        };

        let stack_artifact = StackArtifact {
            artifact_type: STACK_ARTIFACT_TYPE.to_string(),
            environment: metadata.environment(),
            properties: StackArtifactProperties {
                template_file,
                stack_name: metadata.stack_name.to_string(),
                parameters: template.parameters.keys().cloned().collect(),
            },
            template_hash: template_hash.clone(),
        };

        let mut manifest = Manifest {
            version: MANIFEST_VERSION.to_string(),
            artifacts: BTreeMap::from([(metadata.id.to_string(), stack_artifact)]),
            assets: vec![asset],
            signature: None,
        };
        if let Some(key) = &self.hmac_key {
            manifest.signature = Some(sign(&manifest, key)?);
        }

        let manifest_bytes =
            serde_json::to_vec_pretty(&manifest).context("serializing assembly manifest")?;
        let manifest_path = self.out_dir.join(MANIFEST_FILE);
        fs::write(&manifest_path, &manifest_bytes)
            .await
            .with_context(|| format!("writing manifest {}", manifest_path.display()))?;

        info!(
            dir = %self.out_dir.display(),
            %template_hash,
            signed = manifest.signature.is_some(),
            "cloud assembly written"
        );

        Ok(AssemblyOutput {
            dir: self.out_dir.clone(),
            template_path,
            manifest_path,
            template_hash,
            manifest,
        })
    }
}

fn sign(manifest: &Manifest, key: &[u8]) -> Result<String> {
    let mac = keyed_mac(manifest, key)?;
    Ok(STANDARD_NO_PAD.encode(mac.finalize().into_bytes()))
}

fn keyed_mac(manifest: &Manifest, key: &[u8]) -> Result<HmacSha256> {
    let payload = serde_json::to_vec(manifest).context("serializing manifest payload")?;
    let mut mac =
        HmacSha256::new_from_slice(key).context("initializing HMAC for assembly manifest")?;
    mac.update(&payload);
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_manifest_never_verifies() {
        let manifest = Manifest {
            version: MANIFEST_VERSION.to_string(),
            artifacts: BTreeMap::new(),
            assets: Vec::new(),
            signature: None,
        };
        assert!(!manifest.verify(b"key").unwrap());
    }

    #[test]
    fn signature_covers_manifest_contents() {
        let mut manifest = Manifest {
            version: MANIFEST_VERSION.to_string(),
            artifacts: BTreeMap::new(),
            assets: Vec::new(),
            signature: None,
        };
        manifest.signature = Some(sign(&manifest, b"super-secret").unwrap());
        assert!(manifest.verify(b"super-secret").unwrap());
        assert!(!manifest.verify(b"other-secret").unwrap());

        manifest.version = "2.0.0".into();
        assert!(!manifest.verify(b"super-secret").unwrap());
    }

    #[test]
    fn tampered_or_garbled_signature_does_not_verify() {
        let mut manifest = Manifest {
            version: MANIFEST_VERSION.to_string(),
            artifacts: BTreeMap::new(),
            assets: Vec::new(),
            signature: None,
        };
        let signature = sign(&manifest, b"super-secret").unwrap();

        let mut flipped = signature.clone().into_bytes();
        flipped[0] = if flipped[0] == b'A' { b'B' } else { b'A' };
        manifest.signature = Some(String::from_utf8(flipped).unwrap());
        assert!(!manifest.verify(b"super-secret").unwrap());

        manifest.signature = Some("not base64 at all!".into());
        assert!(!manifest.verify(b"super-secret").unwrap());

        manifest.signature = Some(signature[..signature.len() - 4].to_string());
        assert!(!manifest.verify(b"super-secret").unwrap());
    }

    #[test]
    fn try_new_creates_output_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let out_dir = tmp.path().join("nested").join("cdk.out");
        let config = AssemblyConfig {
            out_dir: out_dir.clone(),
            hmac_key: None,
        };
        AssemblyWriter::try_new(&config).unwrap();
        assert!(out_dir.is_dir());
    }

    #[test]
    fn empty_hmac_key_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let config = AssemblyConfig {
            out_dir: tmp.path().join("cdk.out"),
            hmac_key: Some(Vec::new()),
        };
        let err = AssemblyWriter::try_new(&config).unwrap_err();
        assert!(err.to_string().contains("HMAC key is empty"));
    }
}
