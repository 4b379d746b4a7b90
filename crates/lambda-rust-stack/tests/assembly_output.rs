use lambda_rust_stack::{
    ArtifactCatalog, AssemblyConfig, AssemblyWriter, Manifest, StackDefinition, StackProps,
    BOOTSTRAP_FILE, DEFAULT_BINARY_NAME, DEFAULT_STACK_ID,
};
use tokio::fs;

async fn scanned_catalog(root: &std::path::Path) -> anyhow::Result<ArtifactCatalog> {
    let dir = root.join(DEFAULT_BINARY_NAME);
    fs::create_dir_all(&dir).await?;
    fs::write(dir.join(BOOTSTRAP_FILE), b"\x7fELF fake bootstrap").await?;
    ArtifactCatalog::scan(root).await
}

#[tokio::test]
async fn scanned_artifact_flows_into_written_assembly() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let catalog = scanned_catalog(&tmp.path().join("target/lambda")).await?;

    let props = StackProps {
        account: Some("123456789012".into()),
        region: Some("eu-central-1".into()),
        ..StackProps::default()
    };
    let description = StackDefinition::new(DEFAULT_STACK_ID, props).define(&catalog)?;

    let config = AssemblyConfig {
        out_dir: tmp.path().join("cdk.out"),
        hmac_key: None,
    };
    let writer = AssemblyWriter::try_new(&config)?;
    let output = writer.write(&description, &catalog).await?;

    assert!(output
        .template_path
        .ends_with("LambdaRustStack.template.json"));

    let template: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&output.template_path).await?)?;
    assert_eq!(template["AWSTemplateFormatVersion"], "2010-09-09");

    let manifest: Manifest =
        serde_json::from_str(&fs::read_to_string(&output.manifest_path).await?)?;
    assert_eq!(manifest, output.manifest);
    assert!(manifest.signature.is_none());

    let stack = &manifest.artifacts[DEFAULT_STACK_ID];
    assert_eq!(stack.artifact_type, "aws:cloudformation:stack");
    assert_eq!(stack.environment, "aws://123456789012/eu-central-1");
    assert_eq!(stack.template_hash, output.template_hash);

    let asset = &manifest.assets[0];
    let record = catalog
        .iter()
        .next()
        .expect("catalog holds the scanned binary");
    assert_eq!(asset.asset_hash, record.asset_hash);
    assert_eq!(asset.object_key, format!("{}.zip", record.asset_hash));
    assert!(asset
        .source_path
        .as_deref()
        .is_some_and(|path| path.ends_with("rust_lambda/bootstrap")));

    Ok(())
}

#[tokio::test]
async fn signed_manifest_verifies_with_configured_key() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let catalog = scanned_catalog(&tmp.path().join("artifacts")).await?;
    let description =
        StackDefinition::new(DEFAULT_STACK_ID, StackProps::default()).define(&catalog)?;

    let config = AssemblyConfig {
        out_dir: tmp.path().join("cdk.out"),
        hmac_key: Some(b"assembly-secret".to_vec()),
    };
    let output = AssemblyWriter::try_new(&config)?
        .write(&description, &catalog)
        .await?;

    let manifest: Manifest =
        serde_json::from_str(&fs::read_to_string(&output.manifest_path).await?)?;
    assert!(manifest.signature.is_some());
    assert!(manifest.verify(b"assembly-secret")?);
    assert!(!manifest.verify(b"wrong-secret")?);

    Ok(())
}

#[tokio::test]
async fn rewriting_the_same_description_is_byte_identical() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let catalog = scanned_catalog(&tmp.path().join("artifacts")).await?;
    let definition = StackDefinition::new(DEFAULT_STACK_ID, StackProps::default());

    let config = AssemblyConfig {
        out_dir: tmp.path().join("cdk.out"),
        hmac_key: Some(b"k".to_vec()),
    };
    let writer = AssemblyWriter::try_new(&config)?;

    let first = writer.write(&definition.define(&catalog)?, &catalog).await?;
    let first_template = fs::read(&first.template_path).await?;
    let first_manifest = fs::read(&first.manifest_path).await?;

    let second = writer.write(&definition.define(&catalog)?, &catalog).await?;
    assert_eq!(fs::read(&second.template_path).await?, first_template);
    assert_eq!(fs::read(&second.manifest_path).await?, first_manifest);

    Ok(())
}
