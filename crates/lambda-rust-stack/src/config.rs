use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use lambda_stack_model::resources::{MAX_MEMORY_MB, MAX_TIMEOUT_SECONDS, MIN_MEMORY_MB};
use lambda_stack_model::{Architecture, DefinitionError, EntityKind};
use tracing::warn;

use crate::assembly::AssemblyConfig;
use crate::StackProps;

pub const ENV_ACCOUNT: &str = "CDK_DEFAULT_ACCOUNT";
pub const ENV_REGION: &str = "CDK_DEFAULT_REGION";
pub const ENV_STACK_NAME: &str = "LAMBDA_STACK_NAME";
pub const ENV_DESCRIPTION: &str = "LAMBDA_STACK_DESCRIPTION";
pub const ENV_TAGS: &str = "LAMBDA_STACK_TAGS";
pub const ENV_BOOTSTRAP_QUALIFIER: &str = "LAMBDA_STACK_BOOTSTRAP_QUALIFIER";
pub const ENV_BINARY: &str = "LAMBDA_STACK_BINARY";
pub const ENV_MEMORY_MB: &str = "LAMBDA_STACK_MEMORY_MB";
pub const ENV_TIMEOUT_SECONDS: &str = "LAMBDA_STACK_TIMEOUT_SECONDS";
pub const ENV_ARCHITECTURE: &str = "LAMBDA_STACK_ARCHITECTURE";
pub const ENV_ARTIFACT_DIR: &str = "LAMBDA_STACK_ARTIFACT_DIR";
pub const ENV_OUT_DIR: &str = "LAMBDA_STACK_OUT_DIR";
pub const ENV_HMAC_KEY: &str = "LAMBDA_STACK_ASSEMBLY_HMAC_KEY";

const DEFAULT_ARTIFACT_DIR: &str = "./target/lambda";

/// Everything needed to evaluate and hand off the stack, read from the
/// process environment.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub props: StackProps,
    pub artifact_root: PathBuf,
    pub assembly: AssemblyConfig,
    /// Recoverable problems (out-of-range values that were clamped or ignored).
    pub warnings: Vec<String>,
}

impl EnvConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self::from_lookup(|key| env::var(key).ok())?;
        for message in &config.warnings {
            warn!("{message}");
        }
        Ok(config)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };
        let mut warnings = Vec::new();
        let mut props = StackProps::default();

        props.account = value(ENV_ACCOUNT);
        props.region = value(ENV_REGION);
        props.stack_name = value(ENV_STACK_NAME);
        props.description = value(ENV_DESCRIPTION);
        if let Some(qualifier) = value(ENV_BOOTSTRAP_QUALIFIER) {
            props.bootstrap_qualifier = qualifier;
        }
        if let Some(binary) = value(ENV_BINARY) {
            props.binary_name = binary;
        }
        if let Some(raw) = value(ENV_TAGS) {
            props.tags = parse_tags(&raw)?;
        }
        if let Some(raw) = value(ENV_ARCHITECTURE) {
            props.function.architecture = raw.parse::<Architecture>()?;
        }

        let (memory, warning) = parse_bounded(
            ENV_MEMORY_MB,
            lookup(ENV_MEMORY_MB).as_deref(),
            props.function.memory_size_mb,
            MIN_MEMORY_MB,
            MAX_MEMORY_MB,
        );
        props.function.memory_size_mb = memory;
        warnings.extend(warning);

        let (timeout, warning) = parse_bounded(
            ENV_TIMEOUT_SECONDS,
            lookup(ENV_TIMEOUT_SECONDS).as_deref(),
            props.function.timeout_seconds,
            1,
            MAX_TIMEOUT_SECONDS,
        );
        props.function.timeout_seconds = timeout;
        warnings.extend(warning);

        let artifact_root = value(ENV_ARTIFACT_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACT_DIR));

        let mut assembly = AssemblyConfig::default();
        if let Some(dir) = value(ENV_OUT_DIR) {
            assembly.out_dir = PathBuf::from(dir);
        }
        if let Some(encoded) = value(ENV_HMAC_KEY) {
            let key = STANDARD
                .decode(encoded.as_bytes())
                .with_context(|| format!("{ENV_HMAC_KEY} must be base64 encoded"))?;
            assembly.hmac_key = Some(key);
        }

        Ok(Self {
            props,
            artifact_root,
            assembly,
            warnings,
        })
    }
}

/// Parses `key=value` pairs separated by commas.
pub fn parse_tags(raw: &str) -> Result<BTreeMap<String, String>, DefinitionError> {
    let mut tags = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(DefinitionError::invalid_setting(
                EntityKind::Stack,
                format!("tag '{pair}' is not of the form key=value"),
            ));
        };
        tags.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(tags)
}

/// Parses an integer setting, falling back to `default` on garbage and
/// clamping values outside `min..=max`. Returns the warning to surface, if any.
pub fn parse_bounded(
    name: &str,
    raw: Option<&str>,
    default: u32,
    min: u32,
    max: u32,
) -> (u32, Option<String>) {
    match raw {
        None => (default, None),
        Some(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return (
                    default,
                    Some(format!("{name} is empty; defaulting to {default}")),
                );
            }

            match trimmed.parse::<u64>() {
                Ok(parsed) => {
                    if (min as u64..=max as u64).contains(&parsed) {
                        (parsed as u32, None)
                    } else {
                        let clamped = parsed.clamp(min as u64, max as u64) as u32;
                        (
                            clamped,
                            Some(format!(
                                "{name}={trimmed} outside {min}..={max}; clamped to {clamped}"
                            )),
                        )
                    }
                }
                Err(_) => (
                    default,
                    Some(format!(
                        "{name}='{trimmed}' is not a valid integer; defaulting to {default}"
                    )),
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn parse_valid_bounded_value() {
        assert_eq!(parse_bounded("MEM", Some("512"), 128, 128, 10_240), (512, None));
        assert_eq!(parse_bounded("MEM", None, 128, 128, 10_240), (128, None));
    }

    #[test]
    fn parse_out_of_bounds_value() {
        let (value, warning) = parse_bounded("MEM", Some("64"), 128, 128, 10_240);
        assert_eq!(value, 128);
        assert!(warning
            .unwrap()
            .contains("MEM=64 outside 128..=10240; clamped to 128"));
    }

    #[test]
    fn parse_invalid_bounded_value() {
        let (value, warning) = parse_bounded("TIMEOUT", Some("abc"), 3, 1, 900);
        assert_eq!(value, 3);
        assert!(warning
            .unwrap()
            .contains("TIMEOUT='abc' is not a valid integer"));
    }

    #[test]
    fn parse_empty_bounded_value() {
        let (value, warning) = parse_bounded("TIMEOUT", Some("  "), 3, 1, 900);
        assert_eq!(value, 3);
        assert!(warning.unwrap().contains("TIMEOUT is empty; defaulting to 3"));
    }

    #[test]
    fn defaults_without_environment() {
        let config = EnvConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.props, StackProps::default());
        assert_eq!(config.artifact_root, PathBuf::from(DEFAULT_ARTIFACT_DIR));
        assert!(config.assembly.hmac_key.is_none());
        assert!(config.warnings.is_empty());
    }

    #[test]
    fn reads_stack_settings() {
        let config = EnvConfig::from_lookup(lookup(&[
            (ENV_ACCOUNT, "123456789012"),
            (ENV_REGION, "eu-west-1"),
            (ENV_TAGS, "team=storage, env = dev"),
            (ENV_ARCHITECTURE, "arm64"),
            (ENV_MEMORY_MB, "20000"),
            (ENV_OUT_DIR, "/tmp/assembly"),
            (ENV_HMAC_KEY, "c3VwZXItc2VjcmV0"),
        ]))
        .unwrap();

        assert_eq!(config.props.account.as_deref(), Some("123456789012"));
        assert_eq!(config.props.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.props.tags["env"], "dev");
        assert_eq!(config.props.tags["team"], "storage");
        assert_eq!(config.props.function.architecture, Architecture::Arm64);
        assert_eq!(config.props.function.memory_size_mb, MAX_MEMORY_MB);
        assert_eq!(config.warnings.len(), 1);
        assert_eq!(config.assembly.out_dir, PathBuf::from("/tmp/assembly"));
        assert_eq!(config.assembly.hmac_key.as_deref(), Some(&b"super-secret"[..]));
    }

    #[test]
    fn malformed_values_are_errors() {
        assert!(EnvConfig::from_lookup(lookup(&[(ENV_TAGS, "no-separator")])).is_err());
        assert!(EnvConfig::from_lookup(lookup(&[(ENV_ARCHITECTURE, "mips")])).is_err());
        assert!(EnvConfig::from_lookup(lookup(&[(ENV_HMAC_KEY, "***")])).is_err());
    }

    #[test]
    fn blank_hmac_key_leaves_manifest_unsigned() {
        let config = EnvConfig::from_lookup(lookup(&[(ENV_HMAC_KEY, "   ")])).unwrap();
        assert!(config.assembly.hmac_key.is_none());
    }
}
