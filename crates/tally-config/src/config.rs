use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::definitions::DefinitionSet;
use crate::logging::LoggingConfig;
use crate::output::OutputConfig;
use crate::runtime::RuntimeConfig;
use crate::validate;

// ---------------------------------------------------------------------------
// Raw TOML structure (intermediate representation)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TallyConfigRaw {
    /// Glob patterns of definition files, relative to the config directory.
    #[serde(default)]
    include: Vec<String>,
    #[serde(default)]
    runtime: RuntimeConfig,
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default)]
    output: OutputConfig,
    #[serde(flatten)]
    definitions: DefinitionSet,
}

// ---------------------------------------------------------------------------
// TallyConfig (resolved, validated)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TallyConfig {
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
    pub output: OutputConfig,
    /// Inline definitions merged with every included file, in include order.
    pub definitions: DefinitionSet,
    /// Definition files that were merged, for diagnostics.
    pub included: Vec<PathBuf>,
}

impl TallyConfig {
    /// Read and parse a `tally.toml` file. Includes resolve against its directory.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_toml(&content, base_dir)
    }

    /// Parse a TOML string, resolving `include` globs against `base_dir`.
    pub fn from_toml(toml_str: &str, base_dir: &Path) -> anyhow::Result<Self> {
        let raw: TallyConfigRaw = toml::from_str(toml_str)?;

        let mut definitions = raw.definitions;
        let mut included = Vec::new();
        for pattern in &raw.include {
            for file in resolve_glob(pattern, base_dir)? {
                let content = std::fs::read_to_string(&file)
                    .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", file.display()))?;
                let defs: DefinitionSet = toml::from_str(&content)
                    .map_err(|e| anyhow::anyhow!("{}: {e}", file.display()))?;
                definitions.merge(defs);
                included.push(file);
            }
        }

        let config = TallyConfig {
            runtime: raw.runtime,
            logging: raw.logging,
            output: raw.output,
            definitions,
            included,
        };

        validate::validate(&config)?;

        Ok(config)
    }
}

impl FromStr for TallyConfig {
    type Err = anyhow::Error;

    /// Parse with includes resolved against the current directory.
    fn from_str(toml_str: &str) -> anyhow::Result<Self> {
        Self::from_toml(toml_str, Path::new("."))
    }
}

/// Expand a glob pattern relative to `base_dir`, sorted for deterministic
/// merge order. A pattern matching nothing is an error.
pub fn resolve_glob(pattern: &str, base_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let full = if Path::new(pattern).is_absolute() {
        PathBuf::from(pattern)
    } else {
        base_dir.join(pattern)
    };
    let full_str = full.to_string_lossy();
    let mut paths = Vec::new();
    for entry in glob::glob(&full_str)
        .map_err(|e| anyhow::anyhow!("invalid include pattern {pattern:?}: {e}"))?
    {
        paths.push(entry?);
    }
    if paths.is_empty() {
        anyhow::bail!("include pattern {pattern:?} matched no files under {}", base_dir.display());
    }
    paths.sort();
    Ok(paths)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
