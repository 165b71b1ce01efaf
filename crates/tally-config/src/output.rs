use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Record destinations (URI list, e.g. `"file:///var/tmp/buckets.jsonl"`).
    pub sinks: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sinks: vec!["stdout://".to_string()],
        }
    }
}

/// Parsed sink destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkUri {
    Stdout,
    File(PathBuf),
}

pub fn parse_sink_uri(uri: &str) -> anyhow::Result<SinkUri> {
    if uri == "stdout://" || uri == "-" {
        return Ok(SinkUri::Stdout);
    }
    if let Some(path) = uri.strip_prefix("file://") {
        if path.is_empty() {
            anyhow::bail!("file sink URI has an empty path: {uri:?}");
        }
        return Ok(SinkUri::File(PathBuf::from(path)));
    }
    anyhow::bail!("unsupported sink URI {uri:?} (expected stdout:// or file://<path>)")
}
