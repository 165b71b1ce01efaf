use std::path::{Path, PathBuf};

use async_trait::async_trait;
use orion_error::prelude::*;
use orion_error::ErrorOwe;
use tokio::io::{AsyncWriteExt, BufWriter};

use tally_config::{SinkUri, parse_sink_uri};

use crate::error::{RuntimeReason, RuntimeResult};

/// Asynchronous destination for serialized output records (one JSON
/// document per call).
#[async_trait]
pub trait OutputSink: Send {
    fn name(&self) -> &str;

    async fn send(&mut self, json: &str) -> anyhow::Result<()>;

    /// Flush and release the destination. Called once, after the last send.
    async fn stop(&mut self) -> anyhow::Result<()>;
}

/// Appends JSON lines to a file, flushing after every record.
pub struct FileSink {
    name: String,
    writer: BufWriter<tokio::fs::File>,
}

impl FileSink {
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            name: format!("file://{}", path.display()),
            writer: BufWriter::new(file),
        })
    }
}

#[async_trait]
impl OutputSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&mut self, json: &str) -> anyhow::Result<()> {
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}

pub struct StdoutSink {
    out: tokio::io::Stdout,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            out: tokio::io::stdout(),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutputSink for StdoutSink {
    fn name(&self) -> &str {
        "stdout://"
    }

    async fn send(&mut self, json: &str) -> anyhow::Result<()> {
        self.out.write_all(json.as_bytes()).await?;
        self.out.write_all(b"\n").await?;
        self.out.flush().await?;
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.out.flush().await?;
        Ok(())
    }
}

/// Open every sink named by `uris`. Relative file paths resolve against
/// `base_dir`.
pub async fn build_sinks(
    uris: &[String],
    base_dir: &Path,
) -> RuntimeResult<Vec<Box<dyn OutputSink>>> {
    let mut sinks: Vec<Box<dyn OutputSink>> = Vec::with_capacity(uris.len());
    for uri in uris {
        match parse_sink_uri(uri).owe_conf()? {
            SinkUri::Stdout => sinks.push(Box::new(StdoutSink::new())),
            SinkUri::File(path) => {
                let path = resolve(&path, base_dir);
                let sink = FileSink::open(&path)
                    .await
                    .map_err(|e| {
                        StructError::from(RuntimeReason::Bootstrap)
                            .with_detail(format!("open sink {}: {e}", path.display()))
                    })?;
                sinks.push(Box::new(sink));
            }
        }
    }
    Ok(sinks)
}

fn resolve(path: &Path, base_dir: &Path) -> PathBuf {
    if path.is_relative() {
        base_dir.join(path)
    } else {
        path.to_path_buf()
    }
}
