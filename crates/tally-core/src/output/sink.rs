use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use orion_error::prelude::*;
use orion_error::{ErrorOwe, ErrorOweBase};
use tally_config::{SinkUri, parse_sink_uri};

use super::OutputRecord;
use crate::error::{CoreReason, CoreResult};

/// Synchronous output destination.
pub trait RecordSink: Send + Sync {
    fn send(&self, record: &OutputRecord) -> CoreResult<()>;
}

/// Appends records as JSON Lines to a file.
pub struct FileRecordSink {
    writer: Mutex<BufWriter<File>>,
}

impl FileRecordSink {
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).owe(CoreReason::Sink)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .owe(CoreReason::Sink)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl RecordSink for FileRecordSink {
    fn send(&self, record: &OutputRecord) -> CoreResult<()> {
        let json = serde_json::to_string(record).owe(CoreReason::Sink)?;
        let mut w = self
            .writer
            .lock()
            .map_err(|_| StructError::from(CoreReason::Sink).with_detail("file sink lock poisoned"))?;
        w.write_all(json.as_bytes()).owe(CoreReason::Sink)?;
        w.write_all(b"\n").owe(CoreReason::Sink)?;
        w.flush().owe(CoreReason::Sink)?;
        Ok(())
    }
}

/// Writes records as JSON Lines to standard output.
pub struct StdoutRecordSink;

impl RecordSink for StdoutRecordSink {
    fn send(&self, record: &OutputRecord) -> CoreResult<()> {
        let json = serde_json::to_string(record).owe(CoreReason::Sink)?;
        let mut out = std::io::stdout().lock();
        writeln!(out, "{json}").owe(CoreReason::Sink)?;
        Ok(())
    }
}

/// Broadcasts records to multiple sinks.
///
/// Continues sending to all sinks even if one fails. Returns the first error
/// encountered, if any.
pub struct FanOutSink {
    sinks: Vec<Box<dyn RecordSink>>,
}

impl FanOutSink {
    pub fn new(sinks: Vec<Box<dyn RecordSink>>) -> Self {
        Self { sinks }
    }
}

impl RecordSink for FanOutSink {
    fn send(&self, record: &OutputRecord) -> CoreResult<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.send(record)
                && first_err.is_none()
            {
                first_err = Some(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Build the fan-out of every configured sink URI. Relative file paths
/// resolve against `base_dir`.
pub fn build_record_sink(uris: &[String], base_dir: &Path) -> CoreResult<FanOutSink> {
    let mut sinks: Vec<Box<dyn RecordSink>> = Vec::with_capacity(uris.len());
    for uri in uris {
        match parse_sink_uri(uri).owe_conf()? {
            SinkUri::Stdout => sinks.push(Box::new(StdoutRecordSink)),
            SinkUri::File(path) => {
                let path = if path.is_relative() {
                    base_dir.join(path)
                } else {
                    path
                };
                sinks.push(Box::new(FileRecordSink::open(path)?));
            }
        }
    }
    Ok(FanOutSink::new(sinks))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{SkipReason, SkippedBucket};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    impl<T: RecordSink> RecordSink for Arc<T> {
        fn send(&self, record: &OutputRecord) -> CoreResult<()> {
            (**self).send(record)
        }
    }

    fn sample(metric: &str) -> OutputRecord {
        OutputRecord::Skipped(SkippedBucket {
            metric_id: metric.into(),
            start_nanos: 0,
            end_nanos: 10,
            bucket_count: 1,
            reason: SkipReason::NoData,
        })
    }

    struct CountingSink {
        count: AtomicUsize,
    }

    impl RecordSink for CountingSink {
        fn send(&self, _record: &OutputRecord) -> CoreResult<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailSink;

    impl RecordSink for FailSink {
        fn send(&self, _record: &OutputRecord) -> CoreResult<()> {
            Err(StructError::from(CoreReason::Sink).with_detail("always fails"))
        }
    }

    #[test]
    fn file_sink_writes_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.jsonl");
        {
            let sink = FileRecordSink::open(&path).unwrap();
            sink.send(&sample("a")).unwrap();
            sink.send(&sample("b")).unwrap();
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.trim().split('\n').collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed["metric_id"], "b");
        assert_eq!(parsed["type"], "skipped");
    }

    #[test]
    fn fan_out_continues_after_failure() {
        let counter = Arc::new(CountingSink {
            count: AtomicUsize::new(0),
        });
        let fan = FanOutSink::new(vec![
            Box::new(FailSink),
            Box::new(counter.clone()),
        ]);
        assert!(fan.send(&sample("a")).is_err());
        assert_eq!(counter.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn build_resolves_relative_file_uris() {
        let dir = tempfile::tempdir().unwrap();
        let sink = build_record_sink(&["file://out/records.jsonl".into()], dir.path()).unwrap();
        sink.send(&sample("a")).unwrap();
        assert!(dir.path().join("out/records.jsonl").exists());
        assert!(build_record_sink(&["kafka://x".into()], dir.path()).is_err());
    }
}
