use std::fmt::{self as stdfmt, Write as _};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::{DefaultFields, Writer};
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::{self, FmtContext, FormatEvent, FormatFields, FormattedFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use tally_config::{LogFormat, LoggingConfig};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Separate field formatter for the file layer so span fields cached by the
/// console layer (with ANSI codes) never leak into the log file.
#[derive(Default)]
pub struct FileFields(DefaultFields);

impl<'writer> FormatFields<'writer> for FileFields {
    fn format_fields<R: tracing_subscriber::field::RecordFields>(
        &self,
        writer: Writer<'writer>,
        fields: R,
    ) -> stdfmt::Result {
        self.0.format_fields(writer, fields)
    }
}

/// Plain-text event formatter that lifts the `domain` field into a prefix:
///
/// ```text
/// 2026-03-02T09:12:44Z  INFO [pipe] bucket flushed metric="screen_on" records=2
/// ```
///
/// Events without a domain (dependencies) print without the prefix.
pub struct DomainFormat {
    timer: SystemTime,
}

impl DomainFormat {
    pub fn new() -> Self {
        Self { timer: SystemTime }
    }
}

impl Default for DomainFormat {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes `text` wrapped in an SGR sequence when the writer supports ANSI.
fn paint(w: &mut Writer<'_>, ansi: bool, sgr: &str, text: impl stdfmt::Display) -> stdfmt::Result {
    if ansi {
        write!(w, "\x1b[{sgr}m{text}\x1b[0m")
    } else {
        write!(w, "{text}")
    }
}

fn level_color(level: Level) -> &'static str {
    match level {
        Level::ERROR => "31",
        Level::WARN => "33",
        Level::INFO => "32",
        Level::DEBUG => "34",
        Level::TRACE => "35",
    }
}

impl<S, N> FormatEvent<S, N> for DomainFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        let ansi = writer.has_ansi_escapes();

        let mut ts = String::new();
        if self.timer.format_time(&mut Writer::new(&mut ts)).is_err() {
            ts.push_str("<unknown time>");
        }
        paint(&mut writer, ansi, "2", ts)?;

        let level = *event.metadata().level();
        write!(writer, " ")?;
        paint(&mut writer, ansi, level_color(level), format_args!("{level:>5}"))?;
        write!(writer, " ")?;

        let mut fields = DomainExtractor::default();
        event.record(&mut fields);

        if let Some(domain) = &fields.domain {
            paint(&mut writer, ansi, "1;36", format_args!("[{domain}]"))?;
            write!(writer, " ")?;
        }

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                paint(&mut writer, ansi, "1", span.name())?;
                let ext = span.extensions();
                match ext.get::<FormattedFields<N>>() {
                    Some(f) if !f.is_empty() => write!(writer, "{{{f}}}: ")?,
                    _ => write!(writer, "{{}}: ")?,
                }
            }
        }

        write!(writer, "{}", fields.message)?;
        if !fields.rest.is_empty() {
            write!(writer, " ")?;
            paint(&mut writer, ansi, "3", &fields.rest)?;
        }
        writeln!(writer)
    }
}

/// Splits an event into domain, message and the remaining `k=v` pairs.
#[derive(Default)]
struct DomainExtractor {
    domain: Option<String>,
    message: String,
    rest: String,
}

impl DomainExtractor {
    fn push(&mut self, name: &str, value: impl stdfmt::Display) {
        if !self.rest.is_empty() {
            self.rest.push(' ');
        }
        let _ = write!(self.rest, "{name}={value}");
    }
}

impl Visit for DomainExtractor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "domain" => self.domain = Some(value.to_string()),
            "message" => self.message = value.to_string(),
            name => self.push(name, format_args!("{value:?}")),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn stdfmt::Debug) {
        match field.name() {
            "domain" => {
                self.domain = Some(format!("{value:?}").trim_matches('"').to_string());
            }
            "message" => {
                let _ = write!(self.message, "{value:?}");
            }
            name => self.push(name, format_args!("{value:?}")),
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field.name(), value);
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field.name(), value);
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push(field.name(), value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field.name(), value);
    }
}

/// `RUST_LOG` wins over the configured level and module overrides.
fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if std::env::var("RUST_LOG").is_ok() {
        return Ok(EnvFilter::from_default_env());
    }
    let mut directives = config.level.clone();
    let mut modules: Vec<_> = config.modules.iter().collect();
    modules.sort();
    for (module, level) in modules {
        let _ = write!(directives, ",{module}={level}");
    }
    EnvFilter::try_new(&directives).map_err(|e| anyhow!("invalid log filter '{directives}': {e}"))
}

fn resolve_log_path(file: &Path, base_dir: &Path) -> PathBuf {
    if file.is_relative() {
        base_dir.join(file)
    } else {
        file.to_path_buf()
    }
}

fn console_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Plain => fmt::layer()
            .event_format(DomainFormat::new())
            .with_writer(std::io::stderr)
            .boxed(),
    }
}

fn file_layer(format: LogFormat, path: &Path) -> Result<(BoxedLayer, WorkerGuard)> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("log file path has no parent directory"))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create log directory {}", dir.display()))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("log file path has no file name"))?
        .to_os_string();

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    let layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .fmt_fields(FileFields::default())
            .with_target(false)
            .with_ansi(false)
            .with_writer(writer)
            .boxed(),
        LogFormat::Plain => fmt::layer()
            .event_format(DomainFormat::new())
            .fmt_fields(FileFields::default())
            .with_ansi(false)
            .with_writer(writer)
            .boxed(),
    };
    Ok((layer, guard))
}

/// Install the global `tracing` subscriber described by `config`.
///
/// The returned [`WorkerGuard`] (present when a log file is configured) must
/// be held until exit; dropping it flushes the file writer. `log` records
/// from `tally-core` are bridged by `tracing-subscriber`'s `tracing-log`
/// feature.
pub fn init_tracing(config: &LoggingConfig, base_dir: &Path) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(config)?;

    let mut layers: Vec<BoxedLayer> = vec![console_layer(config.format)];
    let mut guard = None;
    if let Some(file) = &config.file {
        let (layer, g) = file_layer(config.format, &resolve_log_path(file, base_dir))?;
        layers.push(layer);
        guard = Some(g);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| anyhow!("tracing subscriber already installed: {e}"))?;
    Ok(guard)
}
