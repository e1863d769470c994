use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{self, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::config::{ConfigError, LoggingConfig};

/// Structured fields renamed to their dotted attribute names in JSON output.
const RENAMED_FIELDS: &[(&str, &str)] = &[
    ("event_name", "event.name"),
    ("event_domain", "event.domain"),
    ("tab_id", "authsync.tab_id"),
    ("transport", "authsync.transport"),
];

#[derive(Default)]
struct FieldCollector {
    fields: Map<String, Value>,
}

impl Visit for FieldCollector {
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.fields
            .insert(field.name().to_string(), Value::from(format!("{:?}", value)));
    }
}

/// One JSON object per line, shaped like an OpenTelemetry log record.
#[derive(Clone)]
struct JsonLogFormatter {
    resource: Map<String, Value>,
}

impl JsonLogFormatter {
    fn new(config: &LoggingConfig) -> Self {
        let mut resource = Map::new();
        resource.insert("service.name".into(), Value::from(config.service_name.clone()));
        resource.insert(
            "service.version".into(),
            Value::from(config.service_version.clone()),
        );
        JsonLogFormatter { resource }
    }

    fn record(&self, level: &Level, target: &str, mut attributes: Map<String, Value>) -> Value {
        for (from, to) in RENAMED_FIELDS {
            if let Some(v) = attributes.remove(*from) {
                attributes.insert(to.to_string(), v);
            }
        }
        attributes.insert("code.target".into(), Value::from(target));
        let body = match attributes.remove("message") {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };

        let mut root = Map::new();
        root.insert(
            "timestamp".into(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        root.insert("severity_text".into(), Value::from(level.as_str()));
        root.insert("severity_number".into(), Value::from(severity_number(level)));
        root.insert("body".into(), Value::from(body));
        root.insert("resource".into(), Value::Object(self.resource.clone()));
        root.insert("attributes".into(), Value::Object(attributes));
        Value::Object(root)
    }
}

fn severity_number(level: &Level) -> u64 {
    match *level {
        Level::TRACE => 1,
        Level::DEBUG => 5,
        Level::INFO => 9,
        Level::WARN => 13,
        Level::ERROR => 17,
    }
}

impl<S, N> FormatEvent<S, N> for JsonLogFormatter
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let mut collector = FieldCollector::default();
        event.record(&mut collector);

        let record = self.record(metadata.level(), metadata.target(), collector.fields);
        let serialized = serde_json::to_string(&record).map_err(|_| std::fmt::Error)?;
        writeln!(writer, "{}", serialized)
    }
}

fn parse_level(level: &str) -> Result<LevelFilter, ConfigError> {
    match level.trim().to_lowercase().as_str() {
        "trace" => Ok(LevelFilter::TRACE),
        "debug" => Ok(LevelFilter::DEBUG),
        "info" => Ok(LevelFilter::INFO),
        "warn" => Ok(LevelFilter::WARN),
        "error" => Ok(LevelFilter::ERROR),
        "off" => Ok(LevelFilter::OFF),
        _ => Err(ConfigError::Invalid(format!(
            "invalid logging.level '{}', expected one of trace, debug, info, warn, error, off",
            level
        ))),
    }
}

/// Installs the global subscriber. `RUST_LOG` directives are layered on top
/// of the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let level = parse_level(&config.level)?;
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let installed = match config.format.to_lowercase().as_str() {
        "json" => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().event_format(JsonLogFormatter::new(config)))
            .try_init(),
        "console" => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init(),
        other => {
            return Err(ConfigError::Invalid(format!(
                "invalid logging.format '{}', expected json or console",
                other
            )))
        }
    };
    installed.map_err(|e| ConfigError::Invalid(format!("logging already initialised: {}", e)))
}
