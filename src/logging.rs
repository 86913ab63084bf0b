//! Structured session logging.
//!
//! Sessions report what they swallow or decide (stale fragments dropped, a
//! closed surface, a failure rendered) as [`ExplainLogRecord`]s. A host can
//! capture them with a [`LogCallback`]; otherwise they are printed to stderr.
//! Lower layers (stream decoding, HTTP, browser) use the `log` facade directly.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Verbosity;

pub type LogCallback = Arc<dyn Fn(&ExplainLogRecord) + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Info,
    Debug,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Subsystem a record comes from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    Session,
    Export,
}

impl LogCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            LogCategory::Session => "session",
            LogCategory::Export => "export",
        }
    }
}

impl Verbosity {
    /// Errors always pass; `Minimal` drops info, `Medium` drops debug.
    pub fn allows(self, level: LogLevel) -> bool {
        match self {
            Verbosity::Minimal => level == LogLevel::Error,
            Verbosity::Medium => level <= LogLevel::Info,
            Verbosity::Detailed => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExplainLogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub category: LogCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,
}

impl fmt::Display for ExplainLogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:<5} {}: {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.level.label(),
            self.category.as_str(),
            self.message
        )?;
        match &self.fields {
            Some(fields) if !fields.is_null() => write!(f, " {fields}"),
            _ => Ok(()),
        }
    }
}

/// Print to stderr; used when no callback is installed.
pub fn stderr_log_handler(record: &ExplainLogRecord) {
    eprintln!("{record}");
}

/// Forward to the `log` facade so `env_logger` filters and formats.
pub fn log_facade_handler(record: &ExplainLogRecord) {
    let level = match record.level {
        LogLevel::Error => log::Level::Error,
        LogLevel::Info => log::Level::Info,
        LogLevel::Debug => log::Level::Debug,
    };
    let target = format!("zsxq_explain::{}", record.category.as_str());
    match &record.fields {
        Some(fields) if !fields.is_null() => {
            log::log!(target: target.as_str(), level, "{} {fields}", record.message)
        }
        _ => log::log!(target: target.as_str(), level, "{}", record.message),
    }
}

#[derive(Clone)]
pub struct ExplainLogger {
    verbosity: Verbosity,
    sink: LogCallback,
    external: bool,
}

impl fmt::Debug for ExplainLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExplainLogger")
            .field("verbosity", &self.verbosity)
            .field("external", &self.external)
            .finish()
    }
}

impl Default for ExplainLogger {
    fn default() -> Self {
        Self::new(Verbosity::default(), None)
    }
}

impl ExplainLogger {
    /// Logger writing to `callback`, or to stderr when there is none.
    pub fn new(verbosity: Verbosity, callback: Option<LogCallback>) -> Self {
        let external = callback.is_some();
        Self {
            verbosity,
            sink: callback.unwrap_or_else(|| Arc::new(stderr_log_handler)),
            external,
        }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn log(
        &self,
        level: LogLevel,
        category: LogCategory,
        message: impl Into<String>,
        fields: Option<Value>,
    ) {
        if !self.verbosity.allows(level) {
            return;
        }
        let record = ExplainLogRecord {
            timestamp: Utc::now(),
            level,
            category,
            message: message.into(),
            fields,
        };
        (self.sink)(&record);
    }

    pub fn error(&self, category: LogCategory, message: impl Into<String>, fields: Option<Value>) {
        self.log(LogLevel::Error, category, message, fields);
    }

    pub fn info(&self, category: LogCategory, message: impl Into<String>, fields: Option<Value>) {
        self.log(LogLevel::Info, category, message, fields);
    }

    pub fn debug(&self, category: LogCategory, message: impl Into<String>, fields: Option<Value>) {
        self.log(LogLevel::Debug, category, message, fields);
    }
}
