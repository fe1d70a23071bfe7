// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Records and completed batches.
//!
//! A [`Record`] is one normalized log line. Records are immutable once built
//! and are moved into the rotation loop by [`crate::rotator::RotatorHandle`].
//! A [`Batch`] is the sealed, ordered group handed to the outputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Field names the hook lifts out of the field set into [`Record::trace_id`].
const TRACE_ID_FIELDS: [&str; 2] = ["traceID", "trace_id"];

/// Severity of a record, following the host logger's ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    #[serde(rename = "dpanic")]
    DPanic,
    Panic,
    Fatal,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::DPanic => "dpanic",
            Level::Panic => "panic",
            Level::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown level: {0}")]
pub struct ParseLevelError(String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            "dpanic" => Ok(Level::DPanic),
            "panic" => Ok(Level::Panic),
            "fatal" => Ok(Level::Fatal),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// One unit of telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Capture time, microseconds since the Unix epoch.
    #[serde(rename = "t")]
    pub timestamp_micros: i64,
    pub level: Level,
    #[serde(rename = "msg", default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Source location, e.g. `src/main.rs:42`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,
}

impl Record {
    /// Builds a record stamped with the current time.
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            timestamp_micros: now_micros(),
            level,
            message: message.into(),
            fields: BTreeMap::new(),
            trace_id: None,
            line: None,
        }
    }

    /// Builds a record from a raw field set, lifting the trace identifier out
    /// of the fields.
    pub fn from_fields<I, K, V>(level: Level, message: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut record = Self::new(level, message);
        for (key, value) in fields {
            let key = key.into();
            let value = value.into();
            if TRACE_ID_FIELDS.contains(&key.as_str()) {
                if !value.is_empty() {
                    record.trace_id = Some(value);
                }
                continue;
            }
            record.fields.insert(key, value);
        }
        record
    }

    #[must_use]
    pub fn with_timestamp_micros(mut self, micros: i64) -> Self {
        self.timestamp_micros = micros;
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    #[must_use]
    pub fn with_line(mut self, line: impl Into<String>) -> Self {
        self.line = Some(line.into());
        self
    }

    /// Capture time as a UTC date-time. Out of range values fall back to the
    /// epoch.
    pub fn timestamp(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.timestamp_micros).unwrap_or(DateTime::UNIX_EPOCH)
    }

    /// Fields rendered as `k=v,k=v`, the text form used by console output.
    pub fn fields_text(&self) -> String {
        let mut out = String::new();
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(key);
            out.push('=');
            out.push_str(value);
        }
        out
    }
}

fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

/// Environment, service and instance a batch was produced under.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Identity {
    pub env: String,
    pub service: String,
    pub instance: String,
}

/// A sealed group of 1..=batch_size records in arrival order.
#[derive(Debug, Clone)]
pub struct Batch {
    identity: Arc<Identity>,
    records: Vec<Record>,
}

impl Batch {
    pub fn new(identity: Arc<Identity>, records: Vec<Record>) -> Self {
        Self { identity, records }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}
