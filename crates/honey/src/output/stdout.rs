// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Console output: one formatted line per record.

use crate::config::Config;
use crate::errors::{ConfigError, OutputError};
use crate::output::Output;
use crate::record::{Batch, Identity, Record};
use async_trait::async_trait;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

pub const STD_OUTPUT_NAME: &str = "std";

/// Line layout; each `{placeholder}` is replaced per record.
pub const STD_FORMAT: &str =
    "[{env}.{service}][{instance}][{time}] {level} {msg} {fields} {line} {trace_id}";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

pub struct StdOutput {
    /// `None` writes to the process stdout.
    writer: Option<SharedWriter>,
}

impl StdOutput {
    pub fn new() -> Self {
        Self { writer: None }
    }

    /// Writes lines to `writer` instead of stdout.
    pub fn with_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Some(Arc::new(Mutex::new(writer))),
        }
    }

    pub fn construct(_config: &Config) -> Result<Arc<dyn Output>, ConfigError> {
        Ok(Arc::new(Self::new()))
    }

    fn render(batch: &Batch) -> String {
        let mut text = String::new();
        for record in batch.records() {
            text.push_str(&format_line(batch.identity(), record));
            text.push('\n');
        }
        text
    }
}

fn write_text(writer: Option<SharedWriter>, text: String) -> io::Result<()> {
    match writer {
        Some(writer) => {
            let mut guard = writer
                .lock()
                .map_err(|_| io::Error::other("output writer lock poisoned"))?;
            guard.write_all(text.as_bytes())?;
            guard.flush()
        }
        None => {
            let mut out = io::stdout().lock();
            out.write_all(text.as_bytes())?;
            out.flush()
        }
    }
}

impl Default for StdOutput {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders one record with [`STD_FORMAT`].
pub fn format_line(identity: &Identity, record: &Record) -> String {
    let time = record.timestamp().format(TIME_FORMAT).to_string();

    STD_FORMAT
        .replace("{env}", &identity.env)
        .replace("{service}", &identity.service)
        .replace("{instance}", &identity.instance)
        .replace("{time}", &time)
        .replace("{level}", record.level.as_str())
        .replace("{msg}", &record.message)
        .replace("{fields}", &record.fields_text())
        .replace("{line}", record.line.as_deref().unwrap_or_default())
        .replace("{trace_id}", record.trace_id.as_deref().unwrap_or_default())
}

#[async_trait]
impl Output for StdOutput {
    fn name(&self) -> &str {
        STD_OUTPUT_NAME
    }

    async fn out(&self, batch: &Batch) -> Result<(), OutputError> {
        let text = Self::render(batch);
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || write_text(writer, text))
            .await
            .map_err(|e| OutputError::Io(io::Error::other(e)))?
            .map_err(OutputError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Level;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn identity() -> Identity {
        Identity {
            env: "prod".to_string(),
            service: "api".to_string(),
            instance: "pod-1".to_string(),
        }
    }

    #[test]
    fn test_format_line() {
        let record = Record::new(Level::Warn, "slow query")
            .with_timestamp_micros(1_700_000_000_123_456)
            .with_field("ms", "830")
            .with_field("db", "users")
            .with_line("db.rs:12")
            .with_trace_id("t-9");

        assert_eq!(
            format_line(&identity(), &record),
            "[prod.api][pod-1][2023-11-14 22:13:20.123456] warn slow query db=users,ms=830 db.rs:12 t-9"
        );
    }

    #[test]
    fn test_format_line_with_empty_optionals() {
        let record = Record::new(Level::Info, "hi").with_timestamp_micros(0);
        assert_eq!(
            format_line(&identity(), &record),
            "[prod.api][pod-1][1970-01-01 00:00:00.000000] info hi   "
        );
    }

    #[tokio::test]
    async fn test_out_writes_one_line_per_record() {
        let capture = Capture::default();
        let output = StdOutput::with_writer(Box::new(capture.clone()));
        let batch = Batch::new(
            Arc::new(identity()),
            vec![
                Record::new(Level::Info, "one"),
                Record::new(Level::Error, "two"),
            ],
        );

        output.out(&batch).await.unwrap();

        let text = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("info one"));
        assert!(lines[1].contains("error two"));
        assert_eq!(output.name(), "std");
    }
}
