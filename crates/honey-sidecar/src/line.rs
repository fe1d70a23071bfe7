// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns one line of host output into a record.
//!
//! Lines holding a JSON object are read as structured logs (`level`, `msg`,
//! `ts`, `caller`, trace id and arbitrary fields). Anything else becomes an
//! `info` record carrying the raw text.

use honey::{Level, Record};
use serde_json::{Map, Value};

const LEVEL_KEYS: &[&str] = &["level", "lvl", "severity"];
const MESSAGE_KEYS: &[&str] = &["msg", "message"];
const LINE_KEYS: &[&str] = &["caller", "line"];
const TIME_KEYS: &[&str] = &["ts", "time"];

pub fn parse_line(text: &str) -> Record {
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(trimmed) {
            return from_object(object);
        }
    }
    Record::new(Level::Info, trimmed)
}

fn from_object(mut object: Map<String, Value>) -> Record {
    let level = take_text(&mut object, LEVEL_KEYS)
        .and_then(|l| l.parse().ok())
        .unwrap_or(Level::Info);
    let message = take_text(&mut object, MESSAGE_KEYS).unwrap_or_default();
    let line = take_text(&mut object, LINE_KEYS);
    let micros = take(&mut object, TIME_KEYS)
        .and_then(|v| v.as_f64())
        .map(|secs| (secs * 1_000_000.0) as i64);

    let fields: Vec<(String, String)> = object
        .into_iter()
        .map(|(key, value)| (key, value_text(value)))
        .collect();

    let mut record = Record::from_fields(level, message, fields);
    if let Some(line) = line {
        record = record.with_line(line);
    }
    if let Some(micros) = micros {
        record = record.with_timestamp_micros(micros);
    }
    record
}

fn take(object: &mut Map<String, Value>, keys: &[&str]) -> Option<Value> {
    keys.iter().find_map(|key| object.remove(*key))
}

fn take_text(object: &mut Map<String, Value>, keys: &[&str]) -> Option<String> {
    take(object, keys).map(value_text)
}

fn value_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
