// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the pipeline.
//!
//! Configuration errors are fatal and surface from [`crate::Honey::init`].
//! Output errors stay inside the dispatch task that produced them and are
//! only ever logged.

/// Invalid settings, reported once at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("Service name is required")]
    MissingService,

    #[error("Unknown output: {0}")]
    UnknownOutput(String),

    #[error("Output registered or configured more than once: {0}")]
    DuplicateOutput(String),

    #[error("Unknown backpressure policy: {0}")]
    UnknownBackpressure(String),

    #[error("Unknown serializer: {0}")]
    UnknownSerializer(String),

    #[error("Unknown compressor: {0}")]
    UnknownCompressor(String),

    #[error("Unable to build output {name}: {reason}")]
    OutputConstruction { name: String, reason: String },
}

/// A single output failed to deliver a batch.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("Failed to serialize batch: {0}")]
    Serialize(String),

    #[error("Failed to compress batch: {0}")]
    Compress(#[source] std::io::Error),

    #[error("Failed to send request: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected status code {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Collector rejected batch: errCode={code}, errMsg={message}")]
    Rejected { code: i64, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top level error returned by the orchestrator and the rotator handle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to start output {name}: {source}")]
    OutputStart {
        name: String,
        #[source]
        source: OutputError,
    },

    #[error("Operation {operation} not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: crate::honey::State,
    },

    #[error("Rotation loop is closed")]
    RotatorClosed,

    #[error("Ingress queue is full, record dropped")]
    QueueFull,
}
