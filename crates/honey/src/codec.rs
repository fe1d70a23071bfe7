// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Payload serialization and compression for network outputs.

use crate::errors::{ConfigError, OutputError};
use crate::record::Record;
use std::io::Write;
use std::str::FromStr;
use zstd::stream::write::Encoder;

pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Serializer {
    Json,
    #[default]
    MsgPack,
}

impl Serializer {
    pub fn serialize(&self, records: &[Record]) -> Result<Vec<u8>, OutputError> {
        match self {
            Serializer::Json => {
                serde_json::to_vec(records).map_err(|e| OutputError::Serialize(e.to_string()))
            }
            Serializer::MsgPack => rmp_serde::to_vec_named(records)
                .map_err(|e| OutputError::Serialize(e.to_string())),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Serializer::Json => "application/json",
            Serializer::MsgPack => "application/msgpack",
        }
    }
}

impl FromStr for Serializer {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Serializer::Json),
            "msgpack" => Ok(Serializer::MsgPack),
            other => Err(ConfigError::UnknownSerializer(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compressor {
    Zstd(i32),
    Raw,
}

impl Default for Compressor {
    fn default() -> Self {
        Compressor::Zstd(DEFAULT_ZSTD_LEVEL)
    }
}

impl Compressor {
    pub fn compress(&self, payload: &[u8]) -> Result<Vec<u8>, OutputError> {
        match self {
            Compressor::Raw => Ok(payload.to_vec()),
            Compressor::Zstd(level) => {
                let mut encoder =
                    Encoder::new(Vec::new(), *level).map_err(OutputError::Compress)?;
                encoder.write_all(payload).map_err(OutputError::Compress)?;
                encoder.finish().map_err(OutputError::Compress)
            }
        }
    }

    pub fn decompress(&self, payload: &[u8]) -> Result<Vec<u8>, OutputError> {
        match self {
            Compressor::Raw => Ok(payload.to_vec()),
            Compressor::Zstd(_) => zstd::decode_all(payload).map_err(OutputError::Compress),
        }
    }

    /// Value for the `Content-Encoding` header, if any.
    pub fn content_encoding(&self) -> Option<&'static str> {
        match self {
            Compressor::Zstd(_) => Some("zstd"),
            Compressor::Raw => None,
        }
    }
}

impl FromStr for Compressor {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zstd" => Ok(Compressor::default()),
            "raw" | "none" => Ok(Compressor::Raw),
            other => Err(ConfigError::UnknownCompressor(other.to_string())),
        }
    }
}
