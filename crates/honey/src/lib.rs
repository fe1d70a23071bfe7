// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batching pipeline for log records.
//!
//! Records handed to [`Honey::on_record`] are grouped into fixed-size
//! batches, sealed either when full, on a timer, or on demand, and fanned
//! out to every configured [`output::Output`]. Delivery runs on a bounded
//! pool of tasks so a slow output never stalls ingestion.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod buffer;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod honey;
pub mod output;
pub mod record;
pub mod rotator;
pub mod timer;

pub use crate::config::{Backpressure, Config, HttpOutputConfig};
pub use crate::errors::{ConfigError, Error, OutputError};
pub use crate::honey::{Honey, PipelineStats, State};
pub use crate::output::{Output, OutputRegistry, OutputSet};
pub use crate::record::{Batch, Identity, Level, Record};
