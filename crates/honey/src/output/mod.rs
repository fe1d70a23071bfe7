// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Outputs receive completed batches and deliver them somewhere.
//!
//! Outputs are looked up by name in an [`OutputRegistry`] at startup. The
//! registry reports unknown and duplicate names as configuration errors.
//! Every completed batch is fanned out to all configured outputs through an
//! [`OutputSet`]; one output failing never keeps the others from receiving
//! the batch.

pub mod http;
pub mod stdout;

use crate::config::Config;
use crate::errors::{ConfigError, OutputError};
use crate::record::Batch;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

#[async_trait]
pub trait Output: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> Result<(), OutputError> {
        Ok(())
    }

    /// Delivers one batch. Failures are reported to the caller, which logs
    /// them; there is no retry.
    async fn out(&self, batch: &Batch) -> Result<(), OutputError>;

    async fn close(&self) -> Result<(), OutputError> {
        Ok(())
    }
}

/// Builds an output from the pipeline configuration.
pub type OutputConstructor =
    Arc<dyn Fn(&Config) -> Result<Arc<dyn Output>, ConfigError> + Send + Sync>;

#[derive(Clone)]
pub struct OutputRegistry {
    constructors: HashMap<String, OutputConstructor>,
}

impl OutputRegistry {
    /// A registry with no outputs.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        constructor: F,
    ) -> Result<(), ConfigError>
    where
        F: Fn(&Config) -> Result<Arc<dyn Output>, ConfigError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.constructors.contains_key(&name) {
            return Err(ConfigError::DuplicateOutput(name));
        }
        self.constructors.insert(name, Arc::new(constructor));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Resolves configured names to constructors without building anything.
    pub fn resolve(
        &self,
        names: &[String],
    ) -> Result<Vec<(String, OutputConstructor)>, ConfigError> {
        let mut resolved: Vec<(String, OutputConstructor)> = Vec::with_capacity(names.len());
        for name in names {
            if resolved.iter().any(|(n, _)| n == name) {
                return Err(ConfigError::DuplicateOutput(name.clone()));
            }
            let constructor = self
                .constructors
                .get(name)
                .ok_or_else(|| ConfigError::UnknownOutput(name.clone()))?;
            resolved.push((name.clone(), Arc::clone(constructor)));
        }
        Ok(resolved)
    }

    /// Builds every configured output, in configured order.
    pub fn build(&self, config: &Config) -> Result<Vec<Arc<dyn Output>>, ConfigError> {
        self.resolve(&config.outputs)?
            .into_iter()
            .map(|(_, constructor)| constructor(config))
            .collect()
    }
}

impl Default for OutputRegistry {
    /// Registry with the built-in `std` and `http` outputs.
    fn default() -> Self {
        let mut constructors: HashMap<String, OutputConstructor> = HashMap::new();
        constructors.insert(
            stdout::STD_OUTPUT_NAME.to_string(),
            Arc::new(stdout::StdOutput::construct),
        );
        constructors.insert(
            http::HTTP_OUTPUT_NAME.to_string(),
            Arc::new(http::HttpOutput::construct),
        );
        Self { constructors }
    }
}

/// The started outputs, read-only for the life of the pipeline.
#[derive(Clone, Default)]
pub struct OutputSet {
    outputs: Arc<Vec<Arc<dyn Output>>>,
}

impl OutputSet {
    pub fn new(outputs: Vec<Arc<dyn Output>>) -> Self {
        Self {
            outputs: Arc::new(outputs),
        }
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.outputs.iter().map(|o| o.name().to_string()).collect()
    }

    /// Sends the batch to every output concurrently and returns how many
    /// succeeded.
    pub async fn deliver(&self, batch: &Batch) -> usize {
        let results = join_all(self.outputs.iter().map(|output| async move {
            let result = output.out(batch).await;
            (output.name(), result)
        }))
        .await;

        let mut delivered = 0;
        for (name, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => error!(
                    "Output {name} failed to deliver batch of {} records: {e}",
                    batch.len()
                ),
            }
        }
        debug!(
            "Delivered batch of {} records to {delivered}/{} outputs",
            batch.len(),
            self.outputs.len()
        );
        delivered
    }

    /// Closes every output, logging failures.
    pub async fn close(&self) {
        for output in self.outputs.iter() {
            if let Err(e) = output.close().await {
                error!("Failed to close output {}: {e}", output.name());
            }
        }
    }
}
