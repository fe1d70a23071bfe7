// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The pipeline orchestrator.
//!
//! [`Honey`] wires the rotation loop, the rotation timer, the dispatch pool
//! and the outputs together and owns their lifecycle:
//!
//! ```text
//! init ──> Initialized ──start──> Running ──stop──> Stopping ──> Stopped
//!   └──────────────────────────────stop──────────────^
//! ```
//!
//! Records are accepted as soon as [`Honey::init`] returns. Batches sealed
//! before [`Honey::start`] wait for the outputs to be published instead of
//! being dropped.

use crate::config::Config;
use crate::dispatch::DispatchPool;
use crate::errors::Error;
use crate::output::{OutputConstructor, OutputRegistry, OutputSet};
use crate::record::{Batch, Identity, Level, Record};
use crate::rotator::{DispatchFn, RotatorHandle, RotatorService, RotatorSettings, StatsSnapshot};
use crate::timer::RotationTimer;
use futures::FutureExt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
#[repr(u8)]
pub enum State {
    #[display("uninitialized")]
    Uninitialized = 0,
    #[display("initialized")]
    Initialized = 1,
    #[display("running")]
    Running = 2,
    #[display("stopping")]
    Stopping = 3,
    #[display("stopped")]
    Stopped = 4,
}

impl State {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => State::Initialized,
            2 => State::Running,
            3 => State::Stopping,
            4 => State::Stopped,
            _ => State::Uninitialized,
        }
    }
}

/// Counters for the whole pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineStats {
    pub rotator: StatsSnapshot,
    /// Dispatch tasks currently delivering a batch.
    pub in_flight: usize,
}

#[derive(Default)]
struct Lifecycle {
    loop_task: Option<JoinHandle<()>>,
    timer_task: Option<JoinHandle<()>>,
    outputs: Option<OutputSet>,
}

pub struct Honey {
    config: Config,
    constructors: Vec<(String, OutputConstructor)>,
    state: AtomicU8,
    handle: RotatorHandle,
    pool: DispatchPool,
    cancel: CancellationToken,
    outputs_tx: watch::Sender<Option<OutputSet>>,
    lifecycle: Mutex<Lifecycle>,
}

impl Honey {
    /// Validates the configuration, resolves the configured outputs and
    /// spawns the rotation loop and timer. Must be called from within a
    /// tokio runtime.
    pub fn init(config: Config, registry: &OutputRegistry) -> Result<Self, Error> {
        config.validate()?;
        let constructors = registry.resolve(&config.outputs)?;

        let identity = Arc::new(Identity {
            env: config.env.clone(),
            service: config.service.clone(),
            instance: config.instance.clone(),
        });
        let pool = DispatchPool::new(config.max_concurrent_rotations);
        let cancel = CancellationToken::new();
        let (outputs_tx, outputs_rx) = watch::channel(None);

        let (service, handle) = RotatorService::new(
            RotatorSettings {
                batch_size: config.batch_size,
                cache_len: config.cache_len,
                backpressure: config.backpressure,
            },
            identity,
            pool.clone(),
            deliver_when_published(outputs_rx),
            cancel.clone(),
        );
        let loop_task = tokio::spawn(service.run());
        let timer = RotationTimer::from_secs(config.auto_rotate_secs);
        let timer_task = timer.spawn(handle.clone(), cancel.clone());

        info!(
            "Honey initialized for {}.{} on {}: batch size {}, auto rotate {:?}, outputs [{}]",
            config.env,
            config.service,
            config.instance,
            config.batch_size,
            timer.period(),
            config.outputs.join(",")
        );

        Ok(Self {
            config,
            constructors,
            state: AtomicU8::new(State::Initialized as u8),
            handle,
            pool,
            cancel,
            outputs_tx,
            lifecycle: Mutex::new(Lifecycle {
                loop_task: Some(loop_task),
                timer_task,
                outputs: None,
            }),
        })
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: State) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Builds and starts every configured output, then releases any batch
    /// waiting for them. On failure the outputs already started are closed
    /// and the state is left unchanged.
    pub async fn start(&self) -> Result<(), Error> {
        let mut lifecycle = self.lifecycle.lock().await;
        let state = self.state();
        if state != State::Initialized {
            return Err(Error::InvalidState {
                operation: "start",
                state,
            });
        }

        let mut started = Vec::with_capacity(self.constructors.len());
        for (name, constructor) in &self.constructors {
            let result = match constructor(&self.config) {
                Ok(output) => output.start().await.map(|()| output).map_err(|source| {
                    Error::OutputStart {
                        name: name.clone(),
                        source,
                    }
                }),
                Err(e) => Err(Error::from(e)),
            };
            match result {
                Ok(output) => {
                    debug!("Output {name} started");
                    started.push(output);
                }
                Err(e) => {
                    OutputSet::new(started).close().await;
                    return Err(e);
                }
            }
        }

        let outputs = OutputSet::new(started);
        lifecycle.outputs = Some(outputs.clone());
        self.outputs_tx.send_replace(Some(outputs));
        self.set_state(State::Running);
        info!("Honey started");
        Ok(())
    }

    /// The logging hook. Hands the record to the pipeline and reports
    /// whether the host should suppress its own output for it.
    ///
    /// `Fatal` records, and `Panic` records before the pipeline is running,
    /// force a rotation so they are not left sitting in the buffer.
    pub fn on_record(&self, record: Record) -> bool {
        let state = self.state();
        let level = record.level;

        let accepted = match self.handle.try_add(record) {
            Ok(()) => true,
            Err(e) => {
                debug!("Record not accepted: {e}");
                false
            }
        };

        if level == Level::Fatal || (level == Level::Panic && state != State::Running) {
            self.handle.rotate_queued();
        }

        accepted && self.config.stop_log_output && state == State::Running
    }

    /// Requests a rotation of whatever is currently buffered.
    pub fn rotate(&self) {
        self.handle.rotate();
    }

    /// Stops the pipeline, delivering every record accepted so far.
    ///
    /// Interception is switched off first, then the buffer is flushed twice
    /// (records that raced with the first flush are caught by the second),
    /// the loop and timer are shut down and in-flight deliveries are awaited
    /// before the outputs are closed. Stopping twice is a no-op.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.state() == State::Stopped {
            debug!("Honey already stopped");
            return;
        }
        self.set_state(State::Stopping);

        // Dispatch tasks waiting for outputs hold pool permits; release them
        // before flushing so the loop can keep submitting.
        let never_started = lifecycle.outputs.is_none();
        if never_started {
            self.outputs_tx.send_replace(Some(OutputSet::default()));
        }

        for phase in 1..=2 {
            match self.handle.flush().await {
                Ok(flushed) => debug!("Stop phase {phase} flushed {flushed} records"),
                Err(e) => warn!("Stop phase {phase} flush failed: {e}"),
            }
        }

        self.cancel.cancel();
        if let Some(task) = lifecycle.loop_task.take() {
            if let Err(e) = task.await {
                error!("Rotation loop task failed: {e}");
            }
        }
        if let Some(task) = lifecycle.timer_task.take() {
            if let Err(e) = task.await {
                error!("Rotation timer task failed: {e}");
            }
        }

        if never_started {
            let batches = self.handle.stats().batches;
            if batches > 0 {
                warn!("Honey stopped before it was started, {batches} batches were not delivered");
            } else {
                warn!("Honey stopped before it was started");
            }
        }

        self.pool.wait().await;
        if let Some(outputs) = lifecycle.outputs.take() {
            outputs.close().await;
        }

        self.set_state(State::Stopped);
        info!("Honey stopped");
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            rotator: self.handle.stats(),
            in_flight: self.pool.in_flight(),
        }
    }
}

impl Drop for Honey {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Dispatch function that delivers each batch to the published output set,
/// waiting for it to be published first.
fn deliver_when_published(outputs_rx: watch::Receiver<Option<OutputSet>>) -> DispatchFn {
    Arc::new(move |batch: Batch| {
        let mut outputs_rx = outputs_rx.clone();
        async move {
            let outputs = match outputs_rx.wait_for(Option::is_some).await {
                Ok(outputs) => (*outputs).clone(),
                Err(_) => None,
            };
            match outputs {
                Some(outputs) => {
                    outputs.deliver(&batch).await;
                }
                None => warn!(
                    "No outputs available, dropping batch of {} records",
                    batch.len()
                ),
            }
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ConfigError;
    use crate::output::tests::{registry_of, MemoryOutput};
    use std::time::Duration;
    use tracing_test::traced_test;

    fn config(outputs: &[&str]) -> Config {
        Config {
            batch_size: 2,
            auto_rotate_secs: 0,
            max_concurrent_rotations: 1,
            cache_len: 64,
            outputs: outputs.iter().map(|o| o.to_string()).collect(),
            ..Config::for_service("svc")
        }
    }

    fn strings(batches: &[&[&str]]) -> Vec<Vec<String>> {
        batches
            .iter()
            .map(|b| b.iter().map(|m| m.to_string()).collect())
            .collect()
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failing_output_does_not_affect_the_other() {
        let good = MemoryOutput::named("good");
        let bad = MemoryOutput::failing("bad");
        let honey = Honey::init(
            config(&["good", "bad"]),
            &registry_of(&[Arc::clone(&good), Arc::clone(&bad)]),
        )
        .unwrap();
        honey.start().await.unwrap();

        for message in ["a", "b", "c"] {
            honey.on_record(Record::new(Level::Info, message));
        }
        honey.stop().await;

        assert_eq!(good.received(), strings(&[&["a", "b"], &["c"]]));
        assert!(bad.received().is_empty());
        assert!(good.is_closed());
        assert!(bad.is_closed());
        assert!(logs_contain("Output bad failed to deliver batch of 2 records"));
        assert!(logs_contain("Output bad failed to deliver batch of 1 records"));
    }

    #[tokio::test]
    async fn test_batches_sealed_before_start_are_delivered() {
        let output = MemoryOutput::named("mem");
        let honey = Honey::init(
            Config {
                batch_size: 1,
                ..config(&["mem"])
            },
            &registry_of(&[Arc::clone(&output)]),
        )
        .unwrap();

        honey.on_record(Record::new(Level::Info, "early"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(output.received().is_empty());

        honey.start().await.unwrap();
        honey.stop().await;
        assert_eq!(output.received(), strings(&[&["early"]]));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_stop_without_start() {
        let output = MemoryOutput::named("mem");
        let honey = Honey::init(config(&["mem"]), &registry_of(&[Arc::clone(&output)])).unwrap();

        honey.on_record(Record::new(Level::Info, "lost"));
        honey.stop().await;

        assert_eq!(honey.state(), State::Stopped);
        assert!(output.received().is_empty());
        assert!(!output.is_closed());
        assert!(logs_contain("stopped before it was started, 1 batches"));

        honey.stop().await;
        assert_eq!(honey.state(), State::Stopped);
        assert!(!honey.on_record(Record::new(Level::Info, "late")));
    }

    #[tokio::test]
    async fn test_stop_without_start_with_saturated_pool() {
        let output = MemoryOutput::named("mem");
        let honey = Honey::init(
            Config {
                batch_size: 1,
                cache_len: 4,
                ..config(&["mem"])
            },
            &registry_of(&[Arc::clone(&output)]),
        )
        .unwrap();

        for i in 0..6 {
            honey.on_record(Record::new(Level::Info, format!("{i}")));
        }
        tokio::time::timeout(Duration::from_secs(2), honey.stop())
            .await
            .expect("stop should not hang");
        assert_eq!(honey.state(), State::Stopped);
        assert!(output.received().is_empty());
    }

    #[tokio::test]
    async fn test_suppression_only_while_running() {
        let output = MemoryOutput::named("mem");
        let honey = Honey::init(
            Config {
                stop_log_output: true,
                ..config(&["mem"])
            },
            &registry_of(&[Arc::clone(&output)]),
        )
        .unwrap();

        assert!(!honey.on_record(Record::new(Level::Info, "before")));
        honey.start().await.unwrap();
        assert!(honey.on_record(Record::new(Level::Info, "during")));
        honey.stop().await;
        assert!(!honey.on_record(Record::new(Level::Info, "after")));

        assert_eq!(output.received(), strings(&[&["before", "during"]]));
    }

    #[tokio::test]
    async fn test_no_suppression_when_disabled() {
        let output = MemoryOutput::named("mem");
        let honey = Honey::init(config(&["mem"]), &registry_of(&[Arc::clone(&output)])).unwrap();
        honey.start().await.unwrap();
        assert!(!honey.on_record(Record::new(Level::Info, "kept")));
        honey.stop().await;
    }

    #[tokio::test]
    async fn test_fatal_record_forces_rotation() {
        let output = MemoryOutput::named("mem");
        let honey = Honey::init(
            Config {
                batch_size: 100,
                ..config(&["mem"])
            },
            &registry_of(&[Arc::clone(&output)]),
        )
        .unwrap();
        honey.start().await.unwrap();

        honey.on_record(Record::new(Level::Info, "context"));
        honey.on_record(Record::new(Level::Fatal, "dying"));

        tokio::time::timeout(Duration::from_secs(1), async {
            while output.received().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(output.received(), strings(&[&["context", "dying"]]));
        assert_eq!(honey.state(), State::Running);
        honey.stop().await;
    }

    #[tokio::test]
    async fn test_panic_before_start_is_sealed_immediately() {
        let output = MemoryOutput::named("mem");
        let honey = Honey::init(
            Config {
                batch_size: 100,
                ..config(&["mem"])
            },
            &registry_of(&[Arc::clone(&output)]),
        )
        .unwrap();

        honey.on_record(Record::new(Level::Panic, "early panic"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(honey.stats().rotator.batches, 1);

        honey.start().await.unwrap();
        honey.stop().await;
        assert_eq!(output.received(), strings(&[&["early panic"]]));
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let output = MemoryOutput::named("mem");
        let honey = Honey::init(config(&["mem"]), &registry_of(&[Arc::clone(&output)])).unwrap();
        assert_eq!(honey.state(), State::Initialized);

        honey.start().await.unwrap();
        assert!(matches!(
            honey.start().await,
            Err(Error::InvalidState {
                operation: "start",
                state: State::Running
            })
        ));
        honey.stop().await;
        assert!(matches!(
            honey.start().await,
            Err(Error::InvalidState {
                state: State::Stopped,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_output_start_failure_leaves_state_unchanged() {
        let good = MemoryOutput::named("good");
        let broken = MemoryOutput::failing_start("broken");
        let honey = Honey::init(
            config(&["good", "broken"]),
            &registry_of(&[Arc::clone(&good), Arc::clone(&broken)]),
        )
        .unwrap();

        assert!(matches!(
            honey.start().await,
            Err(Error::OutputStart { name, .. }) if name == "broken"
        ));
        assert_eq!(honey.state(), State::Initialized);
        assert!(good.is_closed());
        honey.stop().await;
    }

    #[tokio::test]
    async fn test_init_rejects_bad_configuration() {
        let registry = registry_of(&[MemoryOutput::named("mem")]);
        assert!(matches!(
            Honey::init(config(&["mem", "kafka"]), &registry),
            Err(Error::Config(ConfigError::UnknownOutput(name))) if name == "kafka"
        ));
        assert!(matches!(
            Honey::init(Config::for_service(""), &registry),
            Err(Error::Config(ConfigError::MissingService))
        ));
    }

    #[tokio::test]
    async fn test_stats_after_stop() {
        let output = MemoryOutput::named("mem");
        let honey = Honey::init(config(&["mem"]), &registry_of(&[Arc::clone(&output)])).unwrap();
        honey.start().await.unwrap();
        for i in 0..5 {
            honey.on_record(Record::new(Level::Info, format!("{i}")));
        }
        honey.stop().await;

        let stats = honey.stats();
        assert_eq!(stats.rotator.accepted, 5);
        assert_eq!(stats.rotator.rotated_records, 5);
        assert_eq!(stats.rotator.batches, 3);
        assert_eq!(stats.in_flight, 0);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(State::Running.to_string(), "running");
        assert_eq!(State::from_u8(State::Stopping as u8), State::Stopping);
    }
}
