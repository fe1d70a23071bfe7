// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::rotator::RotatorHandle;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Shortest period the timer will run at.
pub const MIN_AUTO_ROTATE_PERIOD: Duration = Duration::from_secs(1);

/// Periodic rotation, independent of ingestion volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationTimer {
    period: Option<Duration>,
}

impl RotationTimer {
    /// `None` or a zero period disables the timer. Non-zero periods below
    /// [`MIN_AUTO_ROTATE_PERIOD`] are raised to it.
    pub fn new(period: Option<Duration>) -> Self {
        let period = period
            .filter(|p| !p.is_zero())
            .map(|p| p.max(MIN_AUTO_ROTATE_PERIOD));
        Self { period }
    }

    /// Builds a timer from a configured number of seconds; `<= 0` disables it.
    pub fn from_secs(secs: i64) -> Self {
        let period = u64::try_from(secs)
            .ok()
            .filter(|s| *s > 0)
            .map(Duration::from_secs);
        Self::new(period)
    }

    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    pub fn is_enabled(&self) -> bool {
        self.period.is_some()
    }

    /// Spawns the ticking task. Returns `None` when the timer is disabled.
    pub fn spawn(
        &self,
        handle: RotatorHandle,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let period = self.period?;
        Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // discard first tick, which is instantaneous

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => handle.rotate(),
                }
            }
            debug!("Rotation timer stopped");
        }))
    }
}
