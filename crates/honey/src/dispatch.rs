// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded pool for batch deliveries.
//!
//! A permit is taken before a task is spawned, so no more than
//! `max_concurrent` delivery tasks exist at any time. When the pool is
//! saturated, [`DispatchPool::submit`] waits, which in turn pauses the
//! rotation loop and lets the ingress queue apply backpressure.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

#[derive(Debug, Clone)]
pub struct DispatchPool {
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
    max_concurrent: usize,
}

impl DispatchPool {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            tracker: TaskTracker::new(),
            max_concurrent,
        }
    }

    /// Runs `task` on the pool once a worker slot is free.
    ///
    /// The task's result is not inspected; it is expected to handle and
    /// report its own failures.
    pub async fn submit<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!("Dispatch pool closed, dropping task: {e}");
                return;
            }
        };

        self.tracker.spawn(async move {
            let _permit = permit;
            task.await;
        });
    }

    /// Waits until every submitted task has completed.
    ///
    /// Closes the pool's tracker; tasks submitted afterwards are still run
    /// and waited on by later calls.
    pub async fn wait(&self) {
        debug!("Waiting for {} dispatch tasks to finish", self.tracker.len());
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Number of tasks currently spawned and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}
