// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The rotation loop.
//!
//! ```text
//!    producers (RotatorHandle, Clone)      timer / hook / stop
//!          │ Add, Flush (bounded mpsc)          │ rotate() (Notify)
//!          v                                    v
//!    ┌─────────────────────────────────────────────────┐
//!    │ RotatorService: one task, owns the BatchBuffer  │
//!    └───────────────────────┬─────────────────────────┘
//!                            │ Batch
//!                            v
//!                      DispatchPool::submit
//! ```
//!
//! Records and flush requests share one channel, so a flush always covers
//! every record its caller enqueued before it. Rotation requests coming from
//! [`RotatorHandle::rotate`] go through a [`Notify`] instead: they never
//! block and several pending requests coalesce into a single rotation.

use crate::buffer::BatchBuffer;
use crate::config::Backpressure;
use crate::dispatch::DispatchPool;
use crate::errors::Error;
use crate::record::{Batch, Identity, Record};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Called once per completed batch; the returned future runs on the
/// dispatch pool.
pub type DispatchFn = Arc<dyn Fn(Batch) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug)]
pub enum RotatorCommand {
    Add(Record),
    /// Rotate once every earlier command has been handled.
    Rotate,
    /// Rotate now and report how many records were sealed.
    Flush(oneshot::Sender<usize>),
}

#[derive(Debug, Default)]
pub struct RotatorStats {
    accepted: AtomicU64,
    dropped: AtomicU64,
    batches: AtomicU64,
    rotated_records: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub dropped: u64,
    pub batches: u64,
    pub rotated_records: u64,
}

impl RotatorStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            rotated_records: self.rotated_records.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RotatorSettings {
    pub batch_size: usize,
    pub cache_len: usize,
    pub backpressure: Backpressure,
}

/// Producer side of the rotation loop. Cheap to clone.
#[derive(Clone, Debug)]
pub struct RotatorHandle {
    tx: mpsc::Sender<RotatorCommand>,
    signal: Arc<Notify>,
    backpressure: Backpressure,
    stats: Arc<RotatorStats>,
}

impl RotatorHandle {
    /// Enqueues a record, waiting for queue space under [`Backpressure::Block`].
    pub async fn add(&self, record: Record) -> Result<(), Error> {
        match self.backpressure {
            Backpressure::Block => {
                self.tx
                    .send(RotatorCommand::Add(record))
                    .await
                    .map_err(|_| Error::RotatorClosed)?;
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Backpressure::Drop => self.try_send(RotatorCommand::Add(record)),
        }
    }

    /// Synchronous enqueue for hooks called outside async code.
    ///
    /// Under [`Backpressure::Block`] a full queue blocks the calling thread.
    /// Inside a current-thread runtime blocking would deadlock the loop, so
    /// there the record is dropped and counted instead.
    pub fn try_add(&self, record: Record) -> Result<(), Error> {
        let command = RotatorCommand::Add(record);
        if self.backpressure == Backpressure::Drop {
            return self.try_send(command);
        }

        match self.send_blocking(command) {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(Error::QueueFull) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(Error::QueueFull)
            }
            Err(e) => Err(e),
        }
    }

    /// Sends from synchronous code, blocking the calling thread while the
    /// queue is full. Returns [`Error::QueueFull`] on a current-thread
    /// runtime, where blocking would stall the loop itself.
    fn send_blocking(&self, command: RotatorCommand) -> Result<(), Error> {
        let command = match self.tx.try_send(command) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Closed(_)) => return Err(Error::RotatorClosed),
            Err(TrySendError::Full(command)) => command,
        };

        let sent = match Handle::try_current() {
            Err(_) => self.tx.blocking_send(command),
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                let tx = self.tx.clone();
                tokio::task::block_in_place(move || handle.block_on(tx.send(command)))
            }
            Ok(_) => return Err(Error::QueueFull),
        };
        sent.map_err(|_| Error::RotatorClosed)
    }

    fn try_send(&self, command: RotatorCommand) -> Result<(), Error> {
        match self.tx.try_send(command) {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(Error::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(Error::RotatorClosed),
        }
    }

    /// Requests a rotation of whatever is buffered. Never blocks; requests
    /// made while one is pending are merged.
    pub fn rotate(&self) {
        self.signal.notify_one();
    }

    /// Like [`rotate`](Self::rotate), but ordered after the records this
    /// caller already enqueued. Under [`Backpressure::Block`] this waits for
    /// queue space the same way [`try_add`](Self::try_add) does. The signal
    /// is used only when the command cannot be queued.
    pub fn rotate_queued(&self) {
        let queued = match self.backpressure {
            Backpressure::Block => self.send_blocking(RotatorCommand::Rotate),
            Backpressure::Drop => self
                .tx
                .try_send(RotatorCommand::Rotate)
                .map_err(|_| Error::QueueFull),
        };
        if let Err(Error::QueueFull) = queued {
            self.signal.notify_one();
        }
    }

    /// Rotates after every record this caller already enqueued has been
    /// buffered. Returns the number of records sealed into the batch.
    pub async fn flush(&self) -> Result<usize, Error> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(RotatorCommand::Flush(response_tx))
            .await
            .map_err(|_| Error::RotatorClosed)?;
        response_rx.await.map_err(|_| Error::RotatorClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

/// Consumer side of the rotation loop; spawn [`RotatorService::run`].
pub struct RotatorService {
    buffer: BatchBuffer,
    rx: mpsc::Receiver<RotatorCommand>,
    signal: Arc<Notify>,
    cancel: CancellationToken,
    identity: Arc<Identity>,
    pool: DispatchPool,
    dispatch: DispatchFn,
    stats: Arc<RotatorStats>,
}

impl RotatorService {
    pub fn new(
        settings: RotatorSettings,
        identity: Arc<Identity>,
        pool: DispatchPool,
        dispatch: DispatchFn,
        cancel: CancellationToken,
    ) -> (Self, RotatorHandle) {
        let (tx, rx) = mpsc::channel(settings.cache_len.max(1));
        let signal = Arc::new(Notify::new());
        let stats = Arc::new(RotatorStats::default());

        let service = Self {
            buffer: BatchBuffer::new(settings.batch_size),
            rx,
            signal: Arc::clone(&signal),
            cancel,
            identity,
            pool,
            dispatch,
            stats: Arc::clone(&stats),
        };
        let handle = RotatorHandle {
            tx,
            signal,
            backpressure: settings.backpressure,
            stats,
        };

        (service, handle)
    }

    /// Runs until cancelled or until every handle is dropped. On exit,
    /// records still queued are buffered and rotated one last time.
    pub async fn run(mut self) {
        debug!(
            "Rotation loop started, batch size {}",
            self.buffer.capacity()
        );

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = self.signal.notified() => {
                    self.rotate().await;
                }
                command = self.rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }

        self.rx.close();
        while let Ok(command) = self.rx.try_recv() {
            self.handle(command).await;
        }
        self.rotate().await;

        debug!("Rotation loop stopped");
    }

    async fn handle(&mut self, command: RotatorCommand) {
        match command {
            RotatorCommand::Add(record) => {
                if self.buffer.append(record) {
                    self.rotate().await;
                }
            }
            RotatorCommand::Rotate => {
                self.rotate().await;
            }
            RotatorCommand::Flush(response_tx) => {
                let rotated = self.rotate().await;
                if response_tx.send(rotated).is_err() {
                    error!("Failed to send flush response - receiver dropped");
                }
            }
        }
    }

    async fn rotate(&mut self) -> usize {
        if self.buffer.is_empty() {
            return 0;
        }

        let records = self.buffer.drain_all();
        let count = records.len();
        self.stats.batches.fetch_add(1, Ordering::Relaxed);
        self.stats
            .rotated_records
            .fetch_add(count as u64, Ordering::Relaxed);
        debug!("Rotating batch of {count} records");

        let batch = Batch::new(Arc::clone(&self.identity), records);
        self.pool.submit((self.dispatch)(batch)).await;
        count
    }
}
