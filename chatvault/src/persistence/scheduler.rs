//! Debounced flush scheduling
//!
//! A scheduler is a two-state machine, Idle and PendingFlush:
//! - `signal` marks a record dirty. On Idle → PendingFlush it arms one
//!   debounce timer. Signals while pending only extend the dirty set, the
//!   timer is never pushed back.
//! - When the timer fires the scheduler returns to Idle, takes the dirty set,
//!   snapshots each record *now* and hands it to the sink. Signals arriving
//!   during the write arm the next cycle.
//! - `flush_now` bypasses all of this and reports errors to the caller.
//!
//! Scheduled flush failures are logged and not retried; the next signal will
//! write the record again.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use flume::{Receiver, Sender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Collection, DurableSink, SnapshotSource};
use crate::types::error::{Result, VaultError};

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPhase {
    Idle,
    PendingFlush,
}

/// Commands for the worker task
#[derive(Debug)]
enum FlushCommand {
    /// A debounce window has opened
    Arm,
    /// Exit without flushing
    Stop,
}

struct SchedulerState {
    phase: FlushPhase,
    dirty: BTreeSet<Collection>,
}

struct Inner {
    group: &'static str,
    debounce: Duration,
    state: Mutex<SchedulerState>,
    source: Arc<dyn SnapshotSource>,
    sink: Arc<dyn DurableSink>,
    /// Serializes take-dirty → snapshot → write across every scheduler
    flush_lock: Arc<tokio::sync::Mutex<()>>,
    cycles: watch::Sender<u64>,
    commands: Sender<FlushCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Coalesces dirty signals into at most one write per record per window
#[derive(Clone)]
pub struct FlushScheduler {
    inner: Arc<Inner>,
}

impl FlushScheduler {
    /// Create a scheduler and spawn its worker on the current Tokio runtime
    pub fn start(
        group: &'static str,
        debounce: Duration,
        source: Arc<dyn SnapshotSource>,
        sink: Arc<dyn DurableSink>,
        flush_lock: Arc<tokio::sync::Mutex<()>>,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            VaultError::Other(format!("Flush scheduler needs a Tokio runtime: {}", e))
        })?;

        let (tx, rx) = flume::unbounded();
        let (cycles, _) = watch::channel(0u64);

        let inner = Arc::new(Inner {
            group,
            debounce,
            state: Mutex::new(SchedulerState {
                phase: FlushPhase::Idle,
                dirty: BTreeSet::new(),
            }),
            source,
            sink,
            flush_lock,
            cycles,
            commands: tx,
            worker: Mutex::new(None),
        });

        let handle = runtime.spawn(run_worker(inner.clone(), rx));
        *inner.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!(
            "Flush scheduler '{}' started (debounce: {:?})",
            group, debounce
        );

        Ok(Self { inner })
    }

    /// Mark a record dirty, arming the timer if the scheduler is idle
    pub fn signal(&self, collection: Collection) {
        let arm = {
            let mut state = self.inner.lock_state();
            state.dirty.insert(collection);
            if state.phase == FlushPhase::Idle {
                state.phase = FlushPhase::PendingFlush;
                true
            } else {
                false
            }
        };

        if arm {
            debug!(
                "Flush group '{}' armed by {} (window {:?})",
                self.inner.group, collection, self.inner.debounce
            );
            if self.inner.commands.send(FlushCommand::Arm).is_err() {
                debug!(
                    "Flush group '{}' is stopped, {} stays dirty",
                    self.inner.group, collection
                );
            }
        }
    }

    /// Write `bytes` for a record immediately, bypassing the dirty set
    pub async fn flush_now(&self, collection: Collection, bytes: Vec<u8>) -> Result<()> {
        let _guard = self.inner.flush_lock.lock().await;
        self.inner.write(collection, bytes).await
    }

    /// Snapshot a record and write it immediately
    pub async fn flush_snapshot_now(&self, collection: Collection) -> Result<()> {
        let _guard = self.inner.flush_lock.lock().await;
        let bytes = self.inner.source.snapshot(collection)?;
        self.inner.write(collection, bytes).await
    }

    pub fn phase(&self) -> FlushPhase {
        self.inner.lock_state().phase
    }

    /// Records waiting for the next cycle
    pub fn pending(&self) -> Vec<Collection> {
        self.inner.lock_state().dirty.iter().copied().collect()
    }

    /// Count of completed scheduled cycles, updated after each one
    pub fn subscribe_cycles(&self) -> watch::Receiver<u64> {
        self.inner.cycles.subscribe()
    }

    /// Stop the worker, waiting for an in-progress cycle to finish
    ///
    /// Pending records are not flushed; callers flush explicitly on shutdown.
    pub async fn stop(&self) {
        let handle = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            let _ = self.inner.commands.send(FlushCommand::Stop);
            if let Err(e) = handle.await {
                warn!("Flush group '{}' worker ended abnormally: {}", self.inner.group, e);
            }
            info!("Flush scheduler '{}' stopped", self.inner.group);
        }
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Timer fired: go Idle, take the dirty set, write fresh snapshots
    async fn run_cycle(&self) {
        let _guard = self.flush_lock.lock().await;

        let dirty = {
            let mut state = self.lock_state();
            state.phase = FlushPhase::Idle;
            std::mem::take(&mut state.dirty)
        };

        for collection in dirty {
            let result = match self.source.snapshot(collection) {
                Ok(bytes) => self.write(collection, bytes).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(
                    "Scheduled flush of {} (group '{}') failed: {}",
                    collection, self.group, e
                );
            }
        }

        self.cycles.send_modify(|count| *count += 1);
    }

    /// Hand bytes to the sink on a blocking thread
    async fn write(&self, collection: Collection, bytes: Vec<u8>) -> Result<()> {
        let sink = self.sink.clone();
        tokio::task::spawn_blocking(move || sink.write(collection, &bytes))
            .await
            .map_err(|e| VaultError::Persistence(format!("{}: write task failed: {}", collection, e)))?
    }
}

async fn run_worker(inner: Arc<Inner>, rx: Receiver<FlushCommand>) {
    while let Ok(command) = rx.recv_async().await {
        match command {
            FlushCommand::Arm => {
                let deadline = tokio::time::sleep(inner.debounce);
                tokio::pin!(deadline);

                loop {
                    tokio::select! {
                        _ = &mut deadline => {
                            inner.run_cycle().await;
                            break;
                        }
                        next = rx.recv_async() => match next {
                            Ok(FlushCommand::Arm) => continue,
                            Ok(FlushCommand::Stop) | Err(_) => return,
                        },
                    }
                }
            }
            FlushCommand::Stop => break,
        }
    }
}
