//! Periodic retention sweep and full flush
//!
//! Runs on a fixed interval independent of the debounce timers. Each tick
//! trims every thread to the sweep length, then writes all four records
//! regardless of dirty state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::store::retention::SweepReport;
use crate::store::Store;
use crate::types::error::Result;

/// One sweep followed by a full flush
///
/// The sweep result is returned even when the flush fails.
pub async fn run_maintenance(store: &Store, sweep_length: usize) -> (SweepReport, Result<()>) {
    let report = store.sweep(sweep_length);
    let flushed = store.flush_all().await;
    (report, flushed)
}

/// Background maintenance loop
pub struct MaintenanceTask {
    running: Arc<AtomicBool>,
    stop_tx: flume::Sender<()>,
    ticks: watch::Receiver<u64>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MaintenanceTask {
    /// Spawn the loop; the first tick fires one `interval` from now
    pub fn start(store: Store, interval: Duration, sweep_length: usize) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = flume::bounded(1);
        let (ticks_tx, ticks) = watch::channel(0u64);

        info!(
            "Starting maintenance loop (interval: {:?}, sweep length: {})",
            interval, sweep_length
        );

        let handle = tokio::spawn(run_loop(
            store,
            interval,
            sweep_length,
            running.clone(),
            stop_rx,
            ticks_tx,
        ));

        Self {
            running,
            stop_tx,
            ticks,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Count of completed ticks
    pub fn subscribe_ticks(&self) -> watch::Receiver<u64> {
        self.ticks.clone()
    }

    /// Stop the loop, waiting for an in-progress tick
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.stop_tx.try_send(());

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Maintenance loop ended abnormally: {}", e);
            }
            info!("Maintenance loop stopped");
        }
    }
}

async fn run_loop(
    store: Store,
    period: Duration,
    sweep_length: usize,
    running: Arc<AtomicBool>,
    stop_rx: flume::Receiver<()>,
    ticks: watch::Sender<u64>,
) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let mut tick_count = 0u64;

    while running.load(Ordering::SeqCst) {
        tokio::select! {
            _ = interval.tick() => {}
            _ = stop_rx.recv_async() => break,
        }

        if !running.load(Ordering::SeqCst) {
            break;
        }

        tick_count += 1;
        debug!("Maintenance tick #{}", tick_count);

        let (report, flushed) = run_maintenance(&store, sweep_length).await;
        if let Err(e) = flushed {
            error!("Maintenance flush #{} failed: {}", tick_count, e);
        }
        if report.changed() {
            debug!("Maintenance tick #{} sweep: {:?}", tick_count, report);
        }

        ticks.send_modify(|count| *count += 1);
    }

    running.store(false, Ordering::SeqCst);
    info!("Maintenance loop exited after {} tick(s)", tick_count);
}
