use crate::cache::controller::CacheController;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A `(table, row_id)` event fed by a Store-side scalar hook on any row
/// mutation.
#[derive(Debug, Clone)]
pub struct DirtyRecord {
    pub table: String,
    pub row_id: i64,
}

/// An `(update_type, table1, table2, id1, id2)` event fed by a
/// Store-side hook whenever a link row changes.
#[derive(Debug, Clone)]
pub struct DirtyInterlink {
    pub update_type: String,
    pub table1: String,
    pub table2: String,
    pub id1: i64,
    pub id2: i64,
}

/// Runs the background maintenance loop at a configurable interval,
/// draining `dirty_record_queue`/`dirty_interlink_queue` and applying
/// derived-field recomputation and merge/clean actions against a
/// `CacheController`.
pub struct Maintainer {
    record_tx: Sender<DirtyRecord>,
    interlink_tx: Sender<DirtyInterlink>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Maintainer {
    /// Spawn the background loop and attach its channel senders to
    /// `controller` so every Store-mutating writer from here on pushes
    /// dirty events into this Maintainer instead of the queues sitting
    /// permanently empty.
    pub fn spawn(controller: Arc<CacheController>, interval: Duration) -> Self {
        let (record_tx, record_rx) = bounded(4096);
        let (interlink_tx, interlink_rx) = bounded(4096);
        controller.attach_maintainer_channels(record_tx.clone(), interlink_tx.clone());
        let running = Arc::new(AtomicBool::new(true));
        let worker_running = running.clone();
        let handle = thread::spawn(move || Self::run(controller, record_rx, interlink_rx, interval, worker_running));
        Maintainer {
            record_tx,
            interlink_tx,
            running,
            handle: Some(handle),
        }
    }

    pub fn record_sender(&self) -> Sender<DirtyRecord> {
        self.record_tx.clone()
    }

    pub fn interlink_sender(&self) -> Sender<DirtyInterlink> {
        self.interlink_tx.clone()
    }

    fn run(controller: Arc<CacheController>, record_rx: Receiver<DirtyRecord>, interlink_rx: Receiver<DirtyInterlink>, interval: Duration, running: Arc<AtomicBool>) {
        tracing::info!(?interval, "maintainer loop starting");
        while running.load(Ordering::Relaxed) {
            match record_rx.recv_timeout(interval) {
                Ok(event) => Self::handle_record(&controller, event),
                Err(RecvTimeoutError::Timeout) => tracing::trace!("maintainer woke on timeout, nothing queued"),
                Err(RecvTimeoutError::Disconnected) => break,
            }
            while let Ok(event) = interlink_rx.try_recv() {
                Self::handle_interlink(&controller, event);
            }
            controller.ensure_creator_sorts();
        }
        tracing::info!("maintainer loop stopped");
    }

    fn handle_record(controller: &CacheController, event: DirtyRecord) {
        tracing::trace!(table = %event.table, row_id = event.row_id, "record dirtied");
        for book_id in controller.books_referencing_row(&event.table, event.row_id) {
            controller.recompute_titles_aggregate(book_id);
        }
    }

    fn handle_interlink(controller: &CacheController, event: DirtyInterlink) {
        tracing::debug!(update_type = %event.update_type, table1 = %event.table1, table2 = %event.table2, "interlink dirtied");
        let _ = controller.clean(&event.table1);
        let _ = controller.clean(&event.table2);
    }

    /// Drain and process whatever is already queued without waiting for
    /// the interval, for deterministic tests.
    pub fn run_once_for_test(controller: &CacheController, record_rx: &Receiver<DirtyRecord>, interlink_rx: &Receiver<DirtyInterlink>) {
        while let Ok(event) = record_rx.try_recv() {
            Self::handle_record(controller, event);
        }
        while let Ok(event) = interlink_rx.try_recv() {
            Self::handle_interlink(controller, event);
        }
    }
}

impl Drop for Maintainer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
