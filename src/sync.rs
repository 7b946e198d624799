//! Periodic background sync of the unified timeline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::TimelineConfig;
use crate::error::Result;
use crate::timeline::Timeline;

/// Running sync loop. Stops on [`SyncHandle::stop`] or when dropped.
pub struct SyncHandle {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    completed: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
}

impl SyncHandle {
    /// Sync every `interval`, starting one interval after spawn.
    pub fn spawn(timeline: Arc<Timeline>, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let completed = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let completed_in = Arc::clone(&completed);
        let failed_in = Arc::clone(&failed);

        let thread = thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => match timeline.sync() {
                    Ok(snapshot) => {
                        completed_in.fetch_add(1, Ordering::SeqCst);
                        tracing::debug!(entries = snapshot.entry_count, "background sync");
                    }
                    Err(err) => {
                        failed_in.fetch_add(1, Ordering::SeqCst);
                        tracing::warn!(error = %err, "background sync failed");
                    }
                },
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
            completed,
            failed,
        }
    }

    /// Spawn with the configured interval when `auto_sync` is on.
    pub fn from_config(timeline: Arc<Timeline>, config: &TimelineConfig) -> Result<Option<Self>> {
        if !config.auto_sync {
            return Ok(None);
        }
        let interval = config.sync_interval()?;
        Ok(Some(Self::spawn(timeline, interval)))
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("background sync thread panicked");
            }
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
