//! Persistence worker.
//!
//! The sink is owned by a single worker running on tokio's blocking pool so
//! that SQLite writes never stall the ingestion loop. Callers talk to it
//! through a cloneable [`PersistenceHandle`] over an unbounded command
//! channel; commands are applied in the order they were sent.
//!
//! Sending never blocks and never drops a batch. The number of batches waiting
//! in the channel is tracked and a warning is logged whenever it exceeds the
//! configured threshold. Outcomes are published on a broadcast channel; a
//! batch that fails to store is reported there and not retried.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::buffer::Batch;
use crate::config::BufferConfig;
use crate::error::{Error, Result};
use crate::sink::PersistenceSink;

/// Commands accepted by the persistence worker.
#[derive(Debug)]
pub enum PersistenceCommand {
    /// Store a batch.
    Upsert(Batch),
    /// Remove every stored record.
    Clear,
    /// Report the stored record count.
    Count(oneshot::Sender<Result<u64>>),
    /// Stop the worker after everything queued before it.
    Shutdown,
}

/// Outcome notifications from the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceEvent {
    /// A batch was stored.
    Stored {
        /// Records written.
        records: usize,
    },
    /// A batch or clear failed. The affected data is not retried.
    Failed {
        /// Records in the failed batch; zero for a failed clear.
        records: usize,
        /// Error description.
        error: String,
    },
    /// Stored records were cleared.
    Cleared,
}

/// Cloneable handle to the persistence worker.
#[derive(Debug, Clone)]
pub struct PersistenceHandle {
    tx: mpsc::UnboundedSender<PersistenceCommand>,
    events: broadcast::Sender<PersistenceEvent>,
    backlog: Arc<AtomicUsize>,
    backlog_warn_threshold: usize,
}

impl PersistenceHandle {
    /// Queue a batch for storage. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PersistenceClosed`] if the worker has stopped.
    pub fn upsert(&self, batch: Batch) -> Result<()> {
        let records = batch.len();
        let depth = self.backlog.fetch_add(1, Ordering::Relaxed) + 1;
        if self.tx.send(PersistenceCommand::Upsert(batch)).is_err() {
            self.backlog.fetch_sub(1, Ordering::Relaxed);
            return Err(Error::PersistenceClosed);
        }

        if depth > self.backlog_warn_threshold {
            warn!(
                depth,
                threshold = self.backlog_warn_threshold,
                "Persistence backlog growing"
            );
        }
        debug!(records, depth, "Queued batch for persistence");
        Ok(())
    }

    /// Queue a clear of all stored records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PersistenceClosed`] if the worker has stopped.
    pub fn clear(&self) -> Result<()> {
        self.tx
            .send(PersistenceCommand::Clear)
            .map_err(|_| Error::PersistenceClosed)
    }

    /// Stored record count, after every previously queued command has run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PersistenceClosed`] if the worker has stopped, or the
    /// sink's error if the count failed.
    pub async fn count(&self) -> Result<u64> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PersistenceCommand::Count(reply_tx))
            .map_err(|_| Error::PersistenceClosed)?;
        reply_rx.await.map_err(|_| Error::PersistenceClosed)?
    }

    /// Subscribe to outcome notifications.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<PersistenceEvent> {
        self.events.subscribe()
    }

    /// Number of batches queued but not yet processed.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::Relaxed)
    }

    /// Whether the worker is still accepting commands.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// The running worker: a handle plus the task that owns the sink.
#[derive(Debug)]
pub struct PersistenceWorker {
    handle: PersistenceHandle,
    task: JoinHandle<()>,
}

impl PersistenceWorker {
    /// Start a worker owning `sink`.
    #[must_use]
    pub fn spawn(sink: impl PersistenceSink + 'static, config: &BufferConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let backlog = Arc::new(AtomicUsize::new(0));

        let service = PersistenceService {
            sink: Box::new(sink),
            rx,
            events: events.clone(),
            backlog: Arc::clone(&backlog),
        };
        let task = tokio::task::spawn_blocking(move || service.run());

        Self {
            handle: PersistenceHandle {
                tx,
                events,
                backlog,
                backlog_warn_threshold: config.backlog_warn_threshold,
            },
            task,
        }
    }

    /// A new handle to the worker.
    #[must_use]
    pub fn handle(&self) -> PersistenceHandle {
        self.handle.clone()
    }

    /// Stop the worker once everything queued so far has been applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker task panicked.
    pub async fn shutdown(self) -> Result<()> {
        // Already stopped is fine; the join below still reports panics
        let _ = self.handle.tx.send(PersistenceCommand::Shutdown);
        self.task
            .await
            .map_err(|e| Error::internal(format!("persistence worker failed: {e}")))
    }
}

struct PersistenceService {
    sink: Box<dyn PersistenceSink>,
    rx: mpsc::UnboundedReceiver<PersistenceCommand>,
    events: broadcast::Sender<PersistenceEvent>,
    backlog: Arc<AtomicUsize>,
}

impl PersistenceService {
    fn run(mut self) {
        debug!("Persistence worker started");

        while let Some(command) = self.rx.blocking_recv() {
            match command {
                PersistenceCommand::Upsert(batch) => {
                    let records = batch.len();
                    let event = match self.sink.upsert(batch) {
                        Ok(written) => PersistenceEvent::Stored { records: written },
                        Err(e) => {
                            error!(records, error = %e, "Failed to persist batch");
                            PersistenceEvent::Failed {
                                records,
                                error: e.to_string(),
                            }
                        }
                    };
                    self.backlog.fetch_sub(1, Ordering::Relaxed);
                    // No subscribers is not an error
                    let _ = self.events.send(event);
                }
                PersistenceCommand::Clear => {
                    let event = match self.sink.clear() {
                        Ok(()) => {
                            info!("Stored telemetry cleared");
                            PersistenceEvent::Cleared
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to clear stored telemetry");
                            PersistenceEvent::Failed {
                                records: 0,
                                error: e.to_string(),
                            }
                        }
                    };
                    let _ = self.events.send(event);
                }
                PersistenceCommand::Count(reply) => {
                    let _ = reply.send(self.sink.count());
                }
                PersistenceCommand::Shutdown => break,
            }
        }

        debug!("Persistence worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{MemorySink, SnapshotIter};
    use crate::telemetry::TelemetrySnapshot;

    fn batch(ids: std::ops::Range<i64>) -> Batch {
        ids.map(|packet_id| TelemetrySnapshot {
            packet_id,
            timestamp: 1,
            ..TelemetrySnapshot::default()
        })
        .collect()
    }

    /// Fails its first upsert, then delegates.
    struct FlakySink {
        inner: MemorySink,
        failed: bool,
    }

    impl PersistenceSink for FlakySink {
        fn upsert(&mut self, batch: Batch) -> Result<usize> {
            if !self.failed {
                self.failed = true;
                return Err(Error::internal("disk full"));
            }
            self.inner.upsert(batch)
        }

        fn clear(&mut self) -> Result<()> {
            self.inner.clear()
        }

        fn count(&self) -> Result<u64> {
            self.inner.count()
        }

        fn stream_all(&self) -> Result<SnapshotIter<'_>> {
            self.inner.stream_all()
        }
    }

    #[tokio::test]
    async fn test_upsert_then_count() {
        let sink = MemorySink::new();
        let worker = PersistenceWorker::spawn(sink.clone(), &BufferConfig::default());
        let handle = worker.handle();

        handle.upsert(batch(0..10)).unwrap();
        handle.upsert(batch(5..15)).unwrap();
        assert_eq!(handle.count().await.unwrap(), 15);
        assert_eq!(handle.backlog(), 0);

        worker.shutdown().await.unwrap();
        assert_eq!(sink.count().unwrap(), 15);
    }

    #[tokio::test]
    async fn test_events_are_published() {
        let worker = PersistenceWorker::spawn(MemorySink::new(), &BufferConfig::default());
        let handle = worker.handle();
        let mut events = handle.subscribe_events();

        handle.upsert(batch(0..3)).unwrap();
        handle.clear().unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            PersistenceEvent::Stored { records: 3 }
        );
        assert_eq!(events.recv().await.unwrap(), PersistenceEvent::Cleared);
        assert_eq!(handle.count().await.unwrap(), 0);

        worker.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_batch_is_reported_and_not_retried() {
        crate::logging::init_test_logging();
        let inner = MemorySink::new();
        let sink = FlakySink {
            inner: inner.clone(),
            failed: false,
        };
        let worker = PersistenceWorker::spawn(sink, &BufferConfig::default());
        let handle = worker.handle();
        let mut events = handle.subscribe_events();

        handle.upsert(batch(0..4)).unwrap();
        handle.upsert(batch(4..6)).unwrap();

        match events.recv().await.unwrap() {
            PersistenceEvent::Failed { records, error } => {
                assert_eq!(records, 4);
                assert!(error.contains("disk full"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(
            events.recv().await.unwrap(),
            PersistenceEvent::Stored { records: 2 }
        );

        worker.shutdown().await.unwrap();
        let ids: Vec<i64> = inner.records().unwrap().iter().map(|s| s.packet_id).collect();
        assert_eq!(ids, vec![4, 5]);
    }

    #[tokio::test]
    async fn test_clear_runs_after_earlier_batches() {
        let sink = MemorySink::new();
        let worker = PersistenceWorker::spawn(sink.clone(), &BufferConfig::default());
        let handle = worker.handle();

        handle.upsert(batch(0..100)).unwrap();
        handle.clear().unwrap();
        handle.upsert(batch(200..201)).unwrap();
        worker.shutdown().await.unwrap();

        let ids: Vec<i64> = sink.records().unwrap().iter().map(|s| s.packet_id).collect();
        assert_eq!(ids, vec![200]);
    }

    #[tokio::test]
    async fn test_closed_after_shutdown() {
        let worker = PersistenceWorker::spawn(MemorySink::new(), &BufferConfig::default());
        let handle = worker.handle();
        worker.shutdown().await.unwrap();

        assert!(!handle.is_running());
        assert!(matches!(
            handle.upsert(batch(0..1)),
            Err(Error::PersistenceClosed)
        ));
        assert_eq!(handle.backlog(), 0);
        assert!(matches!(handle.count().await, Err(Error::PersistenceClosed)));
    }

    #[tokio::test]
    async fn test_upsert_never_blocks_on_large_backlog() {
        let config = BufferConfig {
            backlog_warn_threshold: 2,
            ..BufferConfig::default()
        };
        let sink = MemorySink::new();
        let worker = PersistenceWorker::spawn(sink.clone(), &config);
        let handle = worker.handle();

        for i in 0..50 {
            handle.upsert(batch(i * 10..i * 10 + 10)).unwrap();
        }
        assert_eq!(handle.count().await.unwrap(), 500);

        worker.shutdown().await.unwrap();
    }
}
