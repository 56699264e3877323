//! Batching of snapshots ahead of persistence.
//!
//! A batch is flushed when it reaches `batch_size` records or when
//! `flush_interval` has passed since the previous flush, whichever comes
//! first. Flushing swaps in a fresh `Vec` and hands the filled one to the
//! caller by value. The time trigger is exposed as a [`IngestBuffer::deadline`]
//! so the session loop can sleep until exactly that instant.

use std::time::Duration;

use tokio::time::Instant;

use crate::telemetry::TelemetrySnapshot;

/// An ordered group of snapshots handed to the persistence sink together.
pub type Batch = Vec<TelemetrySnapshot>;

/// Size- and time-triggered snapshot buffer.
#[derive(Debug)]
pub struct IngestBuffer {
    pending: Batch,
    batch_size: usize,
    flush_interval: Duration,
    last_flush: Instant,
}

impl IngestBuffer {
    /// Create an empty buffer whose flush timer starts at `now`.
    #[must_use]
    pub fn new(batch_size: usize, flush_interval: Duration, now: Instant) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            pending: Vec::with_capacity(batch_size),
            batch_size,
            flush_interval,
            last_flush: now,
        }
    }

    /// Append a snapshot. Returns a full batch once `batch_size` is reached.
    pub fn push(&mut self, snapshot: TelemetrySnapshot, now: Instant) -> Option<Batch> {
        self.pending.push(snapshot);
        if self.pending.len() >= self.batch_size {
            self.take(now)
        } else {
            None
        }
    }

    /// Flush a non-empty batch if its deadline has passed.
    pub fn tick(&mut self, now: Instant) -> Option<Batch> {
        match self.deadline() {
            Some(deadline) if now >= deadline => self.take(now),
            _ => None,
        }
    }

    /// When the pending snapshots become due, `None` while nothing is pending.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.last_flush + self.flush_interval)
        }
    }

    /// Flush whatever is pending regardless of size or age.
    pub fn force_flush(&mut self, now: Instant) -> Option<Batch> {
        if self.pending.is_empty() {
            self.last_flush = now;
            None
        } else {
            self.take(now)
        }
    }

    /// Number of pending snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The size threshold.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn take(&mut self, now: Instant) -> Option<Batch> {
        self.last_flush = now;
        let fresh = Vec::with_capacity(self.batch_size);
        Some(std::mem::replace(&mut self.pending, fresh))
    }
}
