//! Per-connection ingestion state.
//!
//! A [`Pipeline`] owns every stateful stage for one connection: framer,
//! decoder, validator, heartbeat monitor, merger and ingest buffer. It is
//! built fresh on connect and dropped on disconnect, so nothing survives from
//! one session to the next except what was handed to persistence.
//!
//! Observable state (current snapshot, link status, statistics) is published
//! through a [`TelemetryFeed`] of `watch` channels. The pipeline is the only
//! writer; readers receive copies.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

use crate::buffer::{Batch, IngestBuffer};
use crate::config::Config;
use crate::decoder::PacketDecoder;
use crate::error::Result;
use crate::framer::{ByteStreamFramer, PushOutcome};
use crate::heartbeat::{LinkHeartbeatMonitor, LinkStatus, LinkTransition};
use crate::merger::TelemetryMerger;
use crate::persistence::PersistenceHandle;
use crate::telemetry::{ParsedPacket, TelemetrySnapshot};
use crate::validator::Validator;

/// Counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Non-empty lines seen.
    pub lines: u64,
    /// Packets that decoded and validated.
    pub valid: u64,
    /// Lines discarded for any reason.
    pub invalid: u64,
    /// Lines that failed to decode.
    pub decode_failures: u64,
    /// Packets that failed validation.
    pub validation_failures: u64,
    /// Framer overflow events.
    pub framing_overflows: u64,
    /// Bytes dropped by framer overflows.
    pub bytes_discarded: u64,
    /// Valid `F` packets.
    pub full_packets: u64,
    /// Valid `S` packets.
    pub survival_packets: u64,
    /// Batches handed to persistence.
    pub batches_flushed: u64,
    /// Records handed to persistence.
    pub records_flushed: u64,
    /// Batches that could not be handed off because persistence had stopped.
    pub handoff_failures: u64,
}

/// Single-writer, multi-reader view of the live session.
#[derive(Debug, Clone)]
pub struct TelemetryFeed {
    snapshot: Arc<watch::Sender<Option<TelemetrySnapshot>>>,
    links: Arc<watch::Sender<LinkStatus>>,
    stats: Arc<watch::Sender<PipelineStats>>,
}

impl Default for TelemetryFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryFeed {
    /// Create a feed holding the initial (no data) state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshot: Arc::new(watch::channel(None).0),
            links: Arc::new(watch::channel(LinkStatus::default()).0),
            stats: Arc::new(watch::channel(PipelineStats::default()).0),
        }
    }

    /// Receiver for the composite snapshot. `None` until the first packet.
    #[must_use]
    pub fn subscribe_snapshot(&self) -> watch::Receiver<Option<TelemetrySnapshot>> {
        self.snapshot.subscribe()
    }

    /// Receiver for link liveness.
    #[must_use]
    pub fn subscribe_links(&self) -> watch::Receiver<LinkStatus> {
        self.links.subscribe()
    }

    /// Receiver for session statistics.
    #[must_use]
    pub fn subscribe_stats(&self) -> watch::Receiver<PipelineStats> {
        self.stats.subscribe()
    }

    /// Copy of the current composite snapshot.
    #[must_use]
    pub fn current_snapshot(&self) -> Option<TelemetrySnapshot> {
        self.snapshot.borrow().clone()
    }

    /// Copy of the current link status.
    #[must_use]
    pub fn link_status(&self) -> LinkStatus {
        *self.links.borrow()
    }

    /// Copy of the current statistics.
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        *self.stats.borrow()
    }

    /// Return snapshot and link status to their initial values.
    pub fn reset(&self) {
        self.snapshot.send_replace(None);
        self.links.send_replace(LinkStatus::default());
    }

    fn publish_snapshot(&self, snapshot: TelemetrySnapshot) {
        self.snapshot.send_replace(Some(snapshot));
    }

    fn publish_links(&self, status: LinkStatus) {
        self.links.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }

    fn publish_stats(&self, stats: PipelineStats) {
        self.stats.send_if_modified(|current| {
            let changed = *current != stats;
            *current = stats;
            changed
        });
    }
}

/// All per-connection ingestion state.
#[derive(Debug)]
pub struct Pipeline {
    framer: ByteStreamFramer,
    decoder: PacketDecoder,
    validator: Validator,
    heartbeat: LinkHeartbeatMonitor,
    merger: TelemetryMerger,
    buffer: IngestBuffer,
    stats: PipelineStats,
    persistence: PersistenceHandle,
    feed: TelemetryFeed,
}

impl Pipeline {
    /// Build a fresh pipeline.
    #[must_use]
    pub fn new(
        config: &Config,
        persistence: PersistenceHandle,
        feed: TelemetryFeed,
        now: Instant,
    ) -> Self {
        let pipeline = Self {
            framer: ByteStreamFramer::new(config.framer.max_buffer_len),
            decoder: PacketDecoder::new(config.decoder.mission_time_unit),
            validator: Validator::new(
                config.validation.policy,
                config.validation.limits.clone(),
            ),
            heartbeat: LinkHeartbeatMonitor::new(config.link_timeout()),
            merger: TelemetryMerger::new(),
            buffer: IngestBuffer::new(config.buffer.batch_size, config.flush_interval(), now),
            stats: PipelineStats::default(),
            persistence,
            feed,
        };
        pipeline.feed.publish_stats(pipeline.stats);
        pipeline
    }

    /// Feed one transport chunk through every stage.
    ///
    /// Returns the number of packets accepted from this chunk.
    pub fn ingest(&mut self, chunk: &[u8], now: Instant) -> usize {
        if let PushOutcome::Overflow { discarded } = self.framer.push(chunk) {
            self.stats.framing_overflows += 1;
            self.stats.bytes_discarded += discarded as u64;
        }

        let wall = Utc::now();
        let mut accepted = 0;
        while let Some(line) = self.framer.next_line() {
            if line.is_empty() {
                continue;
            }
            if self.process_line(&line, now, wall) {
                accepted += 1;
            }
        }

        self.feed.publish_stats(self.stats);
        accepted
    }

    fn process_line(&mut self, line: &str, now: Instant, wall: DateTime<Utc>) -> bool {
        self.stats.lines += 1;

        let packet = match self.decoder.decode(line, wall.timestamp_millis()) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.decode_failures += 1;
                self.stats.invalid += 1;
                debug!(error = %e, line, "Discarded undecodable line");
                return false;
            }
        };

        if let Err(e) = self.validator.validate(&packet) {
            self.stats.validation_failures += 1;
            self.stats.invalid += 1;
            debug!(error = %e, packet_id = packet.packet_id(), "Discarded invalid packet");
            return false;
        }

        let link = packet.link();
        trace!(packet_id = packet.packet_id(), %link, "Accepted packet");
        self.stats.valid += 1;
        match packet {
            ParsedPacket::Full(_) => self.stats.full_packets += 1,
            ParsedPacket::Survival(_) => self.stats.survival_packets += 1,
        }

        self.heartbeat.record(link, now, wall);
        let snapshot = self.merger.merge(packet);
        self.feed.publish_snapshot(snapshot.clone());

        if let Some(batch) = self.buffer.push(snapshot, now) {
            self.hand_off(batch);
        }
        true
    }

    fn hand_off(&mut self, batch: Batch) {
        let records = batch.len() as u64;
        match self.persistence.upsert(batch) {
            Ok(()) => {
                self.stats.batches_flushed += 1;
                self.stats.records_flushed += records;
            }
            Err(e) => {
                self.stats.handoff_failures += 1;
                error!(records, error = %e, "Dropped batch, persistence unavailable");
            }
        }
    }

    /// Recompute link liveness and publish it.
    pub fn on_heartbeat_tick(&mut self, now: Instant) -> Vec<LinkTransition> {
        let transitions = self.heartbeat.tick(now);
        for t in &transitions {
            if t.active {
                info!(link = %t.link, "Link active");
            } else {
                info!(link = %t.link, "Link lost");
            }
        }
        self.feed.publish_links(self.heartbeat.status());
        transitions
    }

    /// When the pending partial batch is due, `None` while nothing is pending.
    #[must_use]
    pub fn flush_deadline(&self) -> Option<Instant> {
        self.buffer.deadline()
    }

    /// Flush a partial batch if the flush interval has elapsed.
    pub fn on_flush_tick(&mut self, now: Instant) {
        if let Some(batch) = self.buffer.tick(now) {
            self.hand_off(batch);
        }
        self.feed.publish_stats(self.stats);
    }

    /// Start a new mission: flush what is pending, forget link and merge
    /// state, then clear storage after the flushed batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistence worker has stopped.
    pub fn reset_mission(&mut self, now: Instant) -> Result<()> {
        if let Some(batch) = self.buffer.force_flush(now) {
            self.hand_off(batch);
        }
        self.heartbeat.reset();
        self.merger.reset();
        self.feed.reset();
        self.feed.publish_stats(self.stats);

        self.persistence.clear()?;
        info!("Mission reset");
        Ok(())
    }

    /// Flush everything and return the final statistics.
    pub fn finish(mut self, now: Instant) -> PipelineStats {
        if let Some(batch) = self.buffer.force_flush(now) {
            self.hand_off(batch);
        }
        self.feed.publish_stats(self.stats);
        self.stats
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Current link status.
    #[must_use]
    pub fn link_status(&self) -> LinkStatus {
        self.heartbeat.status()
    }

    /// Whether any packet has been merged since the last reset.
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.merger.has_data()
    }

    /// Snapshots waiting for the next flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BufferConfig;
    use crate::persistence::PersistenceWorker;
    use crate::sink::{MemorySink, PersistenceSink};
    use crate::telemetry::{Link, MissionState, SEA_LEVEL_PRESSURE_HPA};
    use std::time::Duration;

    const FULL_100: &str = "F,100,12.0,50.0,3.2,0.1,0.2,9.8,0.01,0.02,0.03,20.0,-5.0,40.0,-25.33,-57.51,60,9,1001.5,24.5,12.1,3,-87,9.5\n";
    const SURVIVAL_101: &str = "S,101,12.5,-25.40,-57.60,65.0\n";

    struct Harness {
        pipeline: Pipeline,
        feed: TelemetryFeed,
        worker: PersistenceWorker,
        sink: MemorySink,
        t0: Instant,
    }

    fn harness(config: &Config) -> Harness {
        let sink = MemorySink::new();
        let worker = PersistenceWorker::spawn(sink.clone(), &BufferConfig::default());
        let feed = TelemetryFeed::new();
        let t0 = Instant::now();
        let pipeline = Pipeline::new(config, worker.handle(), feed.clone(), t0);
        Harness {
            pipeline,
            feed,
            worker,
            sink,
            t0,
        }
    }

    #[tokio::test]
    async fn test_full_then_survival_fusion() {
        let mut h = harness(&Config::default());
        let chunk = format!("{FULL_100}{SURVIVAL_101}");
        assert_eq!(h.pipeline.ingest(chunk.as_bytes(), h.t0), 2);

        let current = h.feed.current_snapshot().unwrap();
        assert_eq!(current.packet_id, 101);
        assert!((current.acc_x - 0.1).abs() < f64::EPSILON);
        assert!((current.battery_voltage - 12.1).abs() < f64::EPSILON);
        assert!((current.gps_alt - 65.0).abs() < f64::EPSILON);
        assert_eq!(current.mission_state, MissionState::Coast);

        let stats = h.pipeline.stats();
        assert_eq!(stats.valid, 2);
        assert_eq!(stats.full_packets, 1);
        assert_eq!(stats.survival_packets, 1);
        assert_eq!(h.pipeline.pending(), 2);
    }

    #[tokio::test]
    async fn test_invalid_lines_are_counted_and_skipped() {
        let mut h = harness(&Config::default());
        let chunk = b"garbage\n\nS,1,2\nS,-5,1,0,0,0\nS,6,1,0,0,0\r\n";
        assert_eq!(h.pipeline.ingest(chunk, h.t0), 1);

        let stats = h.pipeline.stats();
        assert_eq!(stats.lines, 4);
        assert_eq!(stats.decode_failures, 2);
        assert_eq!(stats.validation_failures, 1);
        assert_eq!(stats.invalid, 3);
        assert_eq!(stats.valid, 1);
        assert_eq!(h.feed.stats(), stats);
    }

    #[tokio::test]
    async fn test_line_split_across_chunks() {
        let mut h = harness(&Config::default());
        let (a, b) = FULL_100.split_at(40);
        assert_eq!(h.pipeline.ingest(a.as_bytes(), h.t0), 0);
        assert_eq!(h.pipeline.ingest(b.as_bytes(), h.t0), 1);
        assert_eq!(h.feed.current_snapshot().unwrap().packet_id, 100);
    }

    #[tokio::test]
    async fn test_size_flush_hands_off_batch() {
        let mut config = Config::default();
        config.buffer.batch_size = 3;
        let mut h = harness(&config);

        for id in 0..7 {
            let line = format!("S,{id},1.0,-25.3,-57.5,10\n");
            h.pipeline.ingest(line.as_bytes(), h.t0);
        }

        let stats = h.pipeline.stats();
        assert_eq!(stats.batches_flushed, 2);
        assert_eq!(stats.records_flushed, 6);
        assert_eq!(h.pipeline.pending(), 1);

        let handle = h.worker.handle();
        assert_eq!(handle.count().await.unwrap(), 6);
        h.worker.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_tick_hands_off_partial_batch() {
        let mut h = harness(&Config::default());
        h.pipeline.ingest(SURVIVAL_101.as_bytes(), h.t0);

        h.pipeline.on_flush_tick(h.t0 + Duration::from_millis(500));
        assert_eq!(h.pipeline.pending(), 1);

        h.pipeline.on_flush_tick(h.t0 + Duration::from_millis(1000));
        assert_eq!(h.pipeline.pending(), 0);
        assert_eq!(h.worker.handle().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_flush_deadline_tracks_pending() {
        let mut h = harness(&Config::default());
        assert_eq!(h.pipeline.flush_deadline(), None);

        h.pipeline.ingest(SURVIVAL_101.as_bytes(), h.t0);
        assert_eq!(
            h.pipeline.flush_deadline(),
            Some(h.t0 + Config::default().flush_interval())
        );

        h.pipeline.finish(h.t0);
        h.worker.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_heartbeat_tick_publishes_links() {
        let mut h = harness(&Config::default());
        let links = h.feed.subscribe_links();
        h.pipeline.ingest(FULL_100.as_bytes(), h.t0);

        let transitions = h.pipeline.on_heartbeat_tick(h.t0);
        assert_eq!(transitions.len(), 1);
        assert!(links.borrow().primary.active);
        assert!(!links.borrow().backup.active);

        h.pipeline.on_heartbeat_tick(h.t0 + Duration::from_millis(2000));
        assert!(!links.borrow().get(Link::Primary).active);
    }

    #[tokio::test]
    async fn test_reset_mission() {
        let mut h = harness(&Config::default());
        let chunk = format!("{FULL_100}{SURVIVAL_101}");
        h.pipeline.ingest(chunk.as_bytes(), h.t0);
        h.pipeline.on_heartbeat_tick(h.t0);

        h.pipeline.reset_mission(h.t0).unwrap();

        let status = h.pipeline.link_status();
        assert!(!status.primary.active);
        assert!(!status.backup.active);
        assert!(!h.pipeline.has_data());
        assert!(h.feed.current_snapshot().is_none());

        // S-only packet after reset carries defaults, not held values
        h.pipeline.ingest(b"S,200,1.0,-25.3,-57.5,10\n", h.t0);
        let current = h.feed.current_snapshot().unwrap();
        assert!(current.battery_voltage.abs() < f64::EPSILON);
        assert!((current.pressure - SEA_LEVEL_PRESSURE_HPA).abs() < f64::EPSILON);
        assert_eq!(current.mission_state, MissionState::PoweredFlight);

        // Flushed pre-reset batch was cleared behind it
        let stats = h.pipeline.finish(h.t0);
        assert_eq!(stats.batches_flushed, 2);
        h.worker.shutdown().await.unwrap();
        let ids: Vec<i64> = h.sink.records().unwrap().iter().map(|s| s.packet_id).collect();
        assert_eq!(ids, vec![200]);
    }

    #[tokio::test]
    async fn test_finish_flushes_pending() {
        let h = harness(&Config::default());
        let mut pipeline = h.pipeline;
        pipeline.ingest(FULL_100.as_bytes(), h.t0);
        let stats = pipeline.finish(h.t0);

        assert_eq!(stats.records_flushed, 1);
        h.worker.shutdown().await.unwrap();
        assert_eq!(h.sink.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_handoff_failure_is_counted() {
        let mut config = Config::default();
        config.buffer.batch_size = 1;
        let h = harness(&config);
        let mut pipeline = h.pipeline;
        h.worker.shutdown().await.unwrap();

        pipeline.ingest(SURVIVAL_101.as_bytes(), h.t0);
        assert_eq!(pipeline.stats().handoff_failures, 1);
        assert_eq!(pipeline.stats().records_flushed, 0);
    }

    #[tokio::test]
    async fn test_overflow_is_counted() {
        let mut config = Config::default();
        config.framer.max_buffer_len = 64;
        config.framer.read_chunk_size = 32;
        let mut h = harness(&config);

        h.pipeline.ingest(&[b'x'; 100], h.t0);
        let stats = h.pipeline.stats();
        assert_eq!(stats.framing_overflows, 1);
        assert_eq!(stats.bytes_discarded, 100);
    }

    #[tokio::test]
    async fn test_record_after_noise_burst_is_accepted() {
        let mut config = Config::default();
        config.framer.max_buffer_len = 64;
        config.framer.read_chunk_size = 32;
        let mut h = harness(&config);

        assert_eq!(h.pipeline.ingest(&[b'x'; 60], h.t0), 0);
        assert_eq!(h.pipeline.ingest(b"\nS,1,1.0,-25.3,-57.5,10\n", h.t0), 1);

        let stats = h.pipeline.stats();
        assert_eq!(stats.framing_overflows, 0);
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.valid, 1);
    }
}
