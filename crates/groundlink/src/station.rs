//! Ground station sessions.
//!
//! [`GroundStation`] owns the observable feed and a handle to the persistence
//! worker, and runs at most one connection at a time. Each connection gets a
//! fresh [`Pipeline`] driven by a single task that selects over:
//!
//! - cancellation (disconnect),
//! - control commands (mission reset),
//! - transport reads,
//! - the heartbeat interval,
//! - the flush deadline of the pending partial batch.
//!
//! Lines are processed strictly in arrival order. When the loop stops, for
//! whatever reason, pending snapshots are flushed before the pipeline is
//! dropped. A transport that reaches end of stream or fails ends the session;
//! reconnecting is an explicit [`GroundStation::connect`].

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::heartbeat::LinkStatus;
use crate::persistence::{PersistenceEvent, PersistenceHandle};
use crate::pipeline::{Pipeline, PipelineStats, TelemetryFeed};
use crate::source::Source;
use crate::telemetry::TelemetrySnapshot;

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// [`GroundStation::disconnect`] was called.
    Disconnected,
    /// The transport reached end of stream.
    TransportClosed,
    /// A transport read failed.
    TransportFailed(String),
}

/// Outcome of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    /// Why the session stopped.
    pub end: SessionEnd,
    /// Final statistics, after the last flush.
    pub stats: PipelineStats,
}

#[derive(Debug)]
enum SessionControl {
    ResetMission(oneshot::Sender<Result<()>>),
}

#[derive(Debug)]
struct Session {
    cancel: CancellationToken,
    control: mpsc::UnboundedSender<SessionControl>,
    task: JoinHandle<SessionReport>,
}

#[derive(Debug, Clone, Copy)]
struct SessionTiming {
    read_chunk_size: usize,
    heartbeat_interval: Duration,
}

/// Runs ingestion sessions and exposes their live state.
#[derive(Debug)]
pub struct GroundStation {
    config: Config,
    persistence: PersistenceHandle,
    feed: TelemetryFeed,
    session: Option<Session>,
}

impl GroundStation {
    /// Create a station that hands batches to `persistence`.
    #[must_use]
    pub fn new(config: Config, persistence: PersistenceHandle) -> Self {
        Self {
            config,
            persistence,
            feed: TelemetryFeed::new(),
            session: None,
        }
    }

    /// Open `source` and start a session on it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyConnected`] if a session is running, or a
    /// transport error if the source cannot be opened.
    pub async fn connect(&mut self, source: &Source) -> Result<()> {
        self.ensure_idle().await?;
        let stream = source.open().await?;
        self.connect_reader(stream).await
    }

    /// Start a session reading from `reader`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyConnected`] if a session is running.
    pub async fn connect_reader<R>(&mut self, reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.ensure_idle().await?;

        let pipeline = Pipeline::new(
            &self.config,
            self.persistence.clone(),
            self.feed.clone(),
            Instant::now(),
        );
        let timing = SessionTiming {
            read_chunk_size: self.config.framer.read_chunk_size,
            heartbeat_interval: self.config.heartbeat_interval(),
        };
        let cancel = CancellationToken::new();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_session(
            reader,
            pipeline,
            cancel.clone(),
            control_rx,
            timing,
        ));

        info!("Session started");
        self.session = Some(Session {
            cancel,
            control: control_tx,
            task,
        });
        Ok(())
    }

    /// Stop the running session, flush it and reset the observable state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if there is no session.
    pub async fn disconnect(&mut self) -> Result<SessionReport> {
        let session = self.session.take().ok_or(Error::NotConnected)?;
        session.cancel.cancel();
        let report = session
            .task
            .await
            .map_err(|e| Error::internal(format!("session task failed: {e}")))?;

        self.feed.reset();
        info!(end = ?report.end, "Session stopped");
        Ok(report)
    }

    /// Wait for the running session to end on its own.
    ///
    /// Cancel safe: dropping the returned future leaves the session running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if there is no session.
    pub async fn wait(&mut self) -> Result<SessionReport> {
        let session = self.session.as_mut().ok_or(Error::NotConnected)?;
        let result = (&mut session.task).await;
        self.session = None;

        let report = result.map_err(|e| Error::internal(format!("session task failed: {e}")))?;
        self.feed.reset();
        info!(end = ?report.end, "Session ended");
        Ok(report)
    }

    /// Start a new mission.
    ///
    /// With a session running, pending snapshots are flushed, link and merge
    /// state is dropped, and stored records are cleared after the flushed
    /// batch. Without one, stored records are cleared and the observable state
    /// is reset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PersistenceClosed`] if the persistence worker has
    /// stopped.
    pub async fn reset_mission(&mut self) -> Result<()> {
        if let Some(session) = &self.session {
            let (reply_tx, reply_rx) = oneshot::channel();
            if session
                .control
                .send(SessionControl::ResetMission(reply_tx))
                .is_ok()
            {
                if let Ok(result) = reply_rx.await {
                    return result;
                }
            }
            debug!("Session already finished, resetting without it");
        }

        self.persistence.clear()?;
        self.feed.reset();
        info!("Mission reset");
        Ok(())
    }

    /// Whether a session task is running.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| !session.task.is_finished())
    }

    /// Copy of the current composite snapshot.
    #[must_use]
    pub fn current_snapshot(&self) -> Option<TelemetrySnapshot> {
        self.feed.current_snapshot()
    }

    /// Copy of the current link status.
    #[must_use]
    pub fn link_status(&self) -> LinkStatus {
        self.feed.link_status()
    }

    /// Copy of the current session statistics.
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        self.feed.stats()
    }

    /// Receiver for the composite snapshot.
    #[must_use]
    pub fn subscribe_snapshot(&self) -> watch::Receiver<Option<TelemetrySnapshot>> {
        self.feed.subscribe_snapshot()
    }

    /// Receiver for link liveness.
    #[must_use]
    pub fn subscribe_links(&self) -> watch::Receiver<LinkStatus> {
        self.feed.subscribe_links()
    }

    /// Receiver for session statistics.
    #[must_use]
    pub fn subscribe_stats(&self) -> watch::Receiver<PipelineStats> {
        self.feed.subscribe_stats()
    }

    /// Receiver for persistence outcomes.
    #[must_use]
    pub fn subscribe_persistence_events(&self) -> broadcast::Receiver<PersistenceEvent> {
        self.persistence.subscribe_events()
    }

    /// Clean up a session that ended on its own so a new one can start.
    async fn ensure_idle(&mut self) -> Result<()> {
        match &self.session {
            Some(session) if !session.task.is_finished() => Err(Error::AlreadyConnected),
            Some(_) => {
                let report = self.wait().await?;
                debug!(end = ?report.end, "Collected finished session");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for GroundStation {
    fn drop(&mut self) {
        // The detached task still flushes before it exits
        if let Some(session) = &self.session {
            session.cancel.cancel();
        }
    }
}

async fn run_session<R>(
    mut reader: R,
    mut pipeline: Pipeline,
    cancel: CancellationToken,
    mut control: mpsc::UnboundedReceiver<SessionControl>,
    timing: SessionTiming,
) -> SessionReport
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; timing.read_chunk_size.max(1)];

    let mut heartbeat = tokio::time::interval(timing.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let end = loop {
        let flush_at = pipeline.flush_deadline();
        tokio::select! {
            () = cancel.cancelled() => break SessionEnd::Disconnected,

            Some(command) = control.recv() => match command {
                SessionControl::ResetMission(reply) => {
                    let _ = reply.send(pipeline.reset_mission(Instant::now()));
                }
            },

            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    info!("Transport reached end of stream");
                    break SessionEnd::TransportClosed;
                }
                Ok(n) => {
                    pipeline.ingest(&buf[..n], Instant::now());
                }
                Err(e) => {
                    warn!(error = %e, "Transport read failed");
                    break SessionEnd::TransportFailed(e.to_string());
                }
            },

            _ = heartbeat.tick() => {
                pipeline.on_heartbeat_tick(Instant::now());
            }

            () = tokio::time::sleep_until(flush_at.unwrap_or_else(Instant::now)),
                if flush_at.is_some() =>
            {
                pipeline.on_flush_tick(Instant::now());
            }
        }
    };

    let stats = pipeline.finish(Instant::now());
    SessionReport { end, stats }
}
