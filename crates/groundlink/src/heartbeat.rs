//! Per-link liveness tracking.
//!
//! Each valid packet refreshes the last-seen time of the link it arrived on.
//! The `active` flag is level-triggered: it only changes when
//! [`LinkHeartbeatMonitor::tick`] runs, which the session drives from its own
//! interval. A link whose last packet is at least `timeout` old at a tick is
//! reported inactive; a packet followed by a tick makes it active again.
//! Links that hover around the timeout therefore flap between the two states.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::telemetry::Link;

/// Read-only view of one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LinkReport {
    /// Whether a packet arrived within the timeout as of the last tick.
    pub active: bool,
    /// Wall-clock time of the most recent packet.
    pub last_seen: Option<DateTime<Utc>>,
}

/// Read-only view of both links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LinkStatus {
    /// Primary (`F`) link.
    pub primary: LinkReport,
    /// Backup (`S`) link.
    pub backup: LinkReport,
}

impl LinkStatus {
    /// Report for one link.
    #[must_use]
    pub fn get(&self, link: Link) -> LinkReport {
        match link {
            Link::Primary => self.primary,
            Link::Backup => self.backup,
        }
    }

    /// Whether at least one link is active.
    #[must_use]
    pub fn any_active(&self) -> bool {
        self.primary.active || self.backup.active
    }
}

/// A change in a link's `active` flag, produced by a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTransition {
    /// The link that changed.
    pub link: Link,
    /// The new state.
    pub active: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct LinkState {
    last_seen: Option<Instant>,
    last_seen_wall: Option<DateTime<Utc>>,
    active: bool,
}

/// Tracks liveness of the primary and backup links.
#[derive(Debug)]
pub struct LinkHeartbeatMonitor {
    links: [LinkState; 2],
    timeout: Duration,
}

impl LinkHeartbeatMonitor {
    /// Create a monitor with both links never seen.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            links: [LinkState::default(); 2],
            timeout,
        }
    }

    /// Record a packet on `link`. Does not change `active` until the next tick.
    pub fn record(&mut self, link: Link, now: Instant, wall: DateTime<Utc>) {
        let state = &mut self.links[link.index()];
        state.last_seen = Some(now);
        state.last_seen_wall = Some(wall);
    }

    /// Recompute both `active` flags and return the links that changed.
    pub fn tick(&mut self, now: Instant) -> Vec<LinkTransition> {
        let mut transitions = Vec::new();
        for link in Link::ALL {
            let state = &mut self.links[link.index()];
            let active = state
                .last_seen
                .is_some_and(|seen| now.saturating_duration_since(seen) < self.timeout);
            if active != state.active {
                state.active = active;
                transitions.push(LinkTransition { link, active });
            }
        }
        transitions
    }

    /// Forget both links. They become inactive immediately.
    pub fn reset(&mut self) {
        self.links = [LinkState::default(); 2];
    }

    /// Whether `link` was active at the last tick.
    #[must_use]
    pub fn is_active(&self, link: Link) -> bool {
        self.links[link.index()].active
    }

    /// Copy of the current state.
    #[must_use]
    pub fn status(&self) -> LinkStatus {
        let report = |link: Link| {
            let state = &self.links[link.index()];
            LinkReport {
                active: state.active,
                last_seen: state.last_seen_wall,
            }
        };
        LinkStatus {
            primary: report(Link::Primary),
            backup: report(Link::Backup),
        }
    }

    /// The configured timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
