//! Hold-last-value fusion of full and survival packets.
//!
//! The primary link delivers complete records; the backup link only delivers
//! position. The merger keeps the last full record and lays each survival
//! packet over a copy of it, so the composite snapshot always carries the most
//! recent value seen for every field. Values held this way never expire.

use crate::telemetry::{ParsedPacket, TelemetrySnapshot};

/// Builds composite snapshots from validated packets.
#[derive(Debug, Default)]
pub struct TelemetryMerger {
    last_full: Option<TelemetrySnapshot>,
    has_data: bool,
}

impl TelemetryMerger {
    /// Create an empty merger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fuse `packet` with the held state and return the resulting snapshot.
    ///
    /// A full packet replaces the held record and is returned unchanged. A
    /// survival packet overwrites packet id, mission time, timestamp, latitude,
    /// longitude and both altitudes on a copy of the held record, or on bare
    /// defaults when no full record has been seen. Survival packets never
    /// replace the held record.
    pub fn merge(&mut self, packet: ParsedPacket) -> TelemetrySnapshot {
        self.has_data = true;
        match packet {
            ParsedPacket::Full(snapshot) => {
                self.last_full = Some(snapshot.clone());
                snapshot
            }
            ParsedPacket::Survival(survival) => match &self.last_full {
                Some(last) => {
                    let mut snapshot = last.clone();
                    survival.apply_to(&mut snapshot);
                    snapshot
                }
                None => survival.to_snapshot(),
            },
        }
    }

    /// Whether any packet has been merged since creation or the last reset.
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.has_data
    }

    /// The held full record, if any.
    #[must_use]
    pub fn last_full(&self) -> Option<&TelemetrySnapshot> {
        self.last_full.as_ref()
    }

    /// Drop the held record.
    pub fn reset(&mut self) {
        self.last_full = None;
        self.has_data = false;
    }
}
