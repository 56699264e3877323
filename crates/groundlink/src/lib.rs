//! `groundlink` - Rocket telemetry ingestion for a ground station
//!
//! This library turns the byte stream from a rocket's redundant radio links
//! into validated, fused telemetry records. The stages, in data-flow order:
//!
//! 1. [`framer`] splits the stream into lines.
//! 2. [`decoder`] turns a line into a full (`F`) or survival (`S`) packet.
//! 3. [`validator`] accepts or rejects the packet.
//! 4. [`heartbeat`] tracks liveness of each link.
//! 5. [`merger`] fuses packets into a composite snapshot.
//! 6. [`buffer`] batches snapshots for [`persistence`].
//!
//! [`station::GroundStation`] runs one connection at a time on top of a
//! [`pipeline::Pipeline`].

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod buffer;
pub mod cli;
pub mod config;
pub mod decoder;
pub mod error;
pub mod framer;
pub mod heartbeat;
pub mod logging;
pub mod merger;
pub mod persistence;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod station;
pub mod storage;
pub mod telemetry;
pub mod validator;

pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use persistence::{PersistenceEvent, PersistenceHandle, PersistenceWorker};
pub use pipeline::{PipelineStats, TelemetryFeed};
pub use sink::{MemorySink, PersistenceSink};
pub use source::Source;
pub use station::{GroundStation, SessionEnd, SessionReport};
pub use storage::{Storage, StorageStats};
pub use telemetry::{Link, MissionState, ParsedPacket, SurvivalPacket, TelemetrySnapshot};
