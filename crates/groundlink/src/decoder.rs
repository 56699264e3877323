//! Packet decoding.
//!
//! Each line on the wire is a comma-separated record whose first field is a
//! one-character tag:
//!
//! - `F` (full, primary link): 24 fields covering every sensor.
//! - `S` (survival, backup link): 6 fields with packet id, mission time and
//!   GPS position.
//!
//! Decoding is all-or-nothing. A missing field, an unparsable number or an
//! unknown tag rejects the whole line; the decoder never returns a
//! partially-filled record and never substitutes zero for a missing value.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::telemetry::{MissionState, ParsedPacket, SurvivalPacket, TelemetrySnapshot};

/// Number of fields in an `F` record, tag included.
pub const FULL_FIELD_COUNT: usize = 24;

/// Number of fields in an `S` record, tag included.
pub const SURVIVAL_FIELD_COUNT: usize = 6;

/// Raw mission times above this value are read as milliseconds in `auto` mode.
pub const AUTO_MILLISECONDS_THRESHOLD: f64 = 1000.0;

const FULL_FIELDS: [&str; FULL_FIELD_COUNT] = [
    "tag",
    "packet_id",
    "mission_time",
    "altitude",
    "velocity_z",
    "acc_x",
    "acc_y",
    "acc_z",
    "gyro_x",
    "gyro_y",
    "gyro_z",
    "mag_x",
    "mag_y",
    "mag_z",
    "gps_lat",
    "gps_lng",
    "gps_alt",
    "gps_sats",
    "pressure",
    "temperature",
    "battery_voltage",
    "mission_state",
    "lora_rssi",
    "lora_snr",
];

const SURVIVAL_FIELDS: [&str; SURVIVAL_FIELD_COUNT] = [
    "tag",
    "packet_id",
    "mission_time",
    "gps_lat",
    "gps_lng",
    "altitude",
];

/// Why a line could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The line was empty.
    #[error("empty line")]
    Empty,

    /// The first field is not a known packet tag.
    #[error("unknown packet tag '{0}'")]
    UnknownTag(String),

    /// The record has the wrong number of fields for its tag.
    #[error("'{tag}' packet needs {expected} fields, found {found}")]
    FieldCount {
        /// Packet tag.
        tag: char,
        /// Required field count.
        expected: usize,
        /// Actual field count.
        found: usize,
    },

    /// A field is present but empty.
    #[error("field {index} ({name}) is missing")]
    MissingField {
        /// Position of the field.
        index: usize,
        /// Name of the field.
        name: &'static str,
    },

    /// A field is not a valid number of the expected type.
    #[error("field {index} ({name}) is not a valid number: '{value}'")]
    InvalidNumber {
        /// Position of the field.
        index: usize,
        /// Name of the field.
        name: &'static str,
        /// The offending text.
        value: String,
    },

    /// The mission state is outside the known range.
    #[error("mission state {0} is out of range 0-6")]
    InvalidMissionState(u8),
}

/// How the raw mission time field is interpreted.
///
/// Flight software has sent mission time both in seconds and in milliseconds
/// without saying which. `Auto` keeps compatibility with that hardware by
/// treating any value above 1000 as milliseconds; set an explicit unit when
/// the sender is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionTimeUnit {
    /// Values above 1000 are milliseconds, others seconds.
    #[default]
    Auto,
    /// Always seconds.
    Seconds,
    /// Always milliseconds.
    Milliseconds,
}

impl MissionTimeUnit {
    /// Convert a raw mission time into seconds.
    #[must_use]
    pub fn to_seconds(self, raw: f64) -> f64 {
        match self {
            Self::Auto if raw > AUTO_MILLISECONDS_THRESHOLD => raw / 1000.0,
            Self::Auto | Self::Seconds => raw,
            Self::Milliseconds => raw / 1000.0,
        }
    }
}

/// Positional view over one record's fields.
struct Fields<'a> {
    parts: Vec<&'a str>,
    names: &'static [&'static str],
}

impl Fields<'_> {
    fn raw(&self, index: usize) -> Result<&str, DecodeError> {
        let value = self.parts[index];
        if value.is_empty() {
            Err(DecodeError::MissingField {
                index,
                name: self.names[index],
            })
        } else {
            Ok(value)
        }
    }

    fn parse<T: FromStr>(&self, index: usize) -> Result<T, DecodeError> {
        let value = self.raw(index)?;
        value.parse().map_err(|_| DecodeError::InvalidNumber {
            index,
            name: self.names[index],
            value: value.to_string(),
        })
    }

    /// Infinite values are rejected here, NaN is left to the validator.
    fn float(&self, index: usize) -> Result<f64, DecodeError> {
        let value: f64 = self.parse(index)?;
        if value.is_infinite() {
            return Err(DecodeError::InvalidNumber {
                index,
                name: self.names[index],
                value: self.raw(index)?.to_string(),
            });
        }
        Ok(value)
    }
}

/// Decodes wire lines into [`ParsedPacket`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketDecoder {
    mission_time_unit: MissionTimeUnit,
}

impl PacketDecoder {
    /// Create a decoder with the given mission time interpretation.
    #[must_use]
    pub fn new(mission_time_unit: MissionTimeUnit) -> Self {
        Self { mission_time_unit }
    }

    /// Decode one trimmed line received at `received_at_ms` (Unix epoch millis).
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] describing the first problem found.
    pub fn decode(&self, line: &str, received_at_ms: i64) -> Result<ParsedPacket, DecodeError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(DecodeError::Empty);
        }

        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        match parts[0] {
            "F" => self
                .decode_full(parts, received_at_ms)
                .map(ParsedPacket::Full),
            "S" => self
                .decode_survival(parts, received_at_ms)
                .map(ParsedPacket::Survival),
            other => Err(DecodeError::UnknownTag(other.to_string())),
        }
    }

    fn decode_full(
        &self,
        parts: Vec<&str>,
        received_at_ms: i64,
    ) -> Result<TelemetrySnapshot, DecodeError> {
        if parts.len() != FULL_FIELD_COUNT {
            return Err(DecodeError::FieldCount {
                tag: 'F',
                expected: FULL_FIELD_COUNT,
                found: parts.len(),
            });
        }
        let f = Fields {
            parts,
            names: &FULL_FIELDS,
        };

        let raw_state: u8 = f.parse(21)?;
        let mission_state =
            MissionState::try_from(raw_state).map_err(DecodeError::InvalidMissionState)?;

        Ok(TelemetrySnapshot {
            packet_id: f.parse(1)?,
            mission_time: self.mission_time_unit.to_seconds(f.float(2)?),
            altitude: f.float(3)?,
            velocity_z: f.float(4)?,
            acc_x: f.float(5)?,
            acc_y: f.float(6)?,
            acc_z: f.float(7)?,
            gyro_x: f.float(8)?,
            gyro_y: f.float(9)?,
            gyro_z: f.float(10)?,
            mag_x: f.float(11)?,
            mag_y: f.float(12)?,
            mag_z: f.float(13)?,
            gps_lat: f.float(14)?,
            gps_lng: f.float(15)?,
            gps_alt: f.float(16)?,
            gps_sats: f.parse(17)?,
            pressure: f.float(18)?,
            temperature: f.float(19)?,
            battery_voltage: f.float(20)?,
            mission_state,
            lora_rssi: f.float(22)?,
            lora_snr: f.float(23)?,
            timestamp: received_at_ms,
        })
    }

    fn decode_survival(
        &self,
        parts: Vec<&str>,
        received_at_ms: i64,
    ) -> Result<SurvivalPacket, DecodeError> {
        if parts.len() != SURVIVAL_FIELD_COUNT {
            return Err(DecodeError::FieldCount {
                tag: 'S',
                expected: SURVIVAL_FIELD_COUNT,
                found: parts.len(),
            });
        }
        let f = Fields {
            parts,
            names: &SURVIVAL_FIELDS,
        };

        Ok(SurvivalPacket {
            packet_id: f.parse(1)?,
            mission_time: self.mission_time_unit.to_seconds(f.float(2)?),
            gps_lat: f.float(3)?,
            gps_lng: f.float(4)?,
            altitude: f.float(5)?,
            timestamp: received_at_ms,
        })
    }
}
