//! Packet validation.
//!
//! Two policies are available. [`ValidationPolicy::Structural`] checks only
//! what the record needs to be stored and displayed: a non-negative packet id,
//! a positive timestamp, a non-negative mission time and no NaN values.
//! [`ValidationPolicy::PhysicalLimits`] adds range checks against
//! [`PhysicalLimits`], as used by the earlier protocol revision.
//!
//! Values are never clamped. A packet is either accepted as-is or rejected.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Error, Result};
use crate::telemetry::{ParsedPacket, TelemetrySnapshot};

/// Which rule set the validator applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// Identity and NaN checks only.
    #[default]
    Structural,
    /// Structural checks plus finite values inside [`PhysicalLimits`].
    PhysicalLimits,
}

/// Accepted ranges for the `physical_limits` policy. Bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicalLimits {
    /// Lowest accepted altitude in meters.
    pub min_altitude: f64,
    /// Highest accepted altitude in meters.
    pub max_altitude: f64,
    /// Largest accepted vertical speed in m/s.
    pub max_abs_velocity: f64,
    /// Largest accepted acceleration on any axis.
    pub max_abs_acceleration: f64,
    /// Lowest accepted battery voltage.
    pub min_battery_voltage: f64,
    /// Highest accepted battery voltage.
    pub max_battery_voltage: f64,
    /// Lowest accepted latitude.
    pub min_latitude: f64,
    /// Highest accepted latitude.
    pub max_latitude: f64,
    /// Lowest accepted longitude.
    pub min_longitude: f64,
    /// Highest accepted longitude.
    pub max_longitude: f64,
}

impl Default for PhysicalLimits {
    fn default() -> Self {
        Self {
            min_altitude: -500.0,
            max_altitude: 30_000.0,
            max_abs_velocity: 1_000.0,
            max_abs_acceleration: 200.0,
            min_battery_voltage: 0.0,
            max_battery_voltage: 30.0,
            min_latitude: -90.0,
            max_latitude: 90.0,
            min_longitude: -180.0,
            max_longitude: 180.0,
        }
    }
}

impl PhysicalLimits {
    /// Check that every range is well formed.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first inverted or non-finite
    /// range.
    pub fn validate(&self) -> Result<()> {
        let ranges = [
            ("altitude", self.min_altitude, self.max_altitude),
            ("velocity", 0.0, self.max_abs_velocity),
            ("acceleration", 0.0, self.max_abs_acceleration),
            (
                "battery_voltage",
                self.min_battery_voltage,
                self.max_battery_voltage,
            ),
            ("latitude", self.min_latitude, self.max_latitude),
            ("longitude", self.min_longitude, self.max_longitude),
        ];

        for (name, min, max) in ranges {
            if !min.is_finite() || !max.is_finite() || min > max {
                return Err(Error::config(format!(
                    "validation.limits: invalid {name} range [{min}, {max}]"
                )));
            }
        }
        Ok(())
    }
}

/// Why a packet was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Packet id below zero.
    #[error("negative packet id {0}")]
    NegativePacketId(i64),

    /// Receive timestamp not after the epoch.
    #[error("non-positive timestamp {0}")]
    NonPositiveTimestamp(i64),

    /// Mission time below zero.
    #[error("negative mission time {0}")]
    NegativeMissionTime(f64),

    /// A float field is NaN.
    #[error("{0} is NaN")]
    NotANumber(&'static str),

    /// A float field is infinite.
    #[error("{0} is not finite")]
    NotFinite(&'static str),

    /// A value lies outside its configured range.
    #[error("{field} = {value} outside [{min}, {max}]")]
    OutOfRange {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: f64,
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
}

/// Accepts or rejects decoded packets.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    policy: ValidationPolicy,
    limits: PhysicalLimits,
}

impl Validator {
    /// Create a validator.
    #[must_use]
    pub fn new(policy: ValidationPolicy, limits: PhysicalLimits) -> Self {
        Self { policy, limits }
    }

    /// The active policy.
    #[must_use]
    pub fn policy(&self) -> ValidationPolicy {
        self.policy
    }

    /// Validate a decoded packet.
    ///
    /// Survival packets are checked through the snapshot they would produce
    /// on their own, so the synthesized defaults take part in the checks.
    ///
    /// # Errors
    ///
    /// Returns the first rule the packet breaks.
    pub fn validate(&self, packet: &ParsedPacket) -> std::result::Result<(), ValidationError> {
        match packet {
            ParsedPacket::Full(snapshot) => self.validate_snapshot(snapshot),
            ParsedPacket::Survival(survival) => self.validate_snapshot(&survival.to_snapshot()),
        }
    }

    /// Validate a composite snapshot.
    ///
    /// # Errors
    ///
    /// Returns the first rule the snapshot breaks.
    pub fn validate_snapshot(
        &self,
        snapshot: &TelemetrySnapshot,
    ) -> std::result::Result<(), ValidationError> {
        if snapshot.packet_id < 0 {
            return Err(ValidationError::NegativePacketId(snapshot.packet_id));
        }
        if snapshot.timestamp <= 0 {
            return Err(ValidationError::NonPositiveTimestamp(snapshot.timestamp));
        }

        let fields = snapshot.float_fields();
        if let Some(&(name, _)) = fields.iter().find(|(_, v)| v.is_nan()) {
            return Err(ValidationError::NotANumber(name));
        }
        if snapshot.mission_time < 0.0 {
            return Err(ValidationError::NegativeMissionTime(snapshot.mission_time));
        }

        if self.policy == ValidationPolicy::PhysicalLimits {
            if let Some(&(name, _)) = fields.iter().find(|(_, v)| v.is_infinite()) {
                return Err(ValidationError::NotFinite(name));
            }
            self.check_limits(snapshot)?;
        }

        Ok(())
    }

    fn check_limits(&self, s: &TelemetrySnapshot) -> std::result::Result<(), ValidationError> {
        let l = &self.limits;
        let checks = [
            ("altitude", s.altitude, l.min_altitude, l.max_altitude),
            (
                "velocity_z",
                s.velocity_z,
                -l.max_abs_velocity,
                l.max_abs_velocity,
            ),
            (
                "acc_x",
                s.acc_x,
                -l.max_abs_acceleration,
                l.max_abs_acceleration,
            ),
            (
                "acc_y",
                s.acc_y,
                -l.max_abs_acceleration,
                l.max_abs_acceleration,
            ),
            (
                "acc_z",
                s.acc_z,
                -l.max_abs_acceleration,
                l.max_abs_acceleration,
            ),
            (
                "battery_voltage",
                s.battery_voltage,
                l.min_battery_voltage,
                l.max_battery_voltage,
            ),
            ("gps_lat", s.gps_lat, l.min_latitude, l.max_latitude),
            ("gps_lng", s.gps_lng, l.min_longitude, l.max_longitude),
        ];

        for (field, value, min, max) in checks {
            if value < min || value > max {
                return Err(ValidationError::OutOfRange {
                    field,
                    value,
                    min,
                    max,
                });
            }
        }
        Ok(())
    }
}
