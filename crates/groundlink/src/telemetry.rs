//! Core telemetry types.
//!
//! This module defines the packet variants carried by the two radio links and
//! the composite [`TelemetrySnapshot`] exposed to storage and display.

use serde::{Deserialize, Serialize};

/// Standard sea-level pressure in hPa, used when a packet carries no barometer data.
pub const SEA_LEVEL_PRESSURE_HPA: f64 = 1013.25;

/// One of the two independent radio channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Link {
    /// High-rate link carrying `F` packets.
    Primary,
    /// Low-rate link carrying `S` packets.
    Backup,
}

impl Link {
    /// Both links, in reporting order.
    pub const ALL: [Link; 2] = [Link::Primary, Link::Backup];

    /// Index used for per-link arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Primary => 0,
            Self::Backup => 1,
        }
    }
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Backup => write!(f, "backup"),
        }
    }
}

/// Flight phase reported by the flight computer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum MissionState {
    /// On the pad, not armed.
    #[default]
    PreFlight = 0,
    /// Armed and waiting for launch detection.
    Armed = 1,
    /// Motor burning.
    PoweredFlight = 2,
    /// Motor burnout to apogee.
    Coast = 3,
    /// Descending under drogue.
    DrogueDescent = 4,
    /// Descending under main.
    MainDescent = 5,
    /// On the ground after flight.
    Landed = 6,
}

impl TryFrom<u8> for MissionState {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::PreFlight,
            1 => Self::Armed,
            2 => Self::PoweredFlight,
            3 => Self::Coast,
            4 => Self::DrogueDescent,
            5 => Self::MainDescent,
            6 => Self::Landed,
            other => return Err(other),
        })
    }
}

impl From<MissionState> for u8 {
    fn from(state: MissionState) -> Self {
        state as u8
    }
}

impl std::fmt::Display for MissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PreFlight => "pre_flight",
            Self::Armed => "armed",
            Self::PoweredFlight => "powered_flight",
            Self::Coast => "coast",
            Self::DrogueDescent => "drogue_descent",
            Self::MainDescent => "main_descent",
            Self::Landed => "landed",
        };
        f.write_str(name)
    }
}

/// The composite telemetry record handed to storage and display.
///
/// A snapshot produced from an `F` packet carries every sensor; one produced
/// from an `S` packet carries position data on top of the last known full
/// record (see [`TelemetryMerger`](crate::merger::TelemetryMerger)).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Packet sequence number assigned by the flight computer.
    pub packet_id: i64,
    /// Flight phase.
    pub mission_state: MissionState,
    /// Seconds since mission start.
    pub mission_time: f64,
    /// Receive wall-clock time, milliseconds since the Unix epoch.
    pub timestamp: i64,

    /// Battery voltage in volts.
    pub battery_voltage: f64,

    /// Barometric pressure in hPa.
    pub pressure: f64,
    /// Temperature in degrees Celsius.
    pub temperature: f64,
    /// Barometric altitude in meters.
    pub altitude: f64,
    /// Vertical velocity in m/s.
    pub velocity_z: f64,

    /// GPS latitude in degrees.
    pub gps_lat: f64,
    /// GPS longitude in degrees.
    pub gps_lng: f64,
    /// GPS altitude in meters.
    pub gps_alt: f64,
    /// Satellites in use.
    pub gps_sats: u32,

    /// Acceleration, X axis.
    pub acc_x: f64,
    /// Acceleration, Y axis.
    pub acc_y: f64,
    /// Acceleration, Z axis.
    pub acc_z: f64,
    /// Angular rate, X axis.
    pub gyro_x: f64,
    /// Angular rate, Y axis.
    pub gyro_y: f64,
    /// Angular rate, Z axis.
    pub gyro_z: f64,
    /// Magnetic field, X axis.
    pub mag_x: f64,
    /// Magnetic field, Y axis.
    pub mag_y: f64,
    /// Magnetic field, Z axis.
    pub mag_z: f64,

    /// LoRa received signal strength in dBm.
    pub lora_rssi: f64,
    /// LoRa signal-to-noise ratio in dB.
    pub lora_snr: f64,
}

impl TelemetrySnapshot {
    /// Every floating point field with its name, in wire order.
    #[must_use]
    pub fn float_fields(&self) -> [(&'static str, f64); 20] {
        [
            ("mission_time", self.mission_time),
            ("altitude", self.altitude),
            ("velocity_z", self.velocity_z),
            ("acc_x", self.acc_x),
            ("acc_y", self.acc_y),
            ("acc_z", self.acc_z),
            ("gyro_x", self.gyro_x),
            ("gyro_y", self.gyro_y),
            ("gyro_z", self.gyro_z),
            ("mag_x", self.mag_x),
            ("mag_y", self.mag_y),
            ("mag_z", self.mag_z),
            ("gps_lat", self.gps_lat),
            ("gps_lng", self.gps_lng),
            ("gps_alt", self.gps_alt),
            ("pressure", self.pressure),
            ("temperature", self.temperature),
            ("battery_voltage", self.battery_voltage),
            ("lora_rssi", self.lora_rssi),
            ("lora_snr", self.lora_snr),
        ]
    }
}

/// Position-only record carried by the backup link.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurvivalPacket {
    /// Packet sequence number.
    pub packet_id: i64,
    /// Seconds since mission start (already normalized).
    pub mission_time: f64,
    /// Receive wall-clock time, milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// GPS latitude in degrees.
    pub gps_lat: f64,
    /// GPS longitude in degrees.
    pub gps_lng: f64,
    /// Altitude in meters; used for both barometric and GPS altitude.
    pub altitude: f64,
}

impl SurvivalPacket {
    /// Build the bare snapshot used when no full record is known yet.
    ///
    /// Instrument fields take fixed defaults: zero battery, sea-level pressure
    /// and the powered-flight mission state.
    #[must_use]
    pub fn to_snapshot(&self) -> TelemetrySnapshot {
        let mut snapshot = TelemetrySnapshot {
            mission_state: MissionState::PoweredFlight,
            pressure: SEA_LEVEL_PRESSURE_HPA,
            ..TelemetrySnapshot::default()
        };
        self.apply_to(&mut snapshot);
        snapshot
    }

    /// Overwrite the position fields of `snapshot` with this packet's values.
    pub fn apply_to(&self, snapshot: &mut TelemetrySnapshot) {
        snapshot.packet_id = self.packet_id;
        snapshot.mission_time = self.mission_time;
        snapshot.timestamp = self.timestamp;
        snapshot.gps_lat = self.gps_lat;
        snapshot.gps_lng = self.gps_lng;
        snapshot.gps_alt = self.altitude;
        snapshot.altitude = self.altitude;
    }
}

/// A decoded line: exactly one of the two packet kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedPacket {
    /// Primary-link record carrying the complete sensor set.
    Full(TelemetrySnapshot),
    /// Backup-link record carrying position-critical fields only.
    Survival(SurvivalPacket),
}

impl ParsedPacket {
    /// The link this packet kind travels on.
    #[must_use]
    pub fn link(&self) -> Link {
        match self {
            Self::Full(_) => Link::Primary,
            Self::Survival(_) => Link::Backup,
        }
    }

    /// Packet sequence number.
    #[must_use]
    pub fn packet_id(&self) -> i64 {
        match self {
            Self::Full(snapshot) => snapshot.packet_id,
            Self::Survival(packet) => packet.packet_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn survival() -> SurvivalPacket {
        SurvivalPacket {
            packet_id: 7,
            mission_time: 3.5,
            timestamp: 1_700_000_000_000,
            gps_lat: -25.3316,
            gps_lng: -57.5171,
            altitude: 120.0,
        }
    }

    #[test]
    fn test_link_display() {
        assert_eq!(Link::Primary.to_string(), "primary");
        assert_eq!(Link::Backup.to_string(), "backup");
    }

    #[test]
    fn test_link_index() {
        assert_eq!(Link::Primary.index(), 0);
        assert_eq!(Link::Backup.index(), 1);
    }

    #[test]
    fn test_mission_state_try_from() {
        assert_eq!(MissionState::try_from(0), Ok(MissionState::PreFlight));
        assert_eq!(MissionState::try_from(2), Ok(MissionState::PoweredFlight));
        assert_eq!(MissionState::try_from(6), Ok(MissionState::Landed));
        assert_eq!(MissionState::try_from(7), Err(7));
    }

    #[test]
    fn test_mission_state_roundtrip_u8() {
        for raw in 0..=6u8 {
            let state = MissionState::try_from(raw).unwrap();
            assert_eq!(u8::from(state), raw);
        }
    }

    #[test]
    fn test_mission_state_serializes_as_number() {
        let json = serde_json::to_string(&MissionState::Coast).unwrap();
        assert_eq!(json, "3");
        assert!(serde_json::from_str::<MissionState>("9").is_err());
    }

    #[test]
    fn test_survival_to_snapshot_defaults() {
        let snapshot = survival().to_snapshot();

        assert_eq!(snapshot.packet_id, 7);
        assert_eq!(snapshot.mission_state, MissionState::PoweredFlight);
        assert!((snapshot.pressure - SEA_LEVEL_PRESSURE_HPA).abs() < f64::EPSILON);
        assert!(snapshot.battery_voltage.abs() < f64::EPSILON);
        assert!((snapshot.altitude - 120.0).abs() < f64::EPSILON);
        assert!((snapshot.gps_alt - 120.0).abs() < f64::EPSILON);
        assert!(snapshot.acc_x.abs() < f64::EPSILON);
    }

    #[test]
    fn test_survival_apply_keeps_instruments() {
        let mut snapshot = TelemetrySnapshot {
            acc_x: 0.1,
            battery_voltage: 12.1,
            ..TelemetrySnapshot::default()
        };
        survival().apply_to(&mut snapshot);

        assert_eq!(snapshot.packet_id, 7);
        assert!((snapshot.acc_x - 0.1).abs() < f64::EPSILON);
        assert!((snapshot.battery_voltage - 12.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parsed_packet_link() {
        let full = ParsedPacket::Full(TelemetrySnapshot::default());
        let surv = ParsedPacket::Survival(survival());
        assert_eq!(full.link(), Link::Primary);
        assert_eq!(surv.link(), Link::Backup);
        assert_eq!(surv.packet_id(), 7);
    }

    #[test]
    fn test_snapshot_serialization() {
        let snapshot = survival().to_snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: TelemetrySnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot, back);
        assert!(json.contains("\"mission_state\":2"));
    }
}
