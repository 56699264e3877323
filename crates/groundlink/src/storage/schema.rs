//! `SQLite` schema definitions for groundlink.

/// SQL statement to create the telemetry table.
///
/// `packet_id` is the primary key so that re-delivered packets overwrite the
/// stored record instead of duplicating it.
pub const CREATE_TELEMETRY_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS telemetry (
    packet_id INTEGER PRIMARY KEY,
    mission_state INTEGER NOT NULL,
    mission_time REAL NOT NULL,
    timestamp INTEGER NOT NULL,
    battery_voltage REAL NOT NULL,
    pressure REAL NOT NULL,
    temperature REAL NOT NULL,
    altitude REAL NOT NULL,
    velocity_z REAL NOT NULL,
    gps_lat REAL NOT NULL,
    gps_lng REAL NOT NULL,
    gps_alt REAL NOT NULL,
    gps_sats INTEGER NOT NULL,
    acc_x REAL NOT NULL,
    acc_y REAL NOT NULL,
    acc_z REAL NOT NULL,
    gyro_x REAL NOT NULL,
    gyro_y REAL NOT NULL,
    gyro_z REAL NOT NULL,
    mag_x REAL NOT NULL,
    mag_y REAL NOT NULL,
    mag_z REAL NOT NULL,
    lora_rssi REAL NOT NULL,
    lora_snr REAL NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// Index on mission time, added in schema version 2.
pub const CREATE_MISSION_TIME_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_telemetry_mission_time ON telemetry(mission_time)
";

/// Insert-or-replace for one snapshot, keyed by packet id.
pub const UPSERT_TELEMETRY: &str = r"
INSERT INTO telemetry (
    packet_id, mission_state, mission_time, timestamp,
    battery_voltage, pressure, temperature, altitude, velocity_z,
    gps_lat, gps_lng, gps_alt, gps_sats,
    acc_x, acc_y, acc_z, gyro_x, gyro_y, gyro_z, mag_x, mag_y, mag_z,
    lora_rssi, lora_snr
) VALUES (
    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
    ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24
)
ON CONFLICT(packet_id) DO UPDATE SET
    mission_state = excluded.mission_state,
    mission_time = excluded.mission_time,
    timestamp = excluded.timestamp,
    battery_voltage = excluded.battery_voltage,
    pressure = excluded.pressure,
    temperature = excluded.temperature,
    altitude = excluded.altitude,
    velocity_z = excluded.velocity_z,
    gps_lat = excluded.gps_lat,
    gps_lng = excluded.gps_lng,
    gps_alt = excluded.gps_alt,
    gps_sats = excluded.gps_sats,
    acc_x = excluded.acc_x,
    acc_y = excluded.acc_y,
    acc_z = excluded.acc_z,
    gyro_x = excluded.gyro_x,
    gyro_y = excluded.gyro_y,
    gyro_z = excluded.gyro_z,
    mag_x = excluded.mag_x,
    mag_y = excluded.mag_y,
    mag_z = excluded.mag_z,
    lora_rssi = excluded.lora_rssi,
    lora_snr = excluded.lora_snr,
    stored_at = datetime('now')
";

/// One page of the keyset-paginated scan. `?1` is the last id seen.
pub const SELECT_PAGE_AFTER: &str = r"
SELECT packet_id, mission_state, mission_time, timestamp,
       battery_voltage, pressure, temperature, altitude, velocity_z,
       gps_lat, gps_lng, gps_alt, gps_sats,
       acc_x, acc_y, acc_z, gyro_x, gyro_y, gyro_z, mag_x, mag_y, mag_z,
       lora_rssi, lora_snr
FROM telemetry
WHERE packet_id > ?1
ORDER BY packet_id ASC
LIMIT ?2
";

/// Base schema (version 1) creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[CREATE_TELEMETRY_TABLE, CREATE_METADATA_TABLE];
