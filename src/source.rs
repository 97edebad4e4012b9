//! The telemetry source contract.
//!
//! Every simulator integration, and the synthetic demo generator, implements
//! [`TelemetrySource`]. Consumers never hold a concrete source; they go
//! through [`crate::TelemetryAccessProxy`], which forwards to whichever source
//! the [`crate::GameDetectionController`] currently considers authoritative.
//!
//! Accessors are infallible by design of the contract: a missing variable, an
//! out-of-range car index, or a source that has not yet produced data all
//! resolve to a neutral default (`0.0`, `0`, `false`, `None`, `-1`).
//!
//! Variable names use iRacing's spelling as the shared vocabulary, see
//! [`vars`]. Each source documents which names it answers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::Result;

/// Stable identifier of a source (`"iracing"`, `"rfactor2"`, `"demo"`, ...).
pub type SourceId = String;

/// Capacity of every source's event channel. Slow receivers lag and lose
/// the oldest events.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle and data notifications emitted by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceEvent {
    /// The simulator became reachable
    Connected,
    /// The simulator went away; per-session state has been cleared
    Disconnected,
    /// A new telemetry sample is readable
    TelemetryUpdated,
    /// Roster or track metadata changed
    SessionInfoUpdated,
}

/// Roster entry for one car in the current session.
///
/// `car_idx` is only meaningful for the session it was read from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverSessionInfo {
    pub car_idx: i32,
    pub user_name: String,
    pub car_number: String,
    pub car_class_short_name: String,
    /// 0xRRGGBB
    pub car_class_color: u32,
    pub i_rating: i32,
    pub license: String,
    /// 0xRRGGBB
    pub license_color: u32,
    pub car_screen_name_short: String,
    pub is_spectator: bool,
}

/// Polymorphic simulator telemetry.
#[async_trait]
pub trait TelemetrySource: Send + Sync + 'static {
    /// Stable identifier used in arbitration state and events.
    fn id(&self) -> &str;

    /// Human readable name for UI and logs.
    fn display_name(&self) -> &str;

    /// Point-in-time probe of whether the simulator process is alive.
    async fn is_game_running(&self) -> Result<bool>;

    /// Whether the source is currently receiving data.
    fn is_connected(&self) -> bool;

    fn scalar_f32(&self, name: &str) -> f32;
    fn scalar_i32(&self, name: &str) -> i32;
    fn scalar_bool(&self, name: &str) -> bool;

    fn array_f32(&self, name: &str, car_idx: usize) -> f32;
    fn array_i32(&self, name: &str, car_idx: usize) -> i32;
    fn array_bool(&self, name: &str, car_idx: usize) -> bool;

    /// Number of cars in the roster.
    fn driver_count(&self) -> usize;

    /// Car index of the local player, `-1` when unknown.
    fn player_car_index(&self) -> i32;

    fn driver_info(&self, car_idx: i32) -> Option<DriverSessionInfo>;

    fn track_name(&self) -> String;

    /// Numeric track identifier used to key the outline cache.
    fn track_id(&self) -> Option<i32>;

    /// Track length in kilometres, `0.0` when the simulator does not say.
    fn track_length_km(&self) -> f32;

    /// Race lap limit, `None` when unlimited or unknown.
    fn session_lap_limit(&self) -> Option<u32>;

    /// Begin producing data. Idempotent.
    async fn start(&self) -> Result<()>;

    /// Stop producing data and release resources. Idempotent.
    async fn stop(&self);

    /// Subscribe to this source's events. Best-effort delivery.
    fn subscribe(&self) -> broadcast::Receiver<SourceEvent>;
}

/// Variable names understood across sources.
pub mod vars {
    /// m/s
    pub const SPEED: &str = "Speed";
    pub const RPM: &str = "RPM";
    /// 0..1
    pub const THROTTLE: &str = "Throttle";
    /// 0..1
    pub const BRAKE: &str = "Brake";
    /// 0..1
    pub const CLUTCH: &str = "Clutch";
    /// -1 reverse, 0 neutral
    pub const GEAR: &str = "Gear";
    pub const LAP: &str = "Lap";
    pub const PLAYER_CAR_POSITION: &str = "PlayerCarPosition";
    pub const ON_PIT_ROAD: &str = "OnPitRoad";
    /// 0..1 fraction of the lap
    pub const LAP_DIST_PCT: &str = "LapDistPct";
    /// Heading in radians
    pub const YAW: &str = "Yaw";
    /// Seconds
    pub const LAP_CURRENT_LAP_TIME: &str = "LapCurrentLapTime";
    /// Seconds
    pub const LAP_BEST_LAP_TIME: &str = "LapBestLapTime";
    /// Seconds
    pub const LAP_LAST_LAP_TIME: &str = "LapLastLapTime";
    /// Litres
    pub const FUEL_LEVEL: &str = "FuelLevel";

    pub const CAR_IDX_LAP_DIST_PCT: &str = "CarIdxLapDistPct";
    pub const CAR_IDX_POSITION: &str = "CarIdxPosition";
    pub const CAR_IDX_CLASS_POSITION: &str = "CarIdxClassPosition";
    pub const CAR_IDX_LAP: &str = "CarIdxLap";
    pub const CAR_IDX_ON_PIT_ROAD: &str = "CarIdxOnPitRoad";
    pub const CAR_IDX_LAST_LAP_TIME: &str = "CarIdxLastLapTime";
    pub const CAR_IDX_BEST_LAP_TIME: &str = "CarIdxBestLapTime";
    /// Metres left (-) or right (+) of the player, in the player's frame
    pub const CAR_IDX_LATERAL_OFFSET: &str = "CarIdxLateralOffset";
}

/// Parse a `0xRRGGBB` colour string. Unparseable values yield `0`.
pub fn parse_hex_color(raw: &str) -> u32 {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .or_else(|| trimmed.strip_prefix('#'))
        .unwrap_or(trimmed);
    u32::from_str_radix(digits, 16).map(|c| c & 0x00FF_FFFF).unwrap_or(0)
}
