//! Byte-level decoding of the rFactor 2 shared memory plugin buffers.
//!
//! Only the fields this crate consumes are decoded. Offsets follow the
//! plugin's `#pragma pack(4)` structures (`rF2Telemetry`, `rF2Scoring`), read
//! little-endian from a copied buffer so the decoder runs on any platform.
//!
//! ```text
//! rF2Telemetry                    rF2Scoring
//! ├─ 0   mVersionUpdateBegin      ├─ 0    mVersionUpdateBegin
//! ├─ 4   mVersionUpdateEnd        ├─ 4    mVersionUpdateEnd
//! ├─ 12  mNumVehicles             ├─ 12   mScoringInfo (548 bytes)
//! └─ 16  mVehicles[128] × 1888    └─ 560  mVehicles[128] × 584
//! ```

use crate::{Result, TelemetryError};

pub const MAX_VEHICLES: usize = 128;

pub const TELEMETRY_HEADER_SIZE: usize = 16;
pub const VEHICLE_TELEMETRY_SIZE: usize = 1888;
pub const TELEMETRY_BUFFER_SIZE: usize = TELEMETRY_HEADER_SIZE + MAX_VEHICLES * VEHICLE_TELEMETRY_SIZE;

pub const SCORING_INFO_OFFSET: usize = 12;
pub const SCORING_INFO_SIZE: usize = 548;
pub const SCORING_VEHICLES_OFFSET: usize = SCORING_INFO_OFFSET + SCORING_INFO_SIZE;
pub const VEHICLE_SCORING_SIZE: usize = 584;
pub const SCORING_BUFFER_SIZE: usize = SCORING_VEHICLES_OFFSET + MAX_VEHICLES * VEHICLE_SCORING_SIZE;

const VERSION_BEGIN: usize = 0;
const VERSION_END: usize = 4;
const TELEMETRY_NUM_VEHICLES: usize = 12;

/// Field offsets inside `rF2VehicleTelemetry`.
pub(crate) mod tel {
    pub const ID: usize = 0;
    pub const ELAPSED_TIME: usize = 12;
    pub const LAP_NUMBER: usize = 20;
    pub const LAP_START_ET: usize = 24;
    pub const VEHICLE_NAME: usize = 32;
    pub const TRACK_NAME: usize = 96;
    pub const POS: usize = 160;
    pub const LOCAL_VEL: usize = 184;
    pub const ORI: usize = 232;
    pub const GEAR: usize = 352;
    pub const ENGINE_RPM: usize = 356;
    pub const UNFILTERED_THROTTLE: usize = 388;
    pub const UNFILTERED_BRAKE: usize = 396;
    pub const UNFILTERED_CLUTCH: usize = 412;
    pub const FUEL: usize = 524;
    pub const NAME_LEN: usize = 64;
}

/// Field offsets inside `rF2ScoringInfo`, relative to its start.
pub(crate) mod info {
    pub const TRACK_NAME: usize = 0;
    pub const SESSION: usize = 64;
    pub const MAX_LAPS: usize = 84;
    pub const LAP_DIST: usize = 88;
    pub const NUM_VEHICLES: usize = 104;
    pub const NAME_LEN: usize = 64;
}

/// Field offsets inside `rF2VehicleScoring`.
pub(crate) mod veh {
    pub const ID: usize = 0;
    pub const DRIVER_NAME: usize = 4;
    pub const DRIVER_NAME_LEN: usize = 32;
    pub const VEHICLE_NAME: usize = 36;
    pub const VEHICLE_NAME_LEN: usize = 64;
    pub const TOTAL_LAPS: usize = 100;
    pub const LAP_DIST: usize = 104;
    pub const BEST_LAP_TIME: usize = 144;
    pub const LAST_LAP_TIME: usize = 168;
    pub const IS_PLAYER: usize = 196;
    pub const IN_PITS: usize = 198;
    pub const PLACE: usize = 199;
    pub const VEHICLE_CLASS: usize = 200;
    pub const VEHICLE_CLASS_LEN: usize = 32;
    pub const POS: usize = 264;
}

/// Telemetry for one vehicle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VehicleTelemetry {
    pub id: i32,
    pub elapsed_time: f64,
    pub lap_number: i32,
    pub lap_start_et: f64,
    pub vehicle_name: String,
    pub track_name: String,
    pub pos: [f64; 3],
    pub local_vel: [f64; 3],
    /// Rows of the world orientation matrix
    pub ori: [[f64; 3]; 3],
    pub gear: i32,
    pub engine_rpm: f64,
    pub throttle: f64,
    pub brake: f64,
    pub clutch: f64,
    pub fuel: f64,
}

impl VehicleTelemetry {
    pub fn speed(&self) -> f64 {
        let [x, y, z] = self.local_vel;
        (x * x + y * y + z * z).sqrt()
    }

    /// Heading in radians about the vertical axis, from the forward (local z)
    /// column of the orientation matrix.
    pub fn heading(&self) -> f64 {
        self.ori[0][2].atan2(self.ori[2][2])
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryBlock {
    pub version_begin: u32,
    pub version_end: u32,
    pub vehicles: Vec<VehicleTelemetry>,
}

impl TelemetryBlock {
    /// The plugin was not mid-write when the buffer was copied.
    pub fn is_consistent(&self) -> bool {
        self.version_begin == self.version_end
    }
}

/// Session-wide scoring data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoringInfo {
    pub track_name: String,
    pub session: i32,
    pub max_laps: i32,
    /// Metres around the lap
    pub lap_dist: f64,
    pub num_vehicles: i32,
}

/// Scoring for one vehicle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VehicleScoring {
    pub id: i32,
    pub driver_name: String,
    pub vehicle_name: String,
    pub total_laps: i16,
    pub lap_dist: f64,
    pub best_lap_time: f64,
    pub last_lap_time: f64,
    pub is_player: bool,
    pub in_pits: bool,
    pub place: u8,
    pub vehicle_class: String,
    pub pos: [f64; 3],
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoringBlock {
    pub version_begin: u32,
    pub version_end: u32,
    pub info: ScoringInfo,
    pub vehicles: Vec<VehicleScoring>,
}

impl ScoringBlock {
    pub fn is_consistent(&self) -> bool {
        self.version_begin == self.version_end
    }
}

/// Decode a fixed-size text field: bytes up to the first NUL, lossy UTF-8.
pub fn extract_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Bounds-checked little-endian reads.
struct Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        self.buf.get(offset..offset + len).ok_or_else(|| TelemetryError::memory_access_error(offset))
    }

    fn array<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(offset, N)?);
        Ok(out)
    }

    fn u8(&self, offset: usize) -> Result<u8> {
        Ok(self.array::<1>(offset)?[0])
    }

    fn i16(&self, offset: usize) -> Result<i16> {
        Ok(i16::from_le_bytes(self.array(offset)?))
    }

    fn i32(&self, offset: usize) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array(offset)?))
    }

    fn u32(&self, offset: usize) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array(offset)?))
    }

    fn f64(&self, offset: usize) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array(offset)?))
    }

    fn vec3(&self, offset: usize) -> Result<[f64; 3]> {
        Ok([self.f64(offset)?, self.f64(offset + 8)?, self.f64(offset + 16)?])
    }

    fn string(&self, offset: usize, len: usize) -> Result<String> {
        Ok(extract_string(self.bytes(offset, len)?))
    }
}

fn vehicle_count(raw: i32, context: &str) -> Result<usize> {
    usize::try_from(raw)
        .ok()
        .filter(|&n| n <= MAX_VEHICLES)
        .ok_or_else(|| TelemetryError::parse_error(context, format!("vehicle count {raw} out of range")))
}

/// Decode a copied `rF2Telemetry` buffer.
pub fn decode_telemetry(buf: &[u8]) -> Result<TelemetryBlock> {
    let c = Cursor { buf };
    let count = vehicle_count(c.i32(TELEMETRY_NUM_VEHICLES)?, "rF2 telemetry")?;

    let vehicles = (0..count)
        .map(|i| {
            let base = TELEMETRY_HEADER_SIZE + i * VEHICLE_TELEMETRY_SIZE;
            Ok(VehicleTelemetry {
                id: c.i32(base + tel::ID)?,
                elapsed_time: c.f64(base + tel::ELAPSED_TIME)?,
                lap_number: c.i32(base + tel::LAP_NUMBER)?,
                lap_start_et: c.f64(base + tel::LAP_START_ET)?,
                vehicle_name: c.string(base + tel::VEHICLE_NAME, tel::NAME_LEN)?,
                track_name: c.string(base + tel::TRACK_NAME, tel::NAME_LEN)?,
                pos: c.vec3(base + tel::POS)?,
                local_vel: c.vec3(base + tel::LOCAL_VEL)?,
                ori: [c.vec3(base + tel::ORI)?, c.vec3(base + tel::ORI + 24)?, c.vec3(base + tel::ORI + 48)?],
                gear: c.i32(base + tel::GEAR)?,
                engine_rpm: c.f64(base + tel::ENGINE_RPM)?,
                throttle: c.f64(base + tel::UNFILTERED_THROTTLE)?,
                brake: c.f64(base + tel::UNFILTERED_BRAKE)?,
                clutch: c.f64(base + tel::UNFILTERED_CLUTCH)?,
                fuel: c.f64(base + tel::FUEL)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(TelemetryBlock { version_begin: c.u32(VERSION_BEGIN)?, version_end: c.u32(VERSION_END)?, vehicles })
}

/// Decode a copied `rF2Scoring` buffer.
pub fn decode_scoring(buf: &[u8]) -> Result<ScoringBlock> {
    let c = Cursor { buf };
    let info = ScoringInfo {
        track_name: c.string(SCORING_INFO_OFFSET + info::TRACK_NAME, info::NAME_LEN)?,
        session: c.i32(SCORING_INFO_OFFSET + info::SESSION)?,
        max_laps: c.i32(SCORING_INFO_OFFSET + info::MAX_LAPS)?,
        lap_dist: c.f64(SCORING_INFO_OFFSET + info::LAP_DIST)?,
        num_vehicles: c.i32(SCORING_INFO_OFFSET + info::NUM_VEHICLES)?,
    };
    let count = vehicle_count(info.num_vehicles, "rF2 scoring")?;

    let vehicles = (0..count)
        .map(|i| {
            let base = SCORING_VEHICLES_OFFSET + i * VEHICLE_SCORING_SIZE;
            Ok(VehicleScoring {
                id: c.i32(base + veh::ID)?,
                driver_name: c.string(base + veh::DRIVER_NAME, veh::DRIVER_NAME_LEN)?,
                vehicle_name: c.string(base + veh::VEHICLE_NAME, veh::VEHICLE_NAME_LEN)?,
                total_laps: c.i16(base + veh::TOTAL_LAPS)?,
                lap_dist: c.f64(base + veh::LAP_DIST)?,
                best_lap_time: c.f64(base + veh::BEST_LAP_TIME)?,
                last_lap_time: c.f64(base + veh::LAST_LAP_TIME)?,
                is_player: c.u8(base + veh::IS_PLAYER)? != 0,
                in_pits: c.u8(base + veh::IN_PITS)? != 0,
                place: c.u8(base + veh::PLACE)?,
                vehicle_class: c.string(base + veh::VEHICLE_CLASS, veh::VEHICLE_CLASS_LEN)?,
                pos: c.vec3(base + veh::POS)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ScoringBlock { version_begin: c.u32(VERSION_BEGIN)?, version_end: c.u32(VERSION_END)?, info, vehicles })
}
