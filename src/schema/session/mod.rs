//! # Session Information Parsing
//!
//! The session document is re-published by iRacing whenever the roster,
//! the session, or the weekend changes. Parsing goes through
//! [`SessionInfoParser`], which cleans the YAML (see [`crate::yaml_utils`]),
//! deserializes it, and rejects documents without a track or sessions.
//!
//! ```text
//! raw YAML ──► preprocess ──► serde_yaml_ng ──► validate ──► SessionInfo
//! ```

use serde::{Deserialize, Serialize};

pub mod driver;
pub mod parser;
pub mod session_data;
pub mod weekend;

pub use driver::{Driver, DriverInfoData};
pub use parser::SessionInfoParser;
pub use session_data::{Session, SessionInfoData};
pub use weekend::{WeekendInfo, parse_track_length_km};

/// The subset of iRacing's session document used for rosters and track
/// metadata.
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct SessionInfo {
    #[serde(default)]
    pub weekend_info: WeekendInfo,
    #[serde(default)]
    pub session_info: SessionInfoData,
    #[serde(default)]
    pub driver_info: Option<DriverInfoData>,
}

impl SessionInfo {
    /// Deserialize already-cleaned YAML. No validation.
    pub fn parse(yaml: &str) -> crate::Result<Self> {
        serde_yaml_ng::from_str(yaml)
            .map_err(|e| crate::TelemetryError::parse_error("SessionInfo deserialization", e.to_string()))
    }

    /// Roster entries, empty when the document has none.
    pub fn drivers(&self) -> &[Driver] {
        self.driver_info.as_ref().and_then(|d| d.drivers.as_deref()).unwrap_or_default()
    }

    /// Player car index, `-1` when absent or when no roster entry has it.
    pub fn player_car_idx(&self) -> i32 {
        self.driver_info
            .as_ref()
            .and_then(|d| d.driver_car_idx)
            .filter(|idx| self.drivers().iter().any(|driver| driver.car_idx == *idx))
            .unwrap_or(-1)
    }

    /// Lap limit of the current session.
    pub fn lap_limit(&self) -> Option<u32> {
        self.session_info.current().and_then(Session::lap_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::SESSION_YAML;
    use crate::yaml_utils::preprocess_iracing_yaml;

    fn parse(yaml: &str) -> SessionInfo {
        SessionInfo::parse(&preprocess_iracing_yaml(yaml).unwrap()).unwrap()
    }

    #[test]
    fn player_index_points_at_a_roster_entry() {
        let info = parse(SESSION_YAML);
        let player = info.player_car_idx();
        assert!(info.drivers().iter().any(|d| d.car_idx == player));
        assert_eq!(info.drivers()[1].user_name, "Sam O'Reilly");
    }

    #[test]
    fn player_index_missing_from_roster_is_unknown() {
        let info = parse(&SESSION_YAML.replace("DriverCarIdx: 1", "DriverCarIdx: 7"));
        assert_eq!(info.drivers().len(), 3);
        assert_eq!(info.player_car_idx(), -1);
    }

    #[test]
    fn no_driver_info_means_no_player() {
        let info = SessionInfo::parse("WeekendInfo:\n TrackName: okayama\n").unwrap();
        assert!(info.drivers().is_empty());
        assert_eq!(info.player_car_idx(), -1);
        assert_eq!(info.lap_limit(), None);
    }
}
