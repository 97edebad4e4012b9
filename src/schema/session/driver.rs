//! Driver roster

use serde::{Deserialize, Serialize};

use crate::source::{DriverSessionInfo, parse_hex_color};

/// `DriverInfo` block: the player's car index plus every car in the session.
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
#[serde(default)]
pub struct DriverInfoData {
    pub driver_car_idx: Option<i32>,
    #[serde(rename = "DriverUserID")]
    pub driver_user_id: Option<i32>,
    pub pace_car_idx: Option<i32>,
    pub drivers: Option<Vec<Driver>>,
}

/// One roster entry.
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
#[serde(default)]
pub struct Driver {
    pub car_idx: i32,
    pub user_name: String,
    #[serde(rename = "UserID")]
    pub user_id: Option<i32>,
    pub team_name: Option<String>,
    pub car_number: Option<String>,
    pub car_screen_name: Option<String>,
    pub car_screen_name_short: Option<String>,
    pub car_class_short_name: Option<String>,
    /// Hex string such as `0xffda59`
    pub car_class_color: Option<String>,
    pub car_is_pace_car: Option<i32>,
    #[serde(rename = "CarIsAI")]
    pub car_is_ai: Option<i32>,
    pub i_rating: Option<i32>,
    pub lic_string: Option<String>,
    pub lic_color: Option<String>,
    pub is_spectator: Option<i32>,
}

impl Driver {
    pub fn is_pace_car(&self) -> bool {
        self.car_is_pace_car.unwrap_or(0) != 0
    }

    pub fn to_session_info(&self) -> DriverSessionInfo {
        DriverSessionInfo {
            car_idx: self.car_idx,
            user_name: self.user_name.clone(),
            car_number: self.car_number.clone().unwrap_or_default(),
            car_class_short_name: self.car_class_short_name.clone().unwrap_or_default(),
            car_class_color: self.car_class_color.as_deref().map_or(0, parse_hex_color),
            i_rating: self.i_rating.unwrap_or(0),
            license: self.lic_string.clone().unwrap_or_default(),
            license_color: self.lic_color.as_deref().map_or(0, parse_hex_color),
            car_screen_name_short: self.car_screen_name_short.clone().unwrap_or_default(),
            is_spectator: self.is_spectator.unwrap_or(0) != 0,
        }
    }
}
