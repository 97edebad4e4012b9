//! Weekend and track information

use serde::{Deserialize, Serialize};

const KM_PER_MILE: f32 = 1.609_344;

/// Weekend and track information from iRacing
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
#[serde(default)]
pub struct WeekendInfo {
    /// Internal track name, e.g. `"watkinsglen 2021 fullcourse"`
    pub track_name: String,
    #[serde(rename = "TrackID")]
    pub track_id: Option<i32>,
    /// Length with unit suffix, e.g. `"5.43 km"`
    pub track_length: String,
    pub track_display_name: String,
    pub track_display_short_name: Option<String>,
    pub track_config_name: Option<String>,
    pub track_city: Option<String>,
    pub track_country: Option<String>,
    pub track_num_turns: Option<i32>,
    pub track_type: Option<String>,
    pub event_type: Option<String>,
    pub category: Option<String>,
}

impl WeekendInfo {
    /// Track length in kilometres, or `None` when the string is not a
    /// `"<number> km"` / `"<number> mi"` pair.
    pub fn track_length_km(&self) -> Option<f32> {
        parse_track_length_km(&self.track_length)
    }

    /// Name for display: the display name when present, else the internal name.
    pub fn display_name(&self) -> &str {
        if self.track_display_name.is_empty() { &self.track_name } else { &self.track_display_name }
    }
}

/// Parse iRacing's `TrackLength` strings (`"6.14 km"`, `"3.80 mi"`).
pub fn parse_track_length_km(raw: &str) -> Option<f32> {
    let mut parts = raw.split_whitespace();
    let value: f32 = parts.next()?.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    match parts.next().map(str::to_ascii_lowercase).as_deref() {
        Some("km") => Some(value),
        Some("mi") => Some(value * KM_PER_MILE),
        _ => None,
    }
}
