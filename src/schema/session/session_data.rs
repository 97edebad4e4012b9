//! Session list and lap limits

use serde::{Deserialize, Serialize};

/// Session information data from iRacing
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
#[serde(default)]
pub struct SessionInfoData {
    pub current_session_num: i32,
    pub sessions: Vec<Session>,
}

impl SessionInfoData {
    /// The session `CurrentSessionNum` points at, falling back to the last
    /// listed session.
    pub fn current(&self) -> Option<&Session> {
        self.sessions
            .iter()
            .find(|s| s.session_num == self.current_session_num)
            .or_else(|| self.sessions.last())
    }
}

/// Individual session data
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
#[serde(default)]
pub struct Session {
    pub session_num: i32,
    /// `"unlimited"` or a lap count
    pub session_laps: String,
    /// `"unlimited"` or a duration such as `"1800.0000 sec"`
    pub session_time: String,
    pub session_type: String,
    pub session_name: Option<String>,
}

impl Session {
    /// Lap limit; `None` for `"unlimited"`, zero, or anything non-numeric.
    pub fn lap_limit(&self) -> Option<u32> {
        self.session_laps.trim().parse::<u32>().ok().filter(|&laps| laps > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(num: i32, laps: &str) -> Session {
        Session { session_num: num, session_laps: laps.to_string(), ..Default::default() }
    }

    #[test]
    fn lap_limits() {
        assert_eq!(session(0, "20").lap_limit(), Some(20));
        assert_eq!(session(0, " 3 ").lap_limit(), Some(3));
        assert_eq!(session(0, "unlimited").lap_limit(), None);
        assert_eq!(session(0, "0").lap_limit(), None);
        assert_eq!(session(0, "").lap_limit(), None);
    }

    #[test]
    fn current_session_follows_session_num() {
        let data = SessionInfoData {
            current_session_num: 1,
            sessions: vec![session(0, "unlimited"), session(1, "12"), session(2, "30")],
        };
        assert_eq!(data.current().unwrap().session_num, 1);

        let stale = SessionInfoData { current_session_num: 7, ..data };
        assert_eq!(stale.current().unwrap().session_num, 2);
        assert!(SessionInfoData::default().current().is_none());
    }
}
