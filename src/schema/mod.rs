//! iRacing session metadata.
//!
//! iRacing publishes everything that is not per-tick telemetry (track,
//! sessions, the driver roster) as a YAML document that changes a handful of
//! times per session. Only the parts consumed by the callback source are
//! modelled; unknown keys are ignored by serde.

pub mod session;

pub use session::{Driver, DriverInfoData, Session, SessionInfo, SessionInfoData, SessionInfoParser, WeekendInfo};
