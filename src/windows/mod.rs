//! iRacing shared memory access (Windows only).
//!
//! Maps `Local\IRSDKMemMapFileName` read-only and waits on
//! `Local\IRSDKDataValidEvent` for new rows. [`Connection`] is consumed by
//! [`crate::providers::LiveProvider`]; nothing else touches raw memory.

mod connection;

pub use connection::{Connection, IRSDKHeader, VarBuf, WaitResult};
