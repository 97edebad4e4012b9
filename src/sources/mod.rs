//! Concrete telemetry sources.
//!
//! - [`synthetic`]: the demo generator, always available
//! - [`shared_memory`]: rFactor 2 / Le Mans Ultimate, polled
//! - [`callback`]: iRacing, driven by SDK events

pub mod callback;
pub mod shared_memory;
pub mod synthetic;
pub(crate) mod worker;

pub use callback::{CALLBACK_SOURCE_ID, CallbackTelemetrySource, SessionDigest};
pub use shared_memory::{SHARED_MEMORY_SOURCE_ID, SharedMemoryReader, SharedMemorySnapshot, SharedMemoryTelemetrySource};
pub use synthetic::{SYNTHETIC_SOURCE_ID, SyntheticTelemetrySource};
