//! Frame providers behind the iRacing SDK pump.

use async_trait::async_trait;

use crate::Result;
use crate::types::FramePacket;

/// A stream of telemetry frames from one connection to the simulator.
#[async_trait]
pub trait Provider: Send + 'static {
    /// Wait for the next frame.
    ///
    /// - `Ok(Some(packet))`: a new frame
    /// - `Ok(None)`: the simulator went away; the provider is finished
    /// - `Err(e)`: a transient failure; the caller may call again
    async fn next_frame(&mut self) -> Result<Option<FramePacket>>;

    /// Cleaned session YAML for `version`, `Ok(None)` when there is none.
    async fn session_yaml(&mut self, version: u32) -> Result<Option<String>>;

    /// Native tick rate in Hz.
    fn tick_rate(&self) -> f64;
}

/// Opens providers. Called again after every disconnect.
#[async_trait]
pub trait ProviderFactory: Send + Sync + 'static {
    type Provider: Provider;

    async fn open(&self) -> Result<Self::Provider>;
}
