//! Concrete frame providers.

#[cfg(windows)]
pub mod live;

#[cfg(windows)]
pub use live::{LiveProvider, LiveProviderFactory};

/// Factory the SDK uses when none is supplied.
#[cfg(windows)]
pub type DefaultProviderFactory = LiveProviderFactory;

#[cfg(not(windows))]
pub type DefaultProviderFactory = UnsupportedProviderFactory;

#[cfg(not(windows))]
pub use unsupported::{UnsupportedProvider, UnsupportedProviderFactory};

#[cfg(not(windows))]
mod unsupported {
    use async_trait::async_trait;

    use crate::provider::{Provider, ProviderFactory};
    use crate::types::FramePacket;
    use crate::{Result, TelemetryError};

    /// iRacing only exists on Windows; this provider can never be opened.
    pub enum UnsupportedProvider {}

    #[async_trait]
    impl Provider for UnsupportedProvider {
        async fn next_frame(&mut self) -> Result<Option<FramePacket>> {
            match *self {}
        }

        async fn session_yaml(&mut self, _version: u32) -> Result<Option<String>> {
            match *self {}
        }

        fn tick_rate(&self) -> f64 {
            match *self {}
        }
    }

    /// Fails every open with [`TelemetryError::UnsupportedPlatform`].
    #[derive(Debug, Default, Clone, Copy)]
    pub struct UnsupportedProviderFactory;

    #[async_trait]
    impl ProviderFactory for UnsupportedProviderFactory {
        type Provider = UnsupportedProvider;

        async fn open(&self) -> Result<UnsupportedProvider> {
            Err(TelemetryError::unsupported_platform("iRacing live telemetry", "Windows"))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn open_reports_unsupported_platform() {
            let err = UnsupportedProviderFactory.open().await.err().unwrap();
            assert!(matches!(err, TelemetryError::UnsupportedPlatform { .. }));
        }
    }
}
