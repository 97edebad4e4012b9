//! Live iRacing provider over the Windows memory map.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::provider::{Provider, ProviderFactory};
use crate::types::{FramePacket, VariableSchema};
use crate::windows::{Connection, WaitResult};
use crate::{Result, yaml_utils};

/// How long one event wait blocks before re-checking the connection flag.
const EVENT_WAIT: Duration = Duration::from_millis(500);

/// Frames read straight out of iRacing's shared memory.
pub struct LiveProvider {
    connection: Connection,
    schema: Arc<VariableSchema>,
}

impl LiveProvider {
    /// Map the shared memory and build the variable schema. Fails when
    /// iRacing has not created the mapping.
    pub fn new() -> Result<Self> {
        let connection = Connection::try_connect()?;
        let header = connection.header();
        let schema = Arc::new(VariableSchema::new(connection.get_variables(), header.buf_len as usize)?);

        info!(
            sdk_version = header.ver,
            tick_rate = header.tick_rate,
            num_vars = header.num_vars,
            sim_connected = connection.is_connected(),
            "Mapped iRacing shared memory"
        );
        Ok(Self { connection, schema })
    }
}

#[async_trait]
impl Provider for LiveProvider {
    async fn next_frame(&mut self) -> Result<Option<FramePacket>> {
        loop {
            // The mapping outlives the sim session; the status flag is the
            // only signal that iRacing left.
            if !self.connection.is_connected() {
                debug!("iRacing status flag cleared");
                return Ok(None);
            }

            if let Some(data) = self.connection.get_new_data() {
                let frame_data = data.to_vec();
                let header = self.connection.header();
                let latest = self.connection.find_latest_buffer(header);
                let tick = header.var_buf[latest].tick_count as u32;
                let session_version = header.session_info_update as u32;
                trace!(tick, session_version, size = frame_data.len(), "Frame");
                return Ok(Some(FramePacket::new(frame_data, tick, session_version, Arc::clone(&self.schema))));
            }

            match self.connection.wait_for_update_async(EVENT_WAIT).await? {
                WaitResult::Signaled => trace!("Data event signaled"),
                WaitResult::Timeout => trace!("Data event wait timed out"),
            }
        }
    }

    async fn session_yaml(&mut self, version: u32) -> Result<Option<String>> {
        let Some(raw) = self.connection.session_info() else {
            debug!(version, "No session info available");
            return Ok(None);
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let cleaned = yaml_utils::preprocess_iracing_yaml(raw)?;
        debug!(version, bytes = cleaned.len(), "Extracted session YAML");
        Ok(Some(cleaned))
    }

    fn tick_rate(&self) -> f64 {
        f64::from(self.connection.header().tick_rate)
    }
}

/// Opens a fresh [`LiveProvider`] on every reconnect.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiveProviderFactory;

#[async_trait]
impl ProviderFactory for LiveProviderFactory {
    type Provider = LiveProvider;

    async fn open(&self) -> Result<LiveProvider> {
        tokio::task::spawn_blocking(LiveProvider::new).await.map_err(|e| {
            crate::TelemetryError::connection_failed(format!("Provider open task failed: {e}"))
        })?
    }
}
