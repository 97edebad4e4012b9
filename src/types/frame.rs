//! Telemetry frames

use std::sync::Arc;

use super::{Value, VariableSchema};

/// One telemetry sample as copied out of the simulator, plus the schema
/// needed to decode it.
#[derive(Debug, Clone)]
pub struct FramePacket {
    pub data: Arc<[u8]>,
    /// Simulator tick counter
    pub tick: u32,
    /// Session document version; a change means the session YAML changed
    pub session_version: u32,
    pub schema: Arc<VariableSchema>,
}

impl FramePacket {
    pub fn new(data: Vec<u8>, tick: u32, session_version: u32, schema: Arc<VariableSchema>) -> Self {
        Self { data: data.into(), tick, session_version, schema }
    }

    /// Decode element `index` of variable `name`. `None` when the variable
    /// is unknown, the index is past its element count, or the bytes are
    /// missing.
    pub fn value(&self, name: &str, index: usize) -> Option<Value> {
        let info = self.schema.get_variable(name)?;
        if index >= info.count {
            return None;
        }
        Value::decode(&self.data, info, index).ok()
    }

    pub fn read_f32(&self, name: &str, index: usize) -> Option<f32> {
        self.value(name, index).map(|v| v.as_f64() as f32)
    }

    pub fn read_i32(&self, name: &str, index: usize) -> Option<i32> {
        self.value(name, index).and_then(|v| v.as_i32())
    }

    pub fn read_bool(&self, name: &str, index: usize) -> Option<bool> {
        self.value(name, index).map(|v| v.as_bool())
    }
}
