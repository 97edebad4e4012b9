//! Variable layout of a telemetry frame

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::VariableType;
use crate::{Result, TelemetryError};

/// Name → layout map for every variable in a frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableSchema {
    pub variables: HashMap<String, VariableInfo>,
    /// Bytes per frame
    pub frame_size: usize,
}

impl VariableSchema {
    /// Build a validated schema from variable headers.
    pub fn new(variables: impl IntoIterator<Item = VariableInfo>, frame_size: usize) -> Result<Self> {
        let variables = variables.into_iter().map(|info| (info.name.clone(), info)).collect();
        let schema = Self { variables, frame_size };
        schema.validate()?;
        Ok(schema)
    }

    /// Every variable has at least one element and fits inside the frame.
    pub fn validate(&self) -> Result<()> {
        for (name, info) in &self.variables {
            if info.count == 0 {
                return Err(TelemetryError::parse_error(
                    "Schema validation",
                    format!("Variable '{name}' has count of 0"),
                ));
            }
            if info.name != *name {
                return Err(TelemetryError::parse_error(
                    "Schema validation",
                    format!("Variable map key '{name}' doesn't match info name '{}'", info.name),
                ));
            }
            if info.end_offset() > self.frame_size {
                return Err(TelemetryError::memory_access_error(info.offset));
            }
        }
        Ok(())
    }

    pub fn get_variable(&self, name: &str) -> Option<&VariableInfo> {
        self.variables.get(name)
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }
}

/// Layout and metadata of one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub name: String,
    pub data_type: VariableType,
    /// Byte offset of element 0 within the frame
    pub offset: usize,
    /// 1 for scalars, the array length otherwise (64 for `CarIdx*`)
    pub count: usize,
    pub count_as_time: bool,
    pub units: String,
    pub description: String,
}

impl VariableInfo {
    /// Byte offset of element `index`.
    pub fn element_offset(&self, index: usize) -> usize {
        self.offset + index * self.data_type.size()
    }

    /// One past the last byte of the last element.
    pub fn end_offset(&self) -> usize {
        self.element_offset(self.count)
    }
}
