//! Variable types and decoded values

use serde::{Deserialize, Serialize};

use super::{BitField, VarData, VariableInfo};
use crate::Result;

/// Storage type of a telemetry variable, following `irsdk_VarType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableType {
    Char,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float32,
    Float64,
    Bool,
    BitField,
}

impl VariableType {
    /// Size in bytes of one element.
    pub const fn size(&self) -> usize {
        match self {
            VariableType::Char | VariableType::Bool | VariableType::Int8 | VariableType::UInt8 => 1,
            VariableType::Int16 | VariableType::UInt16 => 2,
            VariableType::Int32 | VariableType::UInt32 | VariableType::Float32 | VariableType::BitField => 4,
            VariableType::Float64 => 8,
        }
    }

    /// Map the SDK's numeric `irsdk_VarType`; unknown codes are `None`.
    pub const fn from_irsdk(code: i32) -> Option<Self> {
        match code {
            0 => Some(VariableType::Char),
            1 => Some(VariableType::Bool),
            2 => Some(VariableType::Int32),
            3 => Some(VariableType::BitField),
            4 => Some(VariableType::Float32),
            5 => Some(VariableType::Float64),
            _ => None,
        }
    }
}

/// One decoded element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Char(u8),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Float32(f32),
    Float64(f64),
    Bool(bool),
    BitField(BitField),
}

impl Value {
    /// Decode element `index` of `info` from `data` using its declared type.
    pub fn decode(data: &[u8], info: &VariableInfo, index: usize) -> Result<Self> {
        Ok(match info.data_type {
            VariableType::Char => Value::Char(u8::read(data, info, index)?),
            VariableType::Int8 => Value::Int8(i8::read(data, info, index)?),
            VariableType::UInt8 => Value::UInt8(u8::read(data, info, index)?),
            VariableType::Int16 => Value::Int16(i16::read(data, info, index)?),
            VariableType::UInt16 => Value::UInt16(u16::read(data, info, index)?),
            VariableType::Int32 => Value::Int32(i32::read(data, info, index)?),
            VariableType::UInt32 => Value::UInt32(u32::read(data, info, index)?),
            VariableType::Float32 => Value::Float32(f32::read(data, info, index)?),
            VariableType::Float64 => Value::Float64(f64::read(data, info, index)?),
            VariableType::Bool => Value::Bool(bool::read(data, info, index)?),
            VariableType::BitField => Value::BitField(BitField::read(data, info, index)?),
        })
    }

    /// Numeric view; booleans are 0/1 and bitfields their raw bits.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Char(v) | Value::UInt8(v) => f64::from(v),
            Value::Int8(v) => f64::from(v),
            Value::Int16(v) => f64::from(v),
            Value::UInt16(v) => f64::from(v),
            Value::Int32(v) => f64::from(v),
            Value::UInt32(v) => f64::from(v),
            Value::Float32(v) => f64::from(v),
            Value::Float64(v) => v,
            Value::Bool(v) => f64::from(u8::from(v)),
            Value::BitField(bits) => f64::from(bits.value()),
        }
    }

    /// Integer view; floats truncate toward zero and must be finite.
    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            Value::UInt32(v) => Some(v as i32),
            Value::BitField(bits) => Some(bits.value() as i32),
            Value::Float32(_) | Value::Float64(_) => {
                Some(self.as_f64()).filter(|v| v.is_finite()).map(|v| v as i32)
            }
            _ => Some(self.as_f64() as i32),
        }
    }

    /// Truthiness: any non-zero value.
    pub fn as_bool(&self) -> bool {
        match *self {
            Value::Bool(v) => v,
            Value::BitField(bits) => bits.value() != 0,
            _ => self.as_f64() != 0.0,
        }
    }
}
