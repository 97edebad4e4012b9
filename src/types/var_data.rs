//! Typed reads of single variable elements

use super::{BitField, VariableInfo, VariableType};
use crate::{Result, TelemetryError};

/// A Rust type that can be read from a frame for variables of the listed
/// storage types.
pub trait VarData: Sized {
    /// Storage types this Rust type reads without conversion.
    const ACCEPTS: &'static [VariableType];
    const SIZE: usize;

    fn from_le(bytes: &[u8]) -> Self;

    /// Read element `index` of `info`, checking type and bounds.
    fn read(data: &[u8], info: &VariableInfo, index: usize) -> Result<Self> {
        if !Self::ACCEPTS.contains(&info.data_type) {
            return Err(TelemetryError::TypeConversion {
                details: format!(
                    "'{}' is {:?}, expected one of {:?}",
                    info.name,
                    info.data_type,
                    Self::ACCEPTS
                ),
            });
        }
        if index >= info.count {
            return Err(TelemetryError::FieldNotFound { field: format!("{}[{index}]", info.name) });
        }
        let offset = info.element_offset(index);
        data.get(offset..offset + Self::SIZE)
            .map(Self::from_le)
            .ok_or_else(|| TelemetryError::memory_access_error(offset))
    }
}

macro_rules! impl_var_data {
    ($ty:ty, $size:expr, [$($accepts:ident),+]) => {
        impl VarData for $ty {
            const ACCEPTS: &'static [VariableType] = &[$(VariableType::$accepts),+];
            const SIZE: usize = $size;

            fn from_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; $size];
                raw.copy_from_slice(&bytes[..$size]);
                <$ty>::from_le_bytes(raw)
            }
        }
    };
}

impl_var_data!(u8, 1, [UInt8, Char]);
impl_var_data!(i8, 1, [Int8]);
impl_var_data!(u16, 2, [UInt16]);
impl_var_data!(i16, 2, [Int16]);
impl_var_data!(i32, 4, [Int32]);
impl_var_data!(u32, 4, [UInt32]);
impl_var_data!(f32, 4, [Float32]);
impl_var_data!(f64, 8, [Float64]);

impl VarData for bool {
    const ACCEPTS: &'static [VariableType] = &[VariableType::Bool];
    const SIZE: usize = 1;

    fn from_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

impl VarData for BitField {
    const ACCEPTS: &'static [VariableType] = &[VariableType::BitField];
    const SIZE: usize = 4;

    fn from_le(bytes: &[u8]) -> Self {
        BitField(<u32 as VarData>::from_le(bytes))
    }
}
