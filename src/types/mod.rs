//! Frame and variable types for the iRacing SDK.
//!
//! A [`FramePacket`] is a copy of one telemetry row plus the
//! [`VariableSchema`] describing it. Reads go through [`Value`], which
//! decodes by the variable's declared [`VariableType`] and then coerces, so a
//! caller asking for an `f32` gets an answer whether iRacing stores the
//! variable as float, int, bool, or bitfield.
//!
//! ```rust
//! use paddock::types::{FramePacket, VariableInfo, VariableSchema, VariableType};
//! use std::sync::Arc;
//!
//! let rpm = VariableInfo {
//!     name: "RPM".to_string(),
//!     data_type: VariableType::Float32,
//!     offset: 0,
//!     count: 1,
//!     count_as_time: false,
//!     units: "revs/min".to_string(),
//!     description: "Engine rpm".to_string(),
//! };
//! let schema = Arc::new(VariableSchema::new([rpm], 4).unwrap());
//! let frame = FramePacket::new(4500.0f32.to_le_bytes().to_vec(), 1, 1, schema);
//!
//! assert_eq!(frame.read_f32("RPM", 0), Some(4500.0));
//! assert_eq!(frame.read_i32("RPM", 0), Some(4500));
//! assert_eq!(frame.read_f32("Gear", 0), None);
//! ```

mod bitfield;
mod frame;
mod schema;
mod var_data;
mod variable_type;

pub use bitfield::{BitField, tick_after_u32};
pub use frame::FramePacket;
pub use schema::{VariableInfo, VariableSchema};
pub use var_data::VarData;
pub use variable_type::{Value, VariableType};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TelemetryError;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn info(name: &str, data_type: VariableType, offset: usize, count: usize) -> VariableInfo {
        VariableInfo {
            name: name.to_string(),
            data_type,
            offset,
            count,
            count_as_time: false,
            units: String::new(),
            description: String::new(),
        }
    }

    /// Gear (i32) at 0, OnPitRoad (bool) at 4, Speed (f32) at 8,
    /// CarIdxLap (i32 × 4) at 12, SessionFlags (bitfield) at 28.
    fn frame() -> FramePacket {
        let mut data = vec![0u8; 32];
        data[0..4].copy_from_slice(&3i32.to_le_bytes());
        data[4] = 1;
        data[8..12].copy_from_slice(&42.5f32.to_le_bytes());
        for (i, lap) in [5i32, 6, 7, 8].iter().enumerate() {
            data[12 + i * 4..16 + i * 4].copy_from_slice(&lap.to_le_bytes());
        }
        data[28..32].copy_from_slice(&0x0001_0004u32.to_le_bytes());

        let schema = VariableSchema::new(
            [
                info("Gear", VariableType::Int32, 0, 1),
                info("OnPitRoad", VariableType::Bool, 4, 1),
                info("Speed", VariableType::Float32, 8, 1),
                info("CarIdxLap", VariableType::Int32, 12, 4),
                info("SessionFlags", VariableType::BitField, 28, 1),
            ],
            32,
        )
        .unwrap();
        FramePacket::new(data, 100, 1, Arc::new(schema))
    }

    #[test]
    fn reads_coerce_between_representations() {
        let frame = frame();
        assert_eq!(frame.read_i32("Gear", 0), Some(3));
        assert_eq!(frame.read_f32("Gear", 0), Some(3.0));
        assert_eq!(frame.read_bool("OnPitRoad", 0), Some(true));
        assert_eq!(frame.read_f32("OnPitRoad", 0), Some(1.0));
        assert_eq!(frame.read_f32("Speed", 0), Some(42.5));
        assert_eq!(frame.read_i32("Speed", 0), Some(42));
        assert_eq!(frame.read_i32("SessionFlags", 0), Some(0x0001_0004));
        assert_eq!(frame.read_bool("SessionFlags", 0), Some(true));
    }

    #[test]
    fn arrays_are_indexed_and_bounded() {
        let frame = frame();
        assert_eq!(frame.read_i32("CarIdxLap", 0), Some(5));
        assert_eq!(frame.read_i32("CarIdxLap", 3), Some(8));
        assert_eq!(frame.read_i32("CarIdxLap", 4), None);
        assert_eq!(frame.read_i32("Gear", 1), None);
        assert_eq!(frame.read_f32("NoSuchVar", 0), None);
    }

    #[test]
    fn typed_reads_check_type_and_bounds() {
        let frame = frame();
        let gear = frame.schema.get_variable("Gear").unwrap();
        assert_eq!(i32::read(&frame.data, gear, 0).unwrap(), 3);
        assert!(matches!(f32::read(&frame.data, gear, 0), Err(TelemetryError::TypeConversion { .. })));
        assert!(matches!(i32::read(&frame.data[..2], gear, 0), Err(TelemetryError::Memory { .. })));

        let flags = frame.schema.get_variable("SessionFlags").unwrap();
        let bits = BitField::read(&frame.data, flags, 0).unwrap();
        assert!(bits.is_set(2) && bits.is_set(16) && !bits.is_set(0));
        assert!(!bits.is_set(40));
    }

    #[test]
    fn non_finite_floats_have_no_integer_view() {
        assert_eq!(Value::Float32(f32::NAN).as_i32(), None);
        assert_eq!(Value::Float64(f64::INFINITY).as_i32(), None);
        assert_eq!(Value::Float32(-2.9).as_i32(), Some(-2));
        assert!(!Value::Int32(0).as_bool());
        assert!(Value::Char(b'a').as_bool());
    }

    #[test]
    fn schema_rejects_inconsistent_layouts() {
        assert!(matches!(
            VariableSchema::new([info("Big", VariableType::Float64, 4, 1)], 8),
            Err(TelemetryError::Memory { .. })
        ));
        assert!(matches!(
            VariableSchema::new([info("Empty", VariableType::Int32, 0, 0)], 8),
            Err(TelemetryError::Parse { .. })
        ));
    }

    #[test]
    fn irsdk_type_codes() {
        assert_eq!(VariableType::from_irsdk(4), Some(VariableType::Float32));
        assert_eq!(VariableType::from_irsdk(3), Some(VariableType::BitField));
        assert_eq!(VariableType::from_irsdk(9), None);
        assert_eq!(VariableType::Float64.size(), 8);
        assert_eq!(VariableType::Bool.size(), 1);
    }

    proptest! {
        #[test]
        fn ticks_order_across_wraparound(base in any::<u32>(), step in 1u32..0x7FFF_FFFF) {
            let later = base.wrapping_add(step);
            prop_assert!(tick_after_u32(later, base));
            prop_assert!(!tick_after_u32(base, later));
            prop_assert!(!tick_after_u32(base, base));
        }

        #[test]
        fn decoding_never_reads_past_the_frame(
            offset in 0usize..64,
            count in 1usize..8,
            index in 0usize..10,
            len in 0usize..64,
        ) {
            let var = info("V", VariableType::Float64, offset, count);
            let data = vec![0u8; len];
            let result = Value::decode(&data, &var, index);
            if index < count && var.element_offset(index) + 8 <= len {
                prop_assert!(result.is_ok());
            } else {
                prop_assert!(result.is_err());
            }
        }
    }
}
