//! Bitfield variables and tick ordering

use serde::{Deserialize, Serialize};

/// Raw value of an iRacing bitfield variable (`SessionFlags`, `EngineWarnings`, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BitField(pub u32);

impl BitField {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn is_set(&self, bit: u32) -> bool {
        bit < 32 && (self.0 & (1 << bit)) != 0
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        (self.0 & flag) != 0
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

/// Whether tick `a` is newer than `b`, tolerating u32 wraparound.
pub fn tick_after_u32(a: u32, b: u32) -> bool {
    a != b && a.wrapping_sub(b) < 0x8000_0000
}
