//! Mapped views of the rFactor 2 shared memory plugin buffers.

use std::ptr::NonNull;
use tracing::{debug, trace};
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Memory::{
    FILE_MAP_READ, MEMORY_MAPPED_VIEW_ADDRESS, MapViewOfFile, OpenFileMappingW, UnmapViewOfFile,
};
use windows::core::PCWSTR;

use super::SharedMemoryReader;
use super::layout::{
    SCORING_BUFFER_SIZE, ScoringBlock, TELEMETRY_BUFFER_SIZE, TelemetryBlock, decode_scoring,
    decode_telemetry,
};
use crate::{Result, TelemetryError};

const TELEMETRY_MAP_NAME: &str = "$rFactor2SMMP_Telemetry$";
const SCORING_MAP_NAME: &str = "$rFactor2SMMP_Scoring$";
/// Reads per buffer before a torn copy is reported
const READ_ATTEMPTS: usize = 2;

/// One read-only view of a named file mapping.
struct MappedView {
    mapping: HANDLE,
    base: NonNull<u8>,
    len: usize,
}

impl MappedView {
    fn open(name: &str, len: usize) -> Result<Self> {
        trace!(name, len, "Opening rF2 mapping");
        let mapping = unsafe {
            let wide_name = wide_string(name);
            OpenFileMappingW(FILE_MAP_READ.0, false, PCWSTR::from_raw(wide_name.as_ptr()))
                .map_err(|e| TelemetryError::windows_api_error("OpenFileMappingW", e))?
        };

        let base = unsafe {
            let ptr = MapViewOfFile(mapping, FILE_MAP_READ, 0, 0, len);
            match NonNull::new(ptr.Value as *mut u8) {
                Some(base) => base,
                None => {
                    let win_err = windows::core::Error::from_thread();
                    let _ = CloseHandle(mapping);
                    return Err(TelemetryError::windows_api_error("MapViewOfFile", win_err));
                }
            }
        };

        debug!(name, "Mapped rF2 buffer");
        Ok(Self { mapping, base, len })
    }

    /// Copy the whole view so decoding never observes a concurrent write
    /// half-way through a field.
    fn copy(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len];
        unsafe { std::ptr::copy_nonoverlapping(self.base.as_ptr(), out.as_mut_ptr(), self.len) };
        out
    }
}

impl Drop for MappedView {
    fn drop(&mut self) {
        unsafe {
            let addr = MEMORY_MAPPED_VIEW_ADDRESS { Value: self.base.as_ptr() as *mut _ };
            let _ = UnmapViewOfFile(addr);
            let _ = CloseHandle(self.mapping);
        }
    }
}

// SAFETY: the view is only read, and the handle is a process-wide kernel object
unsafe impl Send for MappedView {}

/// Reader over the plugin's telemetry and scoring mappings. Views are opened
/// lazily on the first read after the game starts and released on `close`.
#[derive(Default)]
pub struct MappedRf2Reader {
    views: Option<(MappedView, MappedView)>,
}

impl MappedRf2Reader {
    pub fn new() -> Self {
        Self::default()
    }

    fn views(&mut self) -> Result<&(MappedView, MappedView)> {
        if self.views.is_none() {
            let telemetry = MappedView::open(TELEMETRY_MAP_NAME, TELEMETRY_BUFFER_SIZE)?;
            let scoring = MappedView::open(SCORING_MAP_NAME, SCORING_BUFFER_SIZE)?;
            self.views = Some((telemetry, scoring));
        }
        self.views.as_ref().ok_or_else(|| TelemetryError::connection_failed("rF2 mappings unavailable"))
    }
}

fn stable_read<T>(
    view: &MappedView,
    decode: fn(&[u8]) -> Result<T>,
    consistent: fn(&T) -> bool,
    index: usize,
) -> Result<T> {
    for attempt in 0..READ_ATTEMPTS {
        let block = decode(&view.copy())?;
        if consistent(&block) {
            return Ok(block);
        }
        debug!(attempt = attempt + 1, buffer = index, "Torn rF2 buffer, retrying");
    }
    Err(TelemetryError::buffer_operation_error("rF2 buffer changed during every read", Some(index)))
}

impl SharedMemoryReader for MappedRf2Reader {
    fn read(&mut self) -> Result<(TelemetryBlock, ScoringBlock)> {
        let (telemetry, scoring) = self.views()?;
        let telemetry = stable_read(telemetry, decode_telemetry, TelemetryBlock::is_consistent, 0)?;
        let scoring = stable_read(scoring, decode_scoring, ScoringBlock::is_consistent, 1)?;
        Ok((telemetry, scoring))
    }

    fn close(&mut self) {
        if self.views.take().is_some() {
            debug!("Released rF2 mappings");
        }
    }
}

fn wide_string(s: &str) -> Vec<u16> {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
}
