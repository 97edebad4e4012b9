//! iRacing shared memory connection.
//!
//! Struct layouts mirror `irsdk_defines.h`; reads follow the SDK's pattern of
//! picking the buffer with the highest tick count and re-checking the tick
//! after copying.

use std::ptr::NonNull;
use std::time::Duration;
use tracing::{debug, trace, warn};
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::System::Memory::{
    FILE_MAP_READ, MEMORY_MAPPED_VIEW_ADDRESS, MapViewOfFile, OpenFileMappingW, UnmapViewOfFile,
};
use windows::Win32::System::Threading::{OpenEventW, SYNCHRONIZATION_ACCESS_RIGHTS, WaitForSingleObject};
use windows::core::PCWSTR;

use crate::types::{VariableInfo, VariableType};
use crate::{Result, TelemetryError};

const MEMMAP_NAME: &str = "Local\\IRSDKMemMapFileName";
const DATA_VALID_EVENT_NAME: &str = "Local\\IRSDKDataValidEvent";
const SDK_VERSION: i32 = 2;
const STATUS_CONNECTED: i32 = 1;
const MAX_BUFS: usize = 4;
/// `SYNCHRONIZE` access right
const SYNCHRONIZE: u32 = 0x0010_0000;
/// Sentinel so the first row after connecting always counts as new
const NO_TICK: i32 = i32::MAX;

/// One rotating telemetry row buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VarBuf {
    pub tick_count: i32,
    pub buf_offset: i32,
    pub pad: [i32; 2],
}

/// `irsdk_varHeader`
#[repr(C)]
#[derive(Debug)]
pub struct IRSDKVarHeader {
    pub var_type: i32,
    pub offset: i32,
    pub count: i32,
    pub count_as_time: bool,
    pub pad: [u8; 3],
    pub name: [std::os::raw::c_char; 32],
    pub desc: [std::os::raw::c_char; 64],
    pub unit: [std::os::raw::c_char; 32],
}

fn c_text(raw: &[std::os::raw::c_char]) -> String {
    let bytes: Vec<u8> = raw.iter().map(|&c| c as u8).take_while(|&b| b != 0).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

impl IRSDKVarHeader {
    pub fn name(&self) -> String {
        c_text(&self.name)
    }

    pub fn description(&self) -> String {
        c_text(&self.desc)
    }

    pub fn unit(&self) -> String {
        c_text(&self.unit)
    }

    /// Storage type, `None` for codes newer than this crate knows.
    pub fn data_type(&self) -> Option<VariableType> {
        VariableType::from_irsdk(self.var_type)
    }
}

/// `irsdk_header`
#[repr(C)]
#[derive(Debug)]
pub struct IRSDKHeader {
    pub ver: i32,
    pub status: i32,
    pub tick_rate: i32,
    pub session_info_update: i32,
    pub session_info_len: i32,
    pub session_info_offset: i32,
    pub num_vars: i32,
    pub var_header_offset: i32,
    pub num_buf: i32,
    pub buf_len: i32,
    pub pad1: [i32; 2],
    pub var_buf: [VarBuf; MAX_BUFS],
}

/// Outcome of waiting on the data-valid event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Signaled,
    Timeout,
}

/// Read-only view of iRacing's memory map plus its data-valid event.
pub struct Connection {
    mapping: HANDLE,
    base: NonNull<u8>,
    event: HANDLE,
    last_tick_count: i32,
}

impl Connection {
    /// Open the mapping and event. Fails when iRacing has never run since boot
    /// or the header version is not the one this crate reads.
    pub fn try_connect() -> Result<Self> {
        trace!("Opening iRacing memory map");

        let mapping = unsafe {
            let name = wide_string(MEMMAP_NAME);
            OpenFileMappingW(FILE_MAP_READ.0, false, PCWSTR::from_raw(name.as_ptr()))
                .map_err(|e| TelemetryError::windows_api_error("OpenFileMappingW", e))?
        };

        let base = unsafe {
            let view = MapViewOfFile(mapping, FILE_MAP_READ, 0, 0, 0);
            match NonNull::new(view.Value as *mut u8) {
                Some(base) => base,
                None => {
                    let win_err = windows::core::Error::from_thread();
                    let _ = CloseHandle(mapping);
                    return Err(TelemetryError::windows_api_error("MapViewOfFile", win_err));
                }
            }
        };

        let event = unsafe {
            let name = wide_string(DATA_VALID_EVENT_NAME);
            OpenEventW(SYNCHRONIZATION_ACCESS_RIGHTS(SYNCHRONIZE), false, PCWSTR::from_raw(name.as_ptr()))
        };
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                unsafe {
                    let _ = UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS { Value: base.as_ptr() as *mut _ });
                    let _ = CloseHandle(mapping);
                }
                return Err(TelemetryError::windows_api_error("OpenEventW", e));
            }
        };

        let connection = Self { mapping, base, event, last_tick_count: NO_TICK };
        let header = connection.header();
        if header.ver != SDK_VERSION {
            return Err(TelemetryError::Version { expected: SDK_VERSION as u32, found: header.ver as u32 });
        }
        debug!(num_vars = header.num_vars, num_buf = header.num_buf, "iRacing memory map opened");
        Ok(connection)
    }

    pub fn header(&self) -> &IRSDKHeader {
        unsafe { &*(self.base.as_ptr() as *const IRSDKHeader) }
    }

    /// The sim sets this flag while a session is loaded.
    pub fn is_connected(&self) -> bool {
        self.header().status & STATUS_CONNECTED != 0
    }

    /// Wait for the data-valid event on the blocking pool.
    pub async fn wait_for_update_async(&self, timeout: Duration) -> Result<WaitResult> {
        // HANDLE is not Send; the kernel object outlives the wait because
        // `self` is borrowed across it.
        let event_raw = self.event.0 as usize;
        let timeout_ms = timeout.as_millis().min(u128::from(u32::MAX)) as u32;

        tokio::task::spawn_blocking(move || {
            let event = HANDLE(event_raw as *mut std::ffi::c_void);
            match unsafe { WaitForSingleObject(event, timeout_ms) } {
                WAIT_OBJECT_0 => Ok(WaitResult::Signaled),
                WAIT_TIMEOUT => Ok(WaitResult::Timeout),
                _ => Err(TelemetryError::windows_api_error(
                    "WaitForSingleObject",
                    windows::core::Error::from_thread(),
                )),
            }
        })
        .await
        .map_err(|e| TelemetryError::buffer_operation_error(format!("Event wait task failed: {e}"), None))?
    }

    /// The newest row, if its tick differs from the last one returned.
    pub fn get_new_data(&mut self) -> Option<&[u8]> {
        if !self.is_connected() {
            self.last_tick_count = NO_TICK;
            return None;
        }

        let header = self.header();
        let latest = self.find_latest_buffer(header);
        let buf = &header.var_buf[latest];
        if buf.tick_count == self.last_tick_count {
            return None;
        }

        for attempt in 1..=2 {
            let tick_before = unsafe { std::ptr::read_volatile(&buf.tick_count) };
            let row = unsafe {
                std::slice::from_raw_parts(self.base.as_ptr().add(buf.buf_offset as usize), header.buf_len as usize)
            };
            let tick_after = unsafe { std::ptr::read_volatile(&buf.tick_count) };
            if tick_before == tick_after {
                self.last_tick_count = tick_before;
                return Some(row);
            }
            debug!(attempt, tick_before, tick_after, buffer = latest, "Row rewritten during read");
        }

        warn!(buffer = latest, "Row kept changing, skipping frame");
        None
    }

    /// Session YAML, up to its NUL terminator.
    pub fn session_info(&self) -> Option<&str> {
        let header = self.header();
        if header.session_info_len <= 0 || header.session_info_offset < 0 {
            return None;
        }
        let bytes = unsafe {
            std::slice::from_raw_parts(
                self.base.as_ptr().add(header.session_info_offset as usize),
                header.session_info_len as usize,
            )
        };
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        std::str::from_utf8(&bytes[..end]).ok()
    }

    /// Variable headers, skipping any with an unknown storage type.
    pub fn get_variables(&self) -> Vec<VariableInfo> {
        let header = self.header();
        if header.num_vars <= 0 || header.var_header_offset <= 0 {
            return Vec::new();
        }

        let headers = unsafe {
            let ptr = self.base.as_ptr().add(header.var_header_offset as usize) as *const IRSDKVarHeader;
            std::slice::from_raw_parts(ptr, header.num_vars as usize)
        };

        headers
            .iter()
            .filter_map(|var| {
                let Some(data_type) = var.data_type() else {
                    warn!(name = %var.name(), code = var.var_type, "Skipping variable with unknown type");
                    return None;
                };
                Some(VariableInfo {
                    name: var.name(),
                    description: var.description(),
                    units: var.unit(),
                    data_type,
                    offset: var.offset as usize,
                    count: var.count as usize,
                    count_as_time: var.count_as_time,
                })
            })
            .collect()
    }

    /// Index of the buffer with the highest tick count.
    pub fn find_latest_buffer(&self, header: &IRSDKHeader) -> usize {
        let num_buf = (header.num_buf.max(1) as usize).min(MAX_BUFS);
        (0..num_buf).max_by_key(|&i| header.var_buf[i].tick_count).unwrap_or(0)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        unsafe {
            let _ = UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS { Value: self.base.as_ptr() as *mut _ });
            let _ = CloseHandle(self.mapping);
            let _ = CloseHandle(self.event);
        }
    }
}

// SAFETY: handles are process-wide kernel objects and the view is only read
unsafe impl Send for Connection {}
unsafe impl Sync for Connection {}

fn wide_string(s: &str) -> Vec<u16> {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
}

#[cfg(all(test, windows))]
mod tests {
    use super::*;

    #[test]
    fn struct_layouts_match_irsdk() {
        assert_eq!(std::mem::size_of::<IRSDKHeader>(), 112);
        assert_eq!(std::mem::align_of::<IRSDKHeader>(), 4);
        assert_eq!(std::mem::size_of::<VarBuf>(), 16);
        assert_eq!(std::mem::size_of::<IRSDKVarHeader>(), 144);
    }

    #[test]
    fn c_text_stops_at_nul() {
        let mut raw = [0 as std::os::raw::c_char; 8];
        for (slot, b) in raw.iter_mut().zip(b"RPM") {
            *slot = *b as std::os::raw::c_char;
        }
        assert_eq!(c_text(&raw), "RPM");
    }

    #[test]
    #[ignore = "iracing_required"]
    fn connects_to_live_iracing() {
        let connection = Connection::try_connect().unwrap();
        assert!(connection.header().num_vars > 0);
        assert!(connection.get_variables().iter().any(|v| v.name == "RPM"));
    }
}
