//! Simulator process liveness probing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use sysinfo::{ProcessesToUpdate, System};
use tracing::trace;

use crate::{Result, TelemetryError};

/// Answers "is any process with one of these executable names running?".
#[async_trait]
pub trait ProcessProbe: Send + Sync + 'static {
    async fn any_running(&self, executable_names: &[String]) -> Result<bool>;
}

/// Case-insensitive executable name match, tolerant of a missing `.exe`
/// suffix (non-Windows process tables and Proton report both forms).
pub fn executable_matches(process_name: &str, expected: &str) -> bool {
    let process = process_name.to_ascii_lowercase();
    let expected = expected.to_ascii_lowercase();
    if process == expected {
        return true;
    }
    let strip = |s: &str| s.strip_suffix(".exe").map(str::to_string).unwrap_or_else(|| s.to_string());
    strip(&process) == strip(&expected)
}

/// Process probe backed by the OS process table.
#[derive(Clone)]
pub struct SysinfoProcessProbe {
    system: Arc<Mutex<System>>,
}

impl Default for SysinfoProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProcessProbe {
    pub fn new() -> Self {
        Self { system: Arc::new(Mutex::new(System::new())) }
    }
}

#[async_trait]
impl ProcessProbe for SysinfoProcessProbe {
    async fn any_running(&self, executable_names: &[String]) -> Result<bool> {
        let system = Arc::clone(&self.system);
        let names = executable_names.to_vec();

        // Refreshing the full process table can take milliseconds.
        tokio::task::spawn_blocking(move || {
            let mut system = system.lock();
            system.refresh_processes(ProcessesToUpdate::All, true);
            let found = system.processes().values().any(|process| {
                let name = process.name().to_string_lossy();
                names.iter().any(|expected| executable_matches(&name, expected))
            });
            trace!(?names, found, "Process table scanned");
            found
        })
        .await
        .map_err(|e| TelemetryError::process_probe_failed(format!("probe task failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_ignores_case_and_exe_suffix() {
        assert!(executable_matches("rFactor2.exe", "rfactor2.exe"));
        assert!(executable_matches("Le Mans Ultimate.exe", "LE MANS ULTIMATE.EXE"));
        assert!(executable_matches("iRacingSim64DX11", "iRacingSim64DX11.exe"));
        assert!(!executable_matches("rFactor2 Dedicated.exe", "rFactor2.exe"));
        assert!(!executable_matches("notepad.exe", "rFactor2.exe"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sysinfo_probe_does_not_find_nonsense() {
        let probe = SysinfoProcessProbe::new();
        let names = vec!["paddock-no-such-process-4f1c.exe".to_string()];
        assert!(!probe.any_running(&names).await.unwrap());
    }
}
