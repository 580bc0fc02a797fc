// calendar-sync/src/host.rs
//! §6.D — host process helpers: locating/starting the source automation
//! host. Platform process-list probes and a detached launch, behind the
//! `sync_core::bridge::HostProcess` trait so the attach state machine
//! itself stays platform-independent.

use std::process::{Command, Stdio};

use sync_core::bridge::HostProcess;

/// Probes/launches a named executable by process-list membership. On
/// non-Windows platforms the source automation host this bridge targets
/// does not exist; `probe_running` then always reports `false` and
/// `launch` always fails, which drives the attach state machine straight
/// to `HostUnavailable` rather than hanging — the correct behaviour for
/// a platform where the source simply isn't present.
pub struct ProcessListHost {
    process_name: String,
    launch_path: Option<String>,
}

impl ProcessListHost {
    pub fn new(process_name: impl Into<String>, launch_path: Option<String>) -> Self {
        Self {
            process_name: process_name.into(),
            launch_path,
        }
    }
}

impl HostProcess for ProcessListHost {
    fn probe_running(&self) -> bool {
        #[cfg(target_os = "windows")]
        {
            Command::new("tasklist")
                .output()
                .map(|out| {
                    String::from_utf8_lossy(&out.stdout)
                        .to_ascii_lowercase()
                        .contains(&self.process_name.to_ascii_lowercase())
                })
                .unwrap_or(false)
        }
        #[cfg(not(target_os = "windows"))]
        {
            let _ = &self.process_name;
            false
        }
    }

    fn launch(&self) -> Result<(), String> {
        let Some(path) = &self.launch_path else {
            return Err("no launch path configured for source host".to_string());
        };
        #[cfg(target_os = "windows")]
        {
            Command::new(path)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map(|_| ())
                .map_err(|e| e.to_string())
        }
        #[cfg(not(target_os = "windows"))]
        {
            let _ = (path, Stdio::null());
            Err("source automation host is only available on the target platform".to_string())
        }
    }
}
