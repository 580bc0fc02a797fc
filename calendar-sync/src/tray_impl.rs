// calendar-sync/src/tray_impl.rs
//! §6.C — the tray status surface. No native tray-icon toolkit is
//! vendored (out of scope for the core engineering, and not in this
//! workspace's dependency set); transitions are rendered as `tracing`
//! events at the `lifecycle` target, and `ExitClicked` is modelled as an
//! OS shutdown signal rather than a menu click.

use std::sync::Mutex;

use sync_core::tray::{TrayHandle, TrayPhase};
use tracing::info;

const MAX_TEXT_LEN: usize = 63;

/// Tracks the last-announced phase so transitions are only logged when
/// they actually change, mirroring a real tray icon's behaviour of only
/// redrawing on state change.
pub struct LoggingTray {
    last_phase: Mutex<Option<TrayPhase>>,
}

impl LoggingTray {
    pub fn new() -> Self {
        Self {
            last_phase: Mutex::new(None),
        }
    }
}

impl Default for LoggingTray {
    fn default() -> Self {
        Self::new()
    }
}

impl TrayHandle for LoggingTray {
    fn set_phase(&self, phase: TrayPhase) {
        let mut last = self.last_phase.lock().unwrap();
        if *last == Some(phase) {
            return;
        }
        *last = Some(phase);
        info!(target: "lifecycle", phase = ?phase, "tray phase transition");
    }

    fn update_text(&self, text: &str) {
        let truncated: String = text.chars().take(MAX_TEXT_LEN).collect();
        info!(target: "lifecycle", text = %truncated, "tray text update");
    }
}

/// Waits for a tray "Exit clicked" event. In this headless rendition
/// that's any OS shutdown signal (SIGINT/SIGTERM on Unix, Ctrl+C
/// elsewhere) — the contract's shape (a fired `ExitClicked`) is
/// preserved without assuming a GUI toolkit is present.
pub async fn wait_for_exit_clicked() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
