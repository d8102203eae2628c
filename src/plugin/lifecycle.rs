//! Plugin Lifecycle Signals
//!
//! One `Lifecycle` exists per started plugin server. It carries the stop
//! and restart signals shared by the gRPC server, every ListAndWatch
//! session, and the socket health monitor.

use crate::error::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Stop/restart signals for one plugin server instance
#[derive(Debug)]
pub struct Lifecycle {
    socket_path: PathBuf,
    stop: CancellationToken,
    restart: CancellationToken,
    stopped: AtomicBool,
}

impl Lifecycle {
    /// Create signals for a server listening on `socket_path`
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            stop: CancellationToken::new(),
            restart: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Token cancelled when the server stops
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Token cancelled when a restart is requested
    pub fn restart_token(&self) -> CancellationToken {
        self.restart.clone()
    }

    /// Ask the streaming sessions to restart the plugin
    pub fn request_restart(&self) {
        if !self.restart.is_cancelled() {
            info!("Plugin restart requested");
            self.restart.cancel();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Stop the server and remove its socket; later calls are no-ops
    pub fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("Stopping plugin server on {}", self.socket_path.display());
        self.stop.cancel();
        remove_socket(&self.socket_path)
    }
}

/// Remove a socket file left behind by a previous instance
pub fn remove_socket(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed socket {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
