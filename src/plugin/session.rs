//! ListAndWatch Session
//!
//! State machine behind one ListAndWatch stream:
//!
//! ```text
//! Idle ──► Streaming ──► Stopped      (stop signal, or kubelet hung up)
//!              │
//!              └───────► Restarting   (restart signal; stops the server)
//! ```
//!
//! The full device list is sent once on entry to `Streaming` and again
//! after every health update. Health updates are always reported as
//! healthy.

use super::lifecycle::Lifecycle;
use super::{DeviceList, HEALTHY};
use crate::error::{Error, Result};
use crate::v1beta1::{Device, ListAndWatchResponse};
use std::sync::Arc;
use tokio::sync::mpsc;
use tonic::Status;
use tracing::{debug, info, warn};

/// Channel type feeding the gRPC response stream
pub type ResponseSender = mpsc::Sender<std::result::Result<ListAndWatchResponse, Status>>;

/// Position of a session in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    Stopped,
    Restarting,
}

/// Convert the advertised device list to wire devices.
///
/// A device's ID is its index in the list, not its path.
pub fn to_plugin_devices(devices: &[String]) -> Vec<Device> {
    (0..devices.len())
        .map(|idx| Device {
            id: idx.to_string(),
            health: HEALTHY.to_string(),
            topology: None,
        })
        .collect()
}

/// One live ListAndWatch stream
pub struct ListAndWatchSession {
    state: SessionState,
    devices: DeviceList,
    lifecycle: Arc<Lifecycle>,
    health: mpsc::Receiver<Device>,
    updates: ResponseSender,
}

impl ListAndWatchSession {
    pub fn new(
        devices: DeviceList,
        lifecycle: Arc<Lifecycle>,
        health: mpsc::Receiver<Device>,
        updates: ResponseSender,
    ) -> Self {
        Self {
            state: SessionState::Idle,
            devices,
            lifecycle,
            health,
            updates,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Stream until stopped, restarted, or the kubelet goes away.
    ///
    /// Returns the terminal state, or the send error that ended the stream.
    pub async fn run(mut self) -> Result<SessionState> {
        let stop = self.lifecycle.stop_token();
        let restart = self.lifecycle.restart_token();

        self.state = SessionState::Streaming;
        self.send_devices().await?;

        loop {
            tokio::select! {
                biased;

                _ = stop.cancelled() => {
                    info!("ListAndWatch told to stop");
                    self.state = SessionState::Stopped;
                    break;
                }

                _ = restart.cancelled() => {
                    info!("ListAndWatch told to restart");
                    self.state = SessionState::Restarting;
                    if let Err(e) = self.lifecycle.stop() {
                        warn!("Stopping plugin for restart failed: {}", e);
                    }
                    break;
                }

                Some(device) = self.health.recv() => {
                    // Reported health is ignored; every device goes out healthy
                    info!("Device health update received for {} ({})", device.id, device.health);
                    self.send_devices().await?;
                }

                _ = self.updates.closed() => {
                    info!("ListAndWatch client disconnected");
                    self.state = SessionState::Stopped;
                    break;
                }
            }
        }

        Ok(self.state)
    }

    /// Send the current list, giving up once stop or restart fires
    async fn send_devices(&mut self) -> Result<()> {
        let devices = to_plugin_devices(&self.devices.read());
        debug!("Sending {} devices to kubelet", devices.len());

        let stop = self.lifecycle.stop_token();
        let restart = self.lifecycle.restart_token();
        let sent = tokio::select! {
            biased;

            _ = stop.cancelled() => return Ok(()),
            _ = restart.cancelled() => return Ok(()),
            sent = self.updates.send(Ok(ListAndWatchResponse { devices })) => sent,
        };

        sent.map_err(|e| {
            self.state = SessionState::Stopped;
            Error::StreamSend(e.to_string())
        })
    }
}
