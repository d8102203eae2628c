//! Socket Health Monitor
//!
//! Watches the kubelet registration socket and the plugin's own socket.
//! When either disappears (kubelet restart, plugin directory wiped) the
//! monitor requests a plugin restart once and exits.

use super::lifecycle::Lifecycle;
use super::HEALTH_CHECK_INTERVAL;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Why the monitor exited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// The plugin stopped first
    Stopped,
    /// A socket vanished and a restart was requested
    RestartRequested,
}

/// Periodic existence check over the two sockets the plugin depends on
#[derive(Debug, Clone)]
pub struct SocketHealthMonitor {
    kubelet_socket: PathBuf,
    plugin_socket: PathBuf,
    interval: Duration,
}

impl SocketHealthMonitor {
    pub fn new(kubelet_socket: impl Into<PathBuf>, plugin_socket: impl Into<PathBuf>) -> Self {
        Self {
            kubelet_socket: kubelet_socket.into(),
            plugin_socket: plugin_socket.into(),
            interval: HEALTH_CHECK_INTERVAL,
        }
    }

    /// Override the tick interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Name of the first missing socket, if any
    pub fn missing_socket(&self) -> Option<&Path> {
        [&self.kubelet_socket, &self.plugin_socket]
            .into_iter()
            .find(|path| !path.exists())
            .map(PathBuf::as_path)
    }

    /// Check on every tick until the plugin stops or a socket goes missing
    pub async fn run(self, lifecycle: Arc<Lifecycle>) -> MonitorExit {
        let stop = lifecycle.stop_token();
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Socket health monitor started (every {:?}) for {} and {}",
            self.interval,
            self.kubelet_socket.display(),
            self.plugin_socket.display()
        );

        loop {
            tokio::select! {
                biased;

                _ = stop.cancelled() => {
                    debug!("Socket health monitor exiting, plugin stopped");
                    return MonitorExit::Stopped;
                }

                _ = ticker.tick() => {
                    if let Some(missing) = self.missing_socket() {
                        warn!("Socket {} is missing, restarting plugin", missing.display());
                        lifecycle.request_restart();
                        return MonitorExit::RestartRequested;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sockets {
        dir: tempfile::TempDir,
        kubelet: PathBuf,
        plugin: PathBuf,
    }

    fn sockets() -> Sockets {
        let dir = tempfile::tempdir().unwrap();
        let kubelet = dir.path().join("kubelet.sock");
        let plugin = dir.path().join("plugin.sock");
        std::fs::write(&kubelet, b"").unwrap();
        std::fs::write(&plugin, b"").unwrap();
        Sockets {
            dir,
            kubelet,
            plugin,
        }
    }

    #[test]
    fn test_missing_socket() {
        let s = sockets();
        let monitor = SocketHealthMonitor::new(&s.kubelet, &s.plugin);
        assert_eq!(monitor.missing_socket(), None);

        std::fs::remove_file(&s.plugin).unwrap();
        assert_eq!(monitor.missing_socket(), Some(s.plugin.as_path()));

        std::fs::remove_file(&s.kubelet).unwrap();
        assert_eq!(monitor.missing_socket(), Some(s.kubelet.as_path()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_kubelet_socket_requests_restart_once() {
        let s = sockets();
        let lifecycle = Arc::new(Lifecycle::new(&s.plugin));
        std::fs::remove_file(&s.kubelet).unwrap();

        let monitor = SocketHealthMonitor::new(&s.kubelet, &s.plugin);
        let exit = monitor.run(lifecycle.clone()).await;

        assert_eq!(exit, MonitorExit::RestartRequested);
        assert!(lifecycle.restart_token().is_cancelled());
        assert!(!lifecycle.is_stopped());
        drop(s.dir);
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_sockets_keep_monitoring_until_stop() {
        let s = sockets();
        let lifecycle = Arc::new(Lifecycle::new(&s.plugin));
        let monitor =
            SocketHealthMonitor::new(&s.kubelet, &s.plugin).with_interval(Duration::from_secs(10));

        let task = tokio::spawn(monitor.run(lifecycle.clone()));

        // Several ticks pass with both sockets in place
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert!(!task.is_finished());
        assert!(!lifecycle.restart_token().is_cancelled());

        lifecycle.stop_token().cancel();
        assert_eq!(task.await.unwrap(), MonitorExit::Stopped);
        assert!(!lifecycle.restart_token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_socket_removed_between_ticks() {
        let s = sockets();
        let lifecycle = Arc::new(Lifecycle::new(&s.plugin));
        let monitor = SocketHealthMonitor::new(&s.kubelet, &s.plugin);
        let task = tokio::spawn(monitor.run(lifecycle.clone()));

        tokio::time::sleep(HEALTH_CHECK_INTERVAL + Duration::from_secs(1)).await;
        assert!(!task.is_finished());

        std::fs::remove_file(&s.plugin).unwrap();
        assert_eq!(task.await.unwrap(), MonitorExit::RestartRequested);
    }
}
