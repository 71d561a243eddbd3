//! Host network driver: link state from sysfs, mode switches through optional shell hooks.
//!
//! Hooks run via `sh -c` with the relevant values in `TANKSYNC_*` environment variables. They
//! are started and left running; the supervisor observes their effect through `operstate`, so
//! nothing here ever waits on a child process.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use log::{debug, warn};

use super::network::{AccessPointConfig, NetworkDriver, NetworkError};
use crate::settings::WifiCredentials;

const SYSFS_NET: &str = "/sys/class/net";

/// Shell commands invoked on mode switches. A missing hook is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkHooks {
    pub station: Option<String>,
    pub access_point: Option<String>,
    pub disconnect: Option<String>,
}

pub struct SysfsNetwork {
    interface: String,
    root: PathBuf,
    hooks: NetworkHooks,
    children: Vec<(String, Child)>,
}

impl SysfsNetwork {
    pub fn new(interface: impl Into<String>, hooks: NetworkHooks) -> Self {
        Self {
            interface: interface.into(),
            root: PathBuf::from(SYSFS_NET),
            hooks,
            children: Vec::new(),
        }
    }

    /// Read link state from `root/<iface>/operstate` instead of `/sys/class/net`.
    pub fn with_root(mut self, root: impl AsRef<Path>) -> Self {
        self.root = root.as_ref().to_path_buf();
        self
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Contents of the interface's `operstate` file, trimmed.
    pub fn operstate(&self) -> Result<String, NetworkError> {
        let dir = self.root.join(&self.interface);
        if !dir.is_dir() {
            return Err(NetworkError::Unavailable(self.interface.clone()));
        }
        Ok(fs::read_to_string(dir.join("operstate"))?.trim().to_string())
    }

    fn spawn_hook(
        &mut self,
        command: Option<String>,
        envs: &[(&str, String)],
    ) -> Result<(), NetworkError> {
        self.reap();
        let Some(command) = command else {
            return Ok(());
        };
        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .env("TANKSYNC_INTERFACE", &self.interface)
            .envs(envs.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| NetworkError::Hook {
                command: command.clone(),
                reason: e.to_string(),
            })?;
        debug!("Started network hook (pid {}): {}", child.id(), command);
        self.children.push((command, child));
        Ok(())
    }

    /// Collect finished hooks so they do not linger as zombies.
    fn reap(&mut self) {
        self.children.retain_mut(|(command, child)| match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    warn!("Network hook `{}` exited with {}", command, status);
                }
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!("Lost track of network hook `{}`: {}", command, e);
                false
            }
        });
    }
}

impl NetworkDriver for SysfsNetwork {
    fn begin_station(&mut self, credentials: &WifiCredentials) -> Result<(), NetworkError> {
        let hook = self.hooks.station.clone();
        self.spawn_hook(
            hook,
            &[
                ("TANKSYNC_SSID", credentials.ssid.clone()),
                ("TANKSYNC_PASSWORD", credentials.password.clone()),
            ],
        )
    }

    fn link_up(&mut self) -> bool {
        self.reap();
        match self.operstate() {
            Ok(state) => state == "up",
            Err(e) => {
                debug!("Link state unavailable: {}", e);
                false
            }
        }
    }

    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), NetworkError> {
        let hook = self.hooks.access_point.clone();
        self.spawn_hook(
            hook,
            &[
                ("TANKSYNC_AP_SSID", config.ssid.clone()),
                ("TANKSYNC_AP_PASSWORD", config.password.clone()),
                ("TANKSYNC_AP_CHANNEL", config.channel.to_string()),
                ("TANKSYNC_AP_MAX_CLIENTS", config.max_connections.to_string()),
            ],
        )
    }

    fn stop_access_point(&mut self) -> Result<(), NetworkError> {
        let hook = self.hooks.disconnect.clone();
        self.spawn_hook(hook, &[("TANKSYNC_MODE", "ap".to_string())])
    }

    fn disconnect(&mut self) -> Result<(), NetworkError> {
        let hook = self.hooks.disconnect.clone();
        self.spawn_hook(hook, &[("TANKSYNC_MODE", "station".to_string())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_iface(state: &str) -> TempDir {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("wlan0")).unwrap();
        fs::write(root.path().join("wlan0/operstate"), state).unwrap();
        root
    }

    #[test]
    fn reads_operstate() {
        let root = fake_iface("up\n");
        let mut net = SysfsNetwork::new("wlan0", NetworkHooks::default()).with_root(root.path());
        assert!(net.link_up());

        fs::write(root.path().join("wlan0/operstate"), "dormant\n").unwrap();
        assert!(!net.link_up());
    }

    #[test]
    fn missing_interface_is_down() {
        let root = tempfile::tempdir().unwrap();
        let mut net = SysfsNetwork::new("wlan9", NetworkHooks::default()).with_root(root.path());
        assert!(!net.link_up());
        assert!(matches!(net.operstate(), Err(NetworkError::Unavailable(_))));
    }

    #[cfg(unix)]
    #[test]
    fn hooks_are_spawned_without_waiting() {
        let root = fake_iface("down");
        let hooks = NetworkHooks {
            station: Some("exit 0".into()),
            ..NetworkHooks::default()
        };
        let mut net = SysfsNetwork::new("wlan0", hooks).with_root(root.path());
        let creds = WifiCredentials {
            ssid: "farm".into(),
            password: "pw".into(),
        };
        net.begin_station(&creds).unwrap();
        // No disconnect hook configured: nothing to run.
        net.disconnect().unwrap();
        assert!(net.children.len() <= 1);
    }
}
