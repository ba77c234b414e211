//! Local device and connection configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use bepsync_core::DeviceId;

/// A locally configured shared folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderConfig {
    pub folder_id: String,
    pub label: String,
    /// Peers this folder is shared with.
    pub devices: Vec<DeviceId>,
}

impl FolderConfig {
    pub fn new(folder_id: impl Into<String>, devices: Vec<DeviceId>) -> Self {
        let folder_id = folder_id.into();
        Self {
            label: folder_id.clone(),
            folder_id,
            devices,
        }
    }

    pub fn is_shared_with(&self, device: &DeviceId) -> bool {
        self.devices.contains(device)
    }
}

/// Identity of this device and the folders it shares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub local_device_id: DeviceId,
    pub local_device_name: String,
    pub folders: Vec<FolderConfig>,
}

impl Configuration {
    pub fn new(local_device_id: DeviceId, local_device_name: impl Into<String>) -> Self {
        Self {
            local_device_id,
            local_device_name: local_device_name.into(),
            folders: Vec::new(),
        }
    }

    pub fn with_folder(mut self, folder: FolderConfig) -> Self {
        self.folders.push(folder);
        self
    }

    pub fn folder(&self, folder_id: &str) -> Option<&FolderConfig> {
        self.folders.iter().find(|f| f.folder_id == folder_id)
    }

    /// Folders shared with `device`, in configuration order.
    pub fn folders_shared_with<'a>(
        &'a self,
        device: &'a DeviceId,
    ) -> impl Iterator<Item = &'a FolderConfig> + 'a {
        self.folders.iter().filter(move |f| f.is_shared_with(device))
    }
}

/// Per-connection tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Fixed period between pings.
    pub keepalive_interval: Duration,
    /// How long teardown waits for the close message to be written.
    pub close_timeout: Duration,
    pub client_name: String,
    pub client_version: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(90),
            close_timeout: Duration::from_secs(5),
            client_name: "bepsync".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
