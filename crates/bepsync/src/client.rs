//! The client: one local index and a connection per configured peer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use bepsync_bep::messages::IndexUpdate;
use bepsync_bep::{
    ClusterConfigInfo, Configuration, ConnectionActor, ConnectionConfig, ConnectionContext,
    ConnectionHandle, ConnectionState, Connector, FolderConfig, IndexHandler,
    RejectingRequestHandler, RequestHandler,
};
use bepsync_core::DeviceId;
use bepsync_store::{IndexRepository, MemoryStore, SqliteStore};

use crate::error::{ClientError, Result};

/// A peer device and where to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Hex device id.
    pub device_id: String,
    pub address: String,
}

/// A shared folder as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEntry {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    /// Hex ids of the devices the folder is shared with.
    #[serde(default)]
    pub devices: Vec<String>,
}

/// Client configuration, usually loaded from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Hex id of this device.
    pub device_id: String,
    pub device_name: String,
    /// SQLite index location. The index is kept in memory when unset.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    #[serde(default)]
    pub folders: Vec<FolderEntry>,
    #[serde(default)]
    pub connection: ConnectionConfig,
}

impl ClientConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Resolve the device and folder configuration.
    ///
    /// Every device a folder is shared with must be a configured peer.
    pub fn configuration(&self) -> Result<Configuration> {
        let local = DeviceId::from_hex(&self.device_id)?;
        let peers = self.peer_addresses()?;

        let mut configuration = Configuration::new(local, self.device_name.clone());
        for entry in &self.folders {
            let devices = entry
                .devices
                .iter()
                .map(|hex| -> Result<DeviceId> {
                    let device = DeviceId::from_hex(hex)?;
                    if !peers.contains_key(&device) {
                        return Err(ClientError::InvalidConfig(format!(
                            "folder {} is shared with unconfigured device {device}",
                            entry.id
                        )));
                    }
                    Ok(device)
                })
                .collect::<Result<Vec<_>>>()?;

            let mut folder = FolderConfig::new(entry.id.clone(), devices);
            if let Some(label) = &entry.label {
                folder.label = label.clone();
            }
            configuration = configuration.with_folder(folder);
        }
        Ok(configuration)
    }

    /// Peer addresses keyed by device.
    pub fn peer_addresses(&self) -> Result<HashMap<DeviceId, String>> {
        self.peers
            .iter()
            .map(|p| -> Result<(DeviceId, String)> {
                Ok((DeviceId::from_hex(&p.device_id)?, p.address.clone()))
            })
            .collect()
    }

    fn open_repository(&self) -> Result<Arc<dyn IndexRepository>> {
        let repository: Arc<dyn IndexRepository> = match &self.database_path {
            Some(path) => Arc::new(SqliteStore::open(path)?),
            None => Arc::new(MemoryStore::new()),
        };
        Ok(repository)
    }
}

/// A running client.
pub struct SyncClient {
    configuration: Arc<Configuration>,
    connection: ConnectionConfig,
    index: IndexHandler,
    connector: Arc<dyn Connector>,
    requests: Arc<dyn RequestHandler>,
    peers: HashMap<DeviceId, String>,
    connections: Mutex<HashMap<DeviceId, ConnectionHandle>>,
}

impl SyncClient {
    /// Open the index and prepare connections. Nothing is dialed yet.
    pub fn new(config: &ClientConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let configuration = config.configuration()?;
        let index = IndexHandler::new(config.open_repository()?);

        info!(
            device = %configuration.local_device_id,
            folders = configuration.folders.len(),
            peers = config.peers.len(),
            "client ready"
        );

        Ok(Self {
            configuration: Arc::new(configuration),
            connection: config.connection.clone(),
            index,
            connector,
            requests: Arc::new(RejectingRequestHandler),
            peers: config.peer_addresses()?,
            connections: Mutex::new(HashMap::new()),
        })
    }

    /// Answer block requests with `handler` on connections opened from now on.
    pub fn with_request_handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.requests = handler;
        self
    }

    pub fn device_id(&self) -> DeviceId {
        self.configuration.local_device_id
    }

    pub fn index(&self) -> &IndexHandler {
        &self.index
    }

    fn live_connection(&self, device: &DeviceId) -> Option<ConnectionHandle> {
        let mut connections = self
            .connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if connections
            .get(device)
            .is_some_and(|h| h.state() == ConnectionState::Closed)
        {
            connections.remove(device);
        }
        connections.get(device).cloned()
    }

    /// The open connection to `device`, if any.
    pub fn connection(&self, device: &DeviceId) -> Option<ConnectionHandle> {
        self.live_connection(device)
    }

    /// Connect to `device` and wait until the connection is active. Reuses an
    /// open connection.
    pub async fn connect(&self, device: DeviceId) -> Result<(ConnectionHandle, ClusterConfigInfo)> {
        if let Some(handle) = self.live_connection(&device) {
            let info = handle.confirm_connected().await?;
            return Ok((handle, info));
        }

        let address = self
            .peers
            .get(&device)
            .ok_or(ClientError::UnknownDevice(device))?;
        let context = ConnectionContext {
            configuration: Arc::clone(&self.configuration),
            connection: self.connection.clone(),
            connector: Arc::clone(&self.connector),
            index: self.index.clone(),
            requests: Arc::clone(&self.requests),
        };

        let (handle, task) = ConnectionActor::new(context, device, address.clone()).spawn();
        tokio::spawn(async move {
            match task.await {
                Ok(Ok(())) => info!(peer = %device, "connection ended"),
                Ok(Err(e)) => warn!(peer = %device, error = %e, "connection ended with error"),
                Err(e) => warn!(peer = %device, error = %e, "connection task failed"),
            }
        });

        let info = handle.confirm_connected().await?;
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(device, handle.clone());
        Ok((handle, info))
    }

    /// Connect to every configured peer. Failures are logged and skipped.
    pub async fn connect_all(&self) -> Vec<DeviceId> {
        let mut connected = Vec::new();
        let mut devices: Vec<DeviceId> = self.peers.keys().copied().collect();
        devices.sort();
        for device in devices {
            match self.connect(device).await {
                Ok(_) => connected.push(device),
                Err(e) => warn!(peer = %device, error = %e, "could not connect"),
            }
        }
        connected
    }

    /// Send an IndexUpdate to `device` over its open connection.
    pub async fn send_index_update(&self, device: DeviceId, update: IndexUpdate) -> Result<()> {
        let handle = self
            .live_connection(&device)
            .ok_or(ClientError::UnknownDevice(device))?;
        handle.send_index_update(update).await?;
        Ok(())
    }

    /// Close every connection and wait for teardown.
    pub async fn shutdown(&self) {
        let handles: Vec<ConnectionHandle> = self
            .connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in handles {
            handle.close("client shutting down").await;
        }
        info!("client stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: &str = "0101010101010101010101010101010101010101010101010101010101010101";
    const PEER: &str = "0202020202020202020202020202020202020202020202020202020202020202";

    fn json() -> String {
        format!(
            r#"{{
                "device_id": "{LOCAL}",
                "device_name": "laptop",
                "peers": [{{ "device_id": "{PEER}", "address": "desktop:22000" }}],
                "folders": [{{ "id": "default", "devices": ["{PEER}"] }}]
            }}"#
        )
    }

    #[test]
    fn test_parse_with_defaults() {
        let config = ClientConfig::from_json_str(&json()).unwrap();
        assert_eq!(config.device_name, "laptop");
        assert!(config.database_path.is_none());
        assert_eq!(config.connection, ConnectionConfig::default());

        let configuration = config.configuration().unwrap();
        let peer = DeviceId::from_hex(PEER).unwrap();
        assert_eq!(configuration.folders_shared_with(&peer).count(), 1);
        assert_eq!(configuration.folder("default").unwrap().label, "default");
    }

    #[test]
    fn test_folder_with_unknown_device_rejected() {
        let mut config = ClientConfig::from_json_str(&json()).unwrap();
        config.peers.clear();
        assert!(matches!(
            config.configuration(),
            Err(ClientError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_bad_device_id_rejected() {
        let mut config = ClientConfig::from_json_str(&json()).unwrap();
        config.device_id = "nothex".into();
        assert!(matches!(config.configuration(), Err(ClientError::Core(_))));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bepsync.json");
        std::fs::write(&path, json()).unwrap();
        let config = ClientConfig::from_json_file(&path).unwrap();
        assert_eq!(config.peers.len(), 1);

        assert!(matches!(
            ClientConfig::from_json_file(dir.path().join("missing.json")),
            Err(ClientError::Io(_))
        ));
    }
}
