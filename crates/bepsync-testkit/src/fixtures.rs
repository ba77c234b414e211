//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use bepsync_bep::messages::{
    ClusterConfig, Counter, Device, FileInfoType, Folder, Hello, Message, WireBlockInfo,
    WireFileInfo,
};
use bepsync_bep::{
    BepError, Configuration, ConnectionActor, ConnectionConfig, ConnectionContext,
    ConnectionHandle, FolderConfig, IndexHandler, MemoryConnector, RejectingRequestHandler,
    Result, Wire,
};
use bepsync_core::DeviceId;
use bepsync_store::{IndexRepository, MemoryStore};

/// A local device with an in-memory index and connector.
pub struct TestFixture {
    pub name: String,
    pub certificate: Vec<u8>,
    pub device_id: DeviceId,
    pub configuration: Configuration,
    pub index: IndexHandler,
    pub connector: Arc<MemoryConnector>,
}

impl TestFixture {
    /// Create a device whose certificate is derived from `name`.
    pub fn new(name: &str) -> Self {
        Self::with_repository(name, Arc::new(MemoryStore::new()))
    }

    pub fn with_repository(name: &str, repository: Arc<dyn IndexRepository>) -> Self {
        let certificate = format!("certificate:{name}").into_bytes();
        let device_id = DeviceId::from_certificate(&certificate);
        Self {
            name: name.to_string(),
            configuration: Configuration::new(device_id, name),
            certificate,
            device_id,
            index: IndexHandler::new(repository),
            connector: Arc::new(MemoryConnector::new()),
        }
    }

    /// Configure `folder` as shared with `devices`.
    pub fn share_folder(mut self, folder: &str, devices: &[DeviceId]) -> Self {
        self.configuration = self
            .configuration
            .with_folder(FolderConfig::new(folder, devices.to_vec()));
        self
    }

    /// Connection settings with short timeouts and no keep-alive during a
    /// typical test.
    pub fn connection_config() -> ConnectionConfig {
        ConnectionConfig {
            keepalive_interval: Duration::from_secs(3600),
            close_timeout: Duration::from_secs(1),
            ..ConnectionConfig::default()
        }
    }

    pub fn context(&self) -> ConnectionContext {
        ConnectionContext {
            configuration: Arc::new(self.configuration.clone()),
            connection: Self::connection_config(),
            connector: self.connector.clone(),
            index: self.index.clone(),
            requests: Arc::new(RejectingRequestHandler),
        }
    }

    /// Start a connection to `peer` over an in-memory pipe. The peer's end is
    /// returned as a [`ScriptedPeer`] presenting `peer`'s certificate.
    pub fn connect(
        &self,
        peer: &TestFixture,
        address: &str,
    ) -> (ConnectionHandle, JoinHandle<Result<()>>, ScriptedPeer) {
        self.connect_with(self.context(), peer, peer.certificate.clone(), address)
    }

    /// Like [`connect`](Self::connect) with an explicit context and the
    /// certificate the remote end presents.
    pub fn connect_with(
        &self,
        context: ConnectionContext,
        peer: &TestFixture,
        presented_certificate: Vec<u8>,
        address: &str,
    ) -> (ConnectionHandle, JoinHandle<Result<()>>, ScriptedPeer) {
        let remote = self.connector.add_peer(address, presented_certificate);
        let (handle, task) = ConnectionActor::new(context, peer.device_id, address).spawn();
        let scripted = ScriptedPeer {
            wire: Wire::new(Box::new(remote)),
            device_id: peer.device_id,
            name: peer.name.clone(),
        };
        (handle, task, scripted)
    }
}

/// The remote end of a connection, driven by the test.
pub struct ScriptedPeer {
    pub wire: Wire,
    pub device_id: DeviceId,
    pub name: String,
}

impl ScriptedPeer {
    pub fn hello(&self) -> Hello {
        Hello {
            device_name: self.name.clone(),
            client_name: "scripted".into(),
            client_version: "0.0.0".into(),
        }
    }

    /// Answer the Hello and the ClusterConfig of the connecting side.
    ///
    /// `folders` lists `(folder, index_id, max_sequence)` for this peer's own
    /// index; each folder also lists `local` so it counts as shared. Returns
    /// the ClusterConfig received.
    pub async fn handshake(
        &self,
        local: DeviceId,
        folders: &[(&str, u64, i64)],
    ) -> Result<ClusterConfig> {
        self.wire.recv_hello().await?;
        self.wire.send_hello(&self.hello()).await?;

        let received = match self.wire.recv().await? {
            Message::ClusterConfig(cc) => cc,
            other => {
                return Err(BepError::ProtocolViolation(format!(
                    "expected cluster config, got {}",
                    other.kind()
                )))
            }
        };

        let folders = folders
            .iter()
            .map(|(id, index_id, max_sequence)| Folder {
                id: id.to_string(),
                label: id.to_string(),
                devices: vec![
                    Device::new(local, "local", 0, 0),
                    Device::new(self.device_id, self.name.clone(), *index_id, *max_sequence),
                ],
                ..Default::default()
            })
            .collect();
        self.wire
            .send(&Message::ClusterConfig(ClusterConfig { folders }))
            .await?;
        Ok(received)
    }

    pub async fn send(&self, message: Message) -> Result<()> {
        self.wire.send(&message).await
    }

    /// Next message that is not a Ping.
    pub async fn recv(&self) -> Result<Message> {
        loop {
            match self.wire.recv().await? {
                Message::Ping => continue,
                other => return Ok(other),
            }
        }
    }
}

fn counter(sequence: i64) -> Vec<Counter> {
    vec![Counter {
        id: 1,
        value: sequence.max(1) as u64,
    }]
}

/// A live file of `size` bytes backed by one block.
pub fn wire_file(name: &str, size: i32, modified_s: i64, sequence: i64) -> WireFileInfo {
    WireFileInfo {
        name: name.to_string(),
        file_type: FileInfoType::File.to_i32(),
        size: size as i64,
        permissions: 0o644,
        modified_s,
        version: counter(sequence),
        sequence,
        block_size: size,
        blocks: vec![WireBlockInfo {
            offset: 0,
            size,
            hash: vec![(size % 251) as u8; 32],
            weak_hash: 0,
        }],
        ..Default::default()
    }
}

/// A deleted file record.
pub fn wire_deleted(name: &str, modified_s: i64, sequence: i64) -> WireFileInfo {
    WireFileInfo {
        name: name.to_string(),
        file_type: FileInfoType::File.to_i32(),
        modified_s,
        deleted: true,
        version: counter(sequence),
        sequence,
        ..Default::default()
    }
}

pub fn wire_dir(name: &str, modified_s: i64, sequence: i64) -> WireFileInfo {
    WireFileInfo {
        name: name.to_string(),
        file_type: FileInfoType::Directory.to_i32(),
        permissions: 0o755,
        modified_s,
        version: counter(sequence),
        sequence,
        ..Default::default()
    }
}

pub fn wire_symlink(name: &str, target: &str, modified_s: i64, sequence: i64) -> WireFileInfo {
    WireFileInfo {
        name: name.to_string(),
        file_type: FileInfoType::Symlink.to_i32(),
        modified_s,
        version: counter(sequence),
        sequence,
        symlink_target: target.to_string(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_identity_is_stable() {
        let a = TestFixture::new("a");
        let again = TestFixture::new("a");
        let b = TestFixture::new("b");
        assert_eq!(a.device_id, again.device_id);
        assert_ne!(a.device_id, b.device_id);
    }

    #[test]
    fn test_share_folder() {
        let peer = TestFixture::new("peer");
        let local = TestFixture::new("local").share_folder("default", &[peer.device_id]);
        let shared: Vec<_> = local
            .configuration
            .folders_shared_with(&peer.device_id)
            .collect();
        assert_eq!(shared.len(), 1);
    }

    #[test]
    fn test_wire_file_blocks_cover_size() {
        let f = wire_file("a", 1000, 1, 1);
        let total: i64 = f.blocks.iter().map(|b| b.size as i64).sum();
        assert_eq!(total, f.size);
    }
}
