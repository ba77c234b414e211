//! Cluster configuration exchange: which folders this connection shares and
//! where each side's index stands.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use bepsync_core::DeviceId;

use crate::config::Configuration;
use crate::error::Result;
use crate::index::IndexHandler;
use crate::messages::{ClusterConfig, Device, Folder, Hello};

/// Outcome of the cluster configuration exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfigInfo {
    /// Folders both sides agree to share.
    pub shared_folder_ids: BTreeSet<String>,
    /// Folders the peer offered that are not configured locally.
    pub new_folders: Vec<String>,
    pub peer_hello: Hello,
}

impl ClusterConfigInfo {
    pub fn has_folder(&self, folder_id: &str) -> bool {
        self.shared_folder_ids.contains(folder_id)
    }
}

/// Build the ClusterConfig we announce to `peer`.
///
/// Each folder shared with the peer lists two devices: ourselves with the
/// local index state, and the peer with what we last recorded of its index.
pub async fn build_cluster_config(
    config: &Configuration,
    index: &IndexHandler,
    peer: DeviceId,
    peer_name: &str,
) -> Result<ClusterConfig> {
    let (local_index_id, local_sequence) = index.local_index_state().await?;

    let mut folders = Vec::new();
    for folder in config.folders_shared_with(&peer) {
        let known = index.index_info(&folder.folder_id, peer).await?;
        let (peer_index_id, peer_max_sequence) = known
            .map(|info| (info.index_id, info.max_sequence))
            .unwrap_or((0, 0));

        folders.push(Folder {
            id: folder.folder_id.clone(),
            label: folder.label.clone(),
            devices: vec![
                Device::new(
                    config.local_device_id,
                    config.local_device_name.clone(),
                    local_index_id,
                    local_sequence,
                ),
                Device::new(peer, peer_name, peer_index_id, peer_max_sequence),
            ],
            ..Default::default()
        });
    }

    Ok(ClusterConfig { folders })
}

/// Work out the shared folder set from the peer's ClusterConfig and record
/// the peer's announced index state for each shared folder.
pub async fn handle_received_cluster_config(
    config: &Configuration,
    index: &IndexHandler,
    peer: DeviceId,
    received: &ClusterConfig,
    peer_hello: Hello,
) -> Result<ClusterConfigInfo> {
    let mut shared_folder_ids = BTreeSet::new();
    let mut new_folders = Vec::new();

    for folder in &received.folders {
        let Some(local) = config.folder(&folder.id) else {
            debug!(folder = %folder.id, peer = %peer, "peer offers unknown folder");
            new_folders.push(folder.id.clone());
            continue;
        };
        if !local.is_shared_with(&peer) {
            warn!(folder = %folder.id, peer = %peer, "folder not shared with peer locally");
            continue;
        }
        if !folder.devices.iter().any(|d| d.id == config.local_device_id) {
            debug!(folder = %folder.id, peer = %peer, "peer does not share folder with us");
            continue;
        }

        if let Some(entry) = folder.devices.iter().find(|d| d.id == peer) {
            index
                .update_index_info_from_cluster_config(
                    &folder.id,
                    peer,
                    entry.index_id,
                    entry.max_sequence,
                )
                .await?;
        }
        shared_folder_ids.insert(folder.id.clone());
    }

    info!(
        peer = %peer,
        shared = shared_folder_ids.len(),
        new = new_folders.len(),
        "cluster config processed"
    );

    Ok(ClusterConfigInfo {
        shared_folder_ids,
        new_folders,
        peer_hello,
    })
}
