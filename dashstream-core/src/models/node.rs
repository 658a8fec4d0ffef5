use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub cmi: u32,
    pub lmi: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicNodeStatus {
    pub pruning_index: u32,
    pub is_healthy: bool,
    pub is_synced: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneRef {
    pub index: u32,
    #[serde(default)]
    pub timestamp: u32,
    #[serde(default)]
    pub milestone_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub is_healthy: bool,
    pub latest_milestone: MilestoneRef,
    pub confirmed_milestone: MilestoneRef,
    #[serde(default)]
    pub pruning_index: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetrics {
    #[serde(default)]
    pub blocks_per_second: f64,
    #[serde(default)]
    pub referenced_blocks_per_second: f64,
    #[serde(default)]
    pub referenced_rate: f64,
}

/// Subset of the node's `/info` response the dashboard consumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub status: NodeStatus,
    #[serde(default)]
    pub metrics: NodeMetrics,
}

impl NodeInfo {
    pub fn public_status(&self, is_almost_synced: bool) -> PublicNodeStatus {
        PublicNodeStatus {
            pruning_index: self.status.pruning_index,
            is_healthy: self.status.is_healthy,
            is_synced: is_almost_synced,
        }
    }

    pub fn sync_status(&self) -> SyncStatus {
        SyncStatus {
            cmi: self.status.confirmed_milestone.index,
            lmi: self.status.latest_milestone.index,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfoExtended {
    pub version: String,
    pub latest_version: String,
    pub uptime: i64,
    pub node_id: String,
    pub node_alias: String,
    #[serde(rename = "memUsage")]
    pub memory_usage: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub id: String,
    #[serde(default)]
    pub multi_addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub relation: String,
    #[serde(default)]
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gossip: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipMetrics {
    pub incoming: u32,
    pub new: u32,
    pub outgoing: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub milestone_id: String,
    pub index: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSizeMetric {
    pub tangle: i64,
    pub utxo: i64,
    pub total: i64,
    #[serde(rename = "ts")]
    pub time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisualizerMetaInfo {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizerTipInfo {
    pub id: String,
    pub is_tip: bool,
}

/// Confirmation of a checkpoint, with the short IDs of its parents and of the
/// conflicting blocks excluded from its past cone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizerConfirmationInfo {
    pub ids: Vec<String>,
    pub excluded_ids: Vec<String>,
}
