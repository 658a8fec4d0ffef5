//! The node the dashboard reports on.
//!
//! Feeds talk to it through [`NodeBridge`]; every call is fallible and the
//! caller bounds it with a timeout. Milestone progress and solid blocks are
//! published through the bridge's [`NodeTracker`].

pub mod http;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    error::UpstreamError,
    events::Event,
    models::node::{
        DatabaseSizeMetric, GossipMetrics, NodeInfo, NodeInfoExtended, PeerInfo, SyncStatus,
    },
    visualizer::BlockKind,
};

/// Latest milestone index minus confirmed index tolerated as "almost synced".
const ALMOST_SYNCED_DISTANCE: u32 = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneInfo {
    pub index: u32,
    #[serde(default)]
    pub milestone_id: String,
    #[serde(default)]
    pub timestamp: u32,
    #[serde(default)]
    pub parents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: String,
    pub parents: Vec<String>,
    pub kind: BlockKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockMetadata {
    pub block_id: String,
    pub is_solid: bool,
    pub is_conflicting: bool,
    pub referenced_by_milestone: Option<u32>,
}

#[derive(Default)]
pub struct NodeEvents {
    pub latest_milestone_changed: Event<MilestoneInfo>,
    pub confirmed_milestone_changed: Event<MilestoneInfo>,
    pub block_solid: Event<BlockMetadata>,
}

#[derive(Default)]
struct Milestones {
    latest: Option<MilestoneInfo>,
    confirmed: Option<MilestoneInfo>,
}

/// Last known milestone state of the node.
#[derive(Default)]
pub struct NodeTracker {
    milestones: RwLock<Milestones>,
    events: NodeEvents,
}

impl NodeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &NodeEvents {
        &self.events
    }

    pub fn latest_milestone_index(&self) -> u32 {
        self.milestones
            .read()
            .latest
            .as_ref()
            .map_or(0, |ms| ms.index)
    }

    pub fn confirmed_milestone_index(&self) -> u32 {
        self.milestones
            .read()
            .confirmed
            .as_ref()
            .map_or(0, |ms| ms.index)
    }

    /// ID of the latest or confirmed milestone, if it has index `index`.
    pub fn known_milestone_id(&self, index: u32) -> Option<String> {
        let milestones = self.milestones.read();
        [&milestones.latest, &milestones.confirmed]
            .into_iter()
            .flatten()
            .find(|ms| ms.index == index && !ms.milestone_id.is_empty())
            .map(|ms| ms.milestone_id.clone())
    }

    pub fn sync_status(&self) -> SyncStatus {
        let milestones = self.milestones.read();
        SyncStatus {
            cmi: milestones.confirmed.as_ref().map_or(0, |ms| ms.index),
            lmi: milestones.latest.as_ref().map_or(0, |ms| ms.index),
        }
    }

    pub fn is_node_almost_synced(&self) -> bool {
        let SyncStatus { cmi, lmi } = self.sync_status();
        lmi != 0 && cmi.saturating_add(ALMOST_SYNCED_DISTANCE) >= lmi
    }

    /// Records a newer latest milestone. Stale or repeated indexes are ignored.
    pub fn update_latest(&self, milestone: MilestoneInfo) -> bool {
        {
            let mut milestones = self.milestones.write();
            if milestones
                .latest
                .as_ref()
                .is_some_and(|ms| ms.index >= milestone.index)
            {
                return false;
            }
            milestones.latest = Some(milestone.clone());
        }
        self.events.latest_milestone_changed.trigger(&milestone);
        true
    }

    pub fn update_confirmed(&self, milestone: MilestoneInfo) -> bool {
        {
            let mut milestones = self.milestones.write();
            if milestones
                .confirmed
                .as_ref()
                .is_some_and(|ms| ms.index >= milestone.index)
            {
                return false;
            }
            milestones.confirmed = Some(milestone.clone());
        }
        self.events.confirmed_milestone_changed.trigger(&milestone);
        true
    }

    pub fn block_solid(&self, metadata: &BlockMetadata) {
        self.events.block_solid.trigger(metadata);
    }
}

#[async_trait]
pub trait NodeBridge: Send + Sync + 'static {
    fn tracker(&self) -> &NodeTracker;

    async fn node_info(&self) -> Result<NodeInfo, UpstreamError>;

    async fn node_info_extended(&self) -> Result<NodeInfoExtended, UpstreamError>;

    async fn peers(&self) -> Result<Vec<PeerInfo>, UpstreamError>;

    async fn gossip_metrics(&self) -> Result<GossipMetrics, UpstreamError>;

    async fn database_size(&self) -> Result<DatabaseSizeMetric, UpstreamError>;

    async fn milestone(&self, index: u32) -> Result<MilestoneInfo, UpstreamError>;

    /// Metadata of the blocks referenced by milestone `index`.
    async fn milestone_cone_metadata(&self, index: u32)
    -> Result<Vec<BlockMetadata>, UpstreamError>;

    /// Streams newly observed blocks into `blocks` until `cancel` fires or the
    /// receiver is dropped.
    async fn listen_to_blocks(
        &self,
        cancel: CancellationToken,
        blocks: mpsc::Sender<Block>,
    ) -> Result<(), UpstreamError>;

    /// Keeps the tracker current until cancelled. Bridges that push state into
    /// the tracker themselves have nothing to do here.
    async fn run(&self, cancel: CancellationToken) {
        cancel.cancelled().await;
    }
}
