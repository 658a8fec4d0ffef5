#![allow(dead_code)]

use async_trait::async_trait;
use dashstream_core::{
    Config, Server,
    auth::password::hash_password,
    config::{AuthConfig, RateLimitConfig},
    error::UpstreamError,
    models::node::{
        DatabaseSizeMetric, GossipMetrics, NodeInfo, NodeInfoExtended, PeerInfo,
    },
    upstream::{Block, BlockMetadata, MilestoneInfo, NodeBridge, NodeTracker},
    visualizer::BlockKind,
};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const ADMIN_PASSWORD: &str = "correct horse";

/// Upstream double with canned answers. Milestone state is driven through
/// its tracker, blocks through [`FakeNode::emit`].
#[derive(Default)]
pub struct FakeNode {
    tracker: NodeTracker,
    block_feed: Mutex<Option<mpsc::Sender<Block>>>,
    failing_milestones: Mutex<HashSet<u32>>,
    cones: Mutex<HashMap<u32, Vec<BlockMetadata>>>,
    panic_on_gossip: AtomicBool,
}

impl FakeNode {
    pub fn fail_milestone(&self, index: u32) {
        self.failing_milestones.lock().insert(index);
    }

    pub fn set_cone(&self, index: u32, cone: Vec<BlockMetadata>) {
        self.cones.lock().insert(index, cone);
    }

    pub fn panic_on_gossip(&self) {
        self.panic_on_gossip.store(true, Ordering::SeqCst);
    }

    pub fn is_listening(&self) -> bool {
        self.block_feed.lock().is_some()
    }

    /// Hands `block` to the attached block listener, waiting for one to attach.
    pub async fn emit(&self, block: Block) {
        let feed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(feed) = self.block_feed.lock().clone() {
                    return feed;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("no block listener attached");
        feed.send(block).await.unwrap();
    }

    pub fn milestone_id(index: u32) -> String {
        format!("0x{index:064x}")
    }

    pub fn milestone_info(index: u32) -> MilestoneInfo {
        MilestoneInfo {
            index,
            milestone_id: Self::milestone_id(index),
            ..MilestoneInfo::default()
        }
    }
}

#[async_trait]
impl NodeBridge for FakeNode {
    fn tracker(&self) -> &NodeTracker {
        &self.tracker
    }

    async fn node_info(&self) -> Result<NodeInfo, UpstreamError> {
        Ok(NodeInfo::default())
    }

    async fn node_info_extended(&self) -> Result<NodeInfoExtended, UpstreamError> {
        Ok(NodeInfoExtended {
            version: "2.0.0".to_string(),
            node_alias: "fake-node".to_string(),
            ..NodeInfoExtended::default()
        })
    }

    async fn peers(&self) -> Result<Vec<PeerInfo>, UpstreamError> {
        Ok(Vec::new())
    }

    async fn gossip_metrics(&self) -> Result<GossipMetrics, UpstreamError> {
        if self.panic_on_gossip.load(Ordering::SeqCst) {
            panic!("gossip metrics exploded");
        }
        Ok(GossipMetrics::default())
    }

    async fn database_size(&self) -> Result<DatabaseSizeMetric, UpstreamError> {
        Ok(DatabaseSizeMetric {
            tangle: 10,
            utxo: 5,
            total: 15,
            time: 1,
        })
    }

    async fn milestone(&self, index: u32) -> Result<MilestoneInfo, UpstreamError> {
        if self.failing_milestones.lock().contains(&index) {
            return Err(UpstreamError::Status(404));
        }
        Ok(Self::milestone_info(index))
    }

    async fn milestone_cone_metadata(
        &self,
        index: u32,
    ) -> Result<Vec<BlockMetadata>, UpstreamError> {
        Ok(self.cones.lock().get(&index).cloned().unwrap_or_default())
    }

    async fn listen_to_blocks(
        &self,
        cancel: CancellationToken,
        blocks: mpsc::Sender<Block>,
    ) -> Result<(), UpstreamError> {
        *self.block_feed.lock() = Some(blocks);
        cancel.cancelled().await;
        self.block_feed.lock().take();
        Ok(())
    }
}

pub fn test_config(dir: &TempDir) -> Config {
    Config {
        bind_address: "127.0.0.1:0".to_string(),
        websocket_write_timeout: Duration::from_secs(5),
        // Periodic feeds stay quiet after their first tick.
        feed_interval: Duration::from_secs(3600),
        db_size_interval: Duration::from_secs(3600),
        auth: AuthConfig {
            password_hash: Some(hash_password(ADMIN_PASSWORD).unwrap()),
            identity_file: dir.path().join("identity.key"),
            rate_limit: RateLimitConfig {
                max_burst: 3,
                ..RateLimitConfig::default()
            },
            ..AuthConfig::default()
        },
        ..Config::default()
    }
}

pub fn test_server(dir: &TempDir) -> (Server, Arc<FakeNode>) {
    test_server_with(test_config(dir))
}

pub fn test_server_with(config: Config) -> (Server, Arc<FakeNode>) {
    let node = Arc::new(FakeNode::default());
    let server = Server::with_node(config, node.clone()).unwrap();
    (server, node)
}

/// Block `id` approving `parents`, with a plain payload.
pub fn block(id: &str, parents: &[&str]) -> Block {
    Block {
        id: id.to_string(),
        parents: parents.iter().map(|p| p.to_string()).collect(),
        kind: BlockKind::default(),
    }
}
