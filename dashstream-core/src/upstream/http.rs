//! [`NodeBridge`] over the node's REST API.
//!
//! Milestone changes are derived by polling `/info`. New blocks are derived by
//! polling the tip set while a listener is attached, and their metadata is
//! re-polled until they are solid and referenced, which also yields the
//! solid-block events and the cone of each confirmed milestone.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Block, BlockMetadata, MilestoneInfo, NodeBridge, NodeTracker};
use crate::{
    error::UpstreamError,
    models::node::{DatabaseSizeMetric, GossipMetrics, NodeInfo, NodeInfoExtended, PeerInfo},
    visualizer::BlockKind,
};

const CORE_API: &str = "/api/core/v2";
const METRICS_API: &str = "/api/dashboard-metrics/v1";

const PAYLOAD_TRANSACTION: u32 = 6;
const PAYLOAD_MILESTONE: u32 = 7;

const SEEN_CAPACITY: usize = 10_000;
const PENDING_CAPACITY: usize = 3_000;
const CONE_CAPACITY: usize = 3_000;
// Metadata requests per pending-refresh round.
const METADATA_BATCH: usize = 64;
// A block still unreferenced after this many metadata polls is given up on.
const MAX_METADATA_POLLS: u32 = 300;

#[derive(Deserialize)]
struct TipsResponse {
    tips: Vec<String>,
}

#[derive(Deserialize)]
struct PayloadResponse {
    #[serde(rename = "type")]
    kind: u32,
}

#[derive(Deserialize)]
struct BlockResponse {
    #[serde(default)]
    parents: Vec<String>,
    #[serde(default)]
    payload: Option<PayloadResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockMetadataResponse {
    block_id: String,
    #[serde(default)]
    is_solid: bool,
    #[serde(default)]
    referenced_by_milestone_index: Option<u32>,
    #[serde(default)]
    ledger_inclusion_state: Option<String>,
}

impl From<BlockMetadataResponse> for BlockMetadata {
    fn from(resp: BlockMetadataResponse) -> Self {
        Self {
            block_id: resp.block_id,
            is_solid: resp.is_solid,
            is_conflicting: resp.ledger_inclusion_state.as_deref() == Some("conflicting"),
            referenced_by_milestone: resp.referenced_by_milestone_index,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MilestoneResponse {
    index: u32,
    #[serde(default)]
    timestamp: u32,
    #[serde(default)]
    parents: Vec<String>,
    #[serde(default)]
    milestone_id: Option<String>,
    #[serde(default)]
    previous_milestone_id: Option<String>,
}

struct PendingBlock {
    solid_announced: bool,
    polls: u32,
}

#[derive(Default)]
struct BlockWatch {
    seen: HashSet<String>,
    seen_order: VecDeque<String>,
    pending: HashMap<String, PendingBlock>,
    pending_order: VecDeque<String>,
    cone: VecDeque<BlockMetadata>,
}

impl BlockWatch {
    /// Returns false if the block was already seen.
    fn observe(&mut self, id: &str) -> bool {
        if !self.seen.insert(id.to_string()) {
            return false;
        }
        self.seen_order.push_back(id.to_string());
        if self.seen_order.len() > SEEN_CAPACITY
            && let Some(oldest) = self.seen_order.pop_front()
        {
            self.seen.remove(&oldest);
        }
        true
    }

    fn track(&mut self, id: &str) {
        self.pending.insert(
            id.to_string(),
            PendingBlock {
                solid_announced: false,
                polls: 0,
            },
        );
        self.pending_order.push_back(id.to_string());
        while self.pending_order.len() > PENDING_CAPACITY {
            if let Some(oldest) = self.pending_order.pop_front() {
                self.pending.remove(&oldest);
            }
        }
    }

    /// Takes the next round of blocks to poll, round-robin over the pending
    /// set so that blocks which never get referenced cannot starve newer ones.
    fn next_batch(&mut self) -> Vec<String> {
        let mut batch = Vec::with_capacity(METADATA_BATCH);
        let mut remaining = self.pending_order.len();

        while batch.len() < METADATA_BATCH && remaining > 0 {
            remaining -= 1;
            let Some(id) = self.pending_order.pop_front() else {
                break;
            };
            let Some(pending) = self.pending.get_mut(&id) else {
                continue;
            };

            pending.polls += 1;
            if pending.polls > MAX_METADATA_POLLS {
                self.pending.remove(&id);
                continue;
            }
            self.pending_order.push_back(id.clone());
            batch.push(id);
        }
        batch
    }

    /// Applies fresh metadata. Returns true if the block just became solid.
    fn apply(&mut self, metadata: &BlockMetadata) -> bool {
        let Some(pending) = self.pending.get_mut(&metadata.block_id) else {
            return false;
        };

        let newly_solid = metadata.is_solid && !pending.solid_announced;
        if newly_solid {
            pending.solid_announced = true;
        }

        if metadata.referenced_by_milestone.is_some() {
            self.pending.remove(&metadata.block_id);
            self.pending_order.retain(|id| id != &metadata.block_id);
            self.cone.push_back(metadata.clone());
            if self.cone.len() > CONE_CAPACITY {
                self.cone.pop_front();
            }
        }
        newly_solid
    }

    fn cone_of(&self, index: u32) -> Vec<BlockMetadata> {
        self.cone
            .iter()
            .filter(|meta| meta.referenced_by_milestone == Some(index))
            .cloned()
            .collect()
    }
}

pub struct HttpNodeBridge {
    client: Client,
    base_url: String,
    poll_interval: Duration,
    request_timeout: Duration,
    tracker: NodeTracker,
    blocks: Mutex<BlockWatch>,
}

impl HttpNodeBridge {
    pub fn new(base_url: &str, poll_interval: Duration, request_timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval,
            request_timeout,
            tracker: NodeTracker::new(),
            blocks: Mutex::new(BlockWatch::default()),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, UpstreamError> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .timeout(self.request_timeout)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(UpstreamError::Status(resp.status().as_u16()));
        }

        resp.json::<T>()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }

    async fn milestone_payload(&self, index: u32) -> Result<MilestoneResponse, UpstreamError> {
        self.get_json(&format!("{CORE_API}/milestones/by-index/{index}"))
            .await
    }

    /// Pushes milestone changes reported by `/info` into the tracker.
    pub(crate) async fn poll_milestones(&self) -> Result<(), UpstreamError> {
        let info = self.node_info().await?;
        let status = &info.status;

        if status.latest_milestone.index > self.tracker.latest_milestone_index() {
            let milestone = self
                .resolve_or_fallback(status.latest_milestone.index, &info)
                .await;
            self.tracker.update_latest(milestone);
        }
        if status.confirmed_milestone.index > self.tracker.confirmed_milestone_index() {
            let milestone = self
                .resolve_or_fallback(status.confirmed_milestone.index, &info)
                .await;
            self.tracker.update_confirmed(milestone);
        }
        Ok(())
    }

    async fn resolve_or_fallback(&self, index: u32, info: &NodeInfo) -> MilestoneInfo {
        match self.milestone(index).await {
            Ok(milestone) => milestone,
            Err(e) => {
                debug!(index, error = %e, "milestone lookup failed, using node info");
                let reference = [&info.status.latest_milestone, &info.status.confirmed_milestone]
                    .into_iter()
                    .find(|ms| ms.index == index);
                MilestoneInfo {
                    index,
                    milestone_id: reference
                        .and_then(|ms| ms.milestone_id.clone())
                        .unwrap_or_default(),
                    timestamp: reference.map_or(0, |ms| ms.timestamp),
                    parents: Vec::new(),
                }
            }
        }
    }

    async fn poll_blocks(&self, sink: &mpsc::Sender<Block>) -> Result<bool, UpstreamError> {
        let tips: TipsResponse = self.get_json(&format!("{CORE_API}/tips")).await?;

        let fresh: Vec<String> = {
            let mut watch = self.blocks.lock();
            tips.tips
                .into_iter()
                .filter(|id| watch.observe(id))
                .collect()
        };

        for id in fresh {
            let block: BlockResponse = match self.get_json(&format!("{CORE_API}/blocks/{id}")).await
            {
                Ok(block) => block,
                Err(e) => {
                    debug!(block_id = %id, error = %e, "failed to fetch block");
                    continue;
                }
            };
            let kind = block.payload.as_ref().map(|p| p.kind);
            let block = Block {
                id: id.clone(),
                parents: block.parents,
                kind: BlockKind {
                    is_transaction: kind == Some(PAYLOAD_TRANSACTION),
                    is_milestone: kind == Some(PAYLOAD_MILESTONE),
                },
            };
            if sink.send(block).await.is_err() {
                return Ok(false);
            }
            self.blocks.lock().track(&id);
        }

        self.refresh_pending().await;
        Ok(true)
    }

    async fn refresh_pending(&self) {
        let batch = self.blocks.lock().next_batch();
        for id in batch {
            let metadata: BlockMetadata = match self
                .get_json::<BlockMetadataResponse>(&format!("{CORE_API}/blocks/{id}/metadata"))
                .await
            {
                Ok(resp) => resp.into(),
                Err(UpstreamError::Status(code)) if code == StatusCode::NOT_FOUND.as_u16() => {
                    continue;
                }
                Err(e) => {
                    debug!(block_id = %id, error = %e, "failed to fetch block metadata");
                    continue;
                }
            };

            let newly_solid = self.blocks.lock().apply(&metadata);
            if newly_solid {
                self.tracker.block_solid(&metadata);
            }
        }
    }
}

#[async_trait]
impl NodeBridge for HttpNodeBridge {
    fn tracker(&self) -> &NodeTracker {
        &self.tracker
    }

    async fn node_info(&self) -> Result<NodeInfo, UpstreamError> {
        self.get_json(&format!("{CORE_API}/info")).await
    }

    async fn node_info_extended(&self) -> Result<NodeInfoExtended, UpstreamError> {
        self.get_json(&format!("{METRICS_API}/info")).await
    }

    async fn peers(&self) -> Result<Vec<PeerInfo>, UpstreamError> {
        self.get_json(&format!("{CORE_API}/peers")).await
    }

    async fn gossip_metrics(&self) -> Result<GossipMetrics, UpstreamError> {
        self.get_json(&format!("{METRICS_API}/gossip")).await
    }

    async fn database_size(&self) -> Result<DatabaseSizeMetric, UpstreamError> {
        self.get_json(&format!("{METRICS_API}/database/sizes")).await
    }

    /// The milestone payload does not carry its own ID: it is taken from the
    /// next milestone's `previousMilestoneId`, or from the tracker for the
    /// latest one.
    async fn milestone(&self, index: u32) -> Result<MilestoneInfo, UpstreamError> {
        let payload = self.milestone_payload(index).await?;

        let milestone_id = match payload.milestone_id {
            Some(id) => id,
            None => match self.milestone_payload(index + 1).await {
                Ok(next) => next
                    .previous_milestone_id
                    .ok_or_else(|| UpstreamError::Decode("missing previousMilestoneId".into()))?,
                Err(UpstreamError::Status(404)) => self
                    .tracker
                    .known_milestone_id(index)
                    .ok_or_else(|| UpstreamError::Decode(format!("no ID for milestone {index}")))?,
                Err(e) => return Err(e),
            },
        };

        Ok(MilestoneInfo {
            index: payload.index,
            milestone_id,
            timestamp: payload.timestamp,
            parents: payload.parents,
        })
    }

    async fn milestone_cone_metadata(
        &self,
        index: u32,
    ) -> Result<Vec<BlockMetadata>, UpstreamError> {
        self.refresh_pending().await;
        Ok(self.blocks.lock().cone_of(index))
    }

    async fn listen_to_blocks(
        &self,
        cancel: CancellationToken,
        blocks: mpsc::Sender<Block>,
    ) -> Result<(), UpstreamError> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            match self.poll_blocks(&blocks).await {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(e) => warn!(error = %e, "failed to poll tips"),
            }
        }
    }

    async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.poll_milestones().await {
                warn!(error = %e, "failed to poll node info");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Server, ServerGuard};
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    const INFO: &str = r#"{
        "name": "HORNET",
        "version": "2.0.0",
        "status": {
            "isHealthy": true,
            "latestMilestone": {"index": 7, "timestamp": 100, "milestoneId": "0xlatest"},
            "confirmedMilestone": {"index": 5, "timestamp": 90, "milestoneId": "0xconfirmed"},
            "pruningIndex": 1
        },
        "metrics": {"blocksPerSecond": 2.0, "referencedBlocksPerSecond": 1.5, "referencedRate": 75.0}
    }"#;

    fn bridge(server: &ServerGuard) -> HttpNodeBridge {
        HttpNodeBridge::new(
            &server.url(),
            Duration::from_millis(20),
            Duration::from_secs(2),
        )
    }

    async fn json_mock(server: &mut ServerGuard, path: &str, body: &str) -> mockito::Mock {
        server
            .mock("GET", path)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    fn pending_watch(ids: impl IntoIterator<Item = String>) -> BlockWatch {
        let mut watch = BlockWatch::default();
        for id in ids {
            watch.observe(&id);
            watch.track(&id);
        }
        watch
    }

    #[test]
    fn test_unreferenced_blocks_do_not_starve_newer_ones() {
        let stale = (0..METADATA_BATCH).map(|i| format!("0xstale{i}"));
        let mut watch = pending_watch(stale);
        watch.track("0xfresh");

        let mut polled_fresh = false;
        for _ in 0..3 {
            let batch = watch.next_batch();
            assert!(batch.len() <= METADATA_BATCH);
            for id in &batch {
                let solid = BlockMetadata {
                    block_id: id.clone(),
                    is_solid: true,
                    ..BlockMetadata::default()
                };
                watch.apply(&solid);
            }
            polled_fresh |= batch.iter().any(|id| id == "0xfresh");
        }
        assert!(polled_fresh);
    }

    #[test]
    fn test_referenced_block_leaves_rotation() {
        let mut watch = pending_watch(["0xa".to_string(), "0xb".to_string()]);
        watch.apply(&BlockMetadata {
            block_id: "0xa".to_string(),
            is_solid: true,
            referenced_by_milestone: Some(9),
            ..BlockMetadata::default()
        });

        assert_eq!(watch.next_batch(), vec!["0xb".to_string()]);
        assert_eq!(watch.cone_of(9).len(), 1);
    }

    #[test]
    fn test_block_is_dropped_after_poll_budget() {
        let mut watch = pending_watch(["0xorphan".to_string()]);
        for _ in 0..MAX_METADATA_POLLS {
            assert_eq!(watch.next_batch().len(), 1);
        }
        assert!(watch.next_batch().is_empty());
        assert!(watch.pending.is_empty());
        assert!(watch.pending_order.is_empty());
    }

    #[tokio::test]
    async fn test_node_info() {
        let mut server = Server::new_async().await;
        let _m = json_mock(&mut server, "/api/core/v2/info", INFO).await;

        let info = bridge(&server).node_info().await.unwrap();
        assert_eq!(info.status.latest_milestone.index, 7);
        assert_eq!(info.metrics.referenced_rate, 75.0);
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/api/core/v2/peers")
            .with_status(503)
            .create_async()
            .await;

        let result = bridge(&server).peers().await;
        assert!(matches!(result, Err(UpstreamError::Status(503))));
    }

    #[tokio::test]
    async fn test_milestone_id_from_successor() {
        let mut server = Server::new_async().await;
        let _m4 = json_mock(
            &mut server,
            "/api/core/v2/milestones/by-index/4",
            r#"{"type": 7, "index": 4, "timestamp": 80, "parents": ["0xaaaaaaaaaaaa"]}"#,
        )
        .await;
        let _m5 = json_mock(
            &mut server,
            "/api/core/v2/milestones/by-index/5",
            r#"{"type": 7, "index": 5, "timestamp": 90, "previousMilestoneId": "0xfour", "parents": []}"#,
        )
        .await;

        let milestone = bridge(&server).milestone(4).await.unwrap();
        assert_eq!(milestone.milestone_id, "0xfour");
        assert_eq!(milestone.parents, vec!["0xaaaaaaaaaaaa"]);
    }

    #[tokio::test]
    async fn test_poll_milestones_falls_back_to_info() {
        let mut server = Server::new_async().await;
        let _info = json_mock(&mut server, "/api/core/v2/info", INFO).await;
        let _missing = server
            .mock(
                "GET",
                mockito::Matcher::Regex(r"^/api/core/v2/milestones/by-index/\d+$".into()),
            )
            .with_status(404)
            .create_async()
            .await;

        let bridge = bridge(&server);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let _hook = bridge
            .tracker()
            .events()
            .confirmed_milestone_changed
            .hook(move |ms| {
                assert_eq!(ms.milestone_id, "0xconfirmed");
                counter.fetch_add(1, Ordering::SeqCst);
            });

        bridge.poll_milestones().await.unwrap();
        bridge.poll_milestones().await.unwrap();

        assert_eq!(bridge.tracker().sync_status().lmi, 7);
        assert_eq!(bridge.tracker().sync_status().cmi, 5);
        assert_eq!(bridge.tracker().known_milestone_id(7).as_deref(), Some("0xlatest"));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_listen_streams_tips_and_solid_events() {
        let block_id = "0x1234567890abcdef";
        let mut server = Server::new_async().await;
        let _tips = json_mock(
            &mut server,
            "/api/core/v2/tips",
            &format!(r#"{{"tips": ["{block_id}"]}}"#),
        )
        .await;
        let _block = json_mock(
            &mut server,
            &format!("/api/core/v2/blocks/{block_id}"),
            r#"{"protocolVersion": 2, "parents": ["0xparent0000"], "payload": {"type": 6}}"#,
        )
        .await;
        let _meta = json_mock(
            &mut server,
            &format!("/api/core/v2/blocks/{block_id}/metadata"),
            &format!(
                r#"{{"blockId": "{block_id}", "isSolid": true, "referencedByMilestoneIndex": 8, "ledgerInclusionState": "conflicting"}}"#
            ),
        )
        .await;

        let bridge = Arc::new(bridge(&server));
        let solid = Arc::new(AtomicUsize::new(0));
        let counter = solid.clone();
        let _hook = bridge.tracker().events().block_solid.hook(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let listener = {
            let bridge = bridge.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { bridge.listen_to_blocks(cancel, tx).await })
        };

        let block = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(block.id, block_id);
        assert!(block.kind.is_transaction);
        assert_eq!(block.parents, vec!["0xparent0000"]);

        // Same tip on later polls is not streamed again.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        cancel.cancel();
        listener.await.unwrap().unwrap();

        assert_eq!(solid.load(Ordering::SeqCst), 1);
        let cone = bridge.milestone_cone_metadata(8).await.unwrap();
        assert_eq!(cone.len(), 1);
        assert!(cone[0].is_conflicting);
        assert!(bridge.milestone_cone_metadata(9).await.unwrap().is_empty());
    }
}
