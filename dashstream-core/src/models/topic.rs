use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Telemetry stream identifiers. The discriminant is the byte used on the wire,
/// both in control frames and in the `type` field of outbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Topic {
    SyncStatus = 0,
    PublicNodeStatus = 1,
    NodeInfoExtended = 2,
    GossipMetrics = 3,
    Milestone = 4,
    PeerMetric = 5,
    ConfirmedMsMetrics = 6,
    VisualizerVertex = 7,
    VisualizerSolidInfo = 8,
    VisualizerConfirmedInfo = 9,
    VisualizerMilestoneInfo = 10,
    VisualizerTipInfo = 11,
    DatabaseSizeMetric = 12,
}

pub const ALL_TOPICS: [Topic; 13] = [
    Topic::SyncStatus,
    Topic::PublicNodeStatus,
    Topic::NodeInfoExtended,
    Topic::GossipMetrics,
    Topic::Milestone,
    Topic::PeerMetric,
    Topic::ConfirmedMsMetrics,
    Topic::VisualizerVertex,
    Topic::VisualizerSolidInfo,
    Topic::VisualizerConfirmedInfo,
    Topic::VisualizerMilestoneInfo,
    Topic::VisualizerTipInfo,
    Topic::DatabaseSizeMetric,
];

pub const VISUALIZER_TOPICS: [Topic; 5] = [
    Topic::VisualizerVertex,
    Topic::VisualizerSolidInfo,
    Topic::VisualizerConfirmedInfo,
    Topic::VisualizerMilestoneInfo,
    Topic::VisualizerTipInfo,
];

// Everything not listed here needs a verified token to subscribe.
const PUBLIC_TOPICS: [Topic; 10] = [
    Topic::SyncStatus,
    Topic::PublicNodeStatus,
    Topic::GossipMetrics,
    Topic::Milestone,
    Topic::ConfirmedMsMetrics,
    Topic::VisualizerVertex,
    Topic::VisualizerSolidInfo,
    Topic::VisualizerConfirmedInfo,
    Topic::VisualizerMilestoneInfo,
    Topic::VisualizerTipInfo,
];

impl Topic {
    pub fn from_byte(byte: u8) -> Option<Self> {
        ALL_TOPICS.get(byte as usize).copied()
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn is_protected(self) -> bool {
        !PUBLIC_TOPICS.contains(&self)
    }

    pub fn is_visualizer(self) -> bool {
        VISUALIZER_TOPICS.contains(&self)
    }

    pub fn name(self) -> &'static str {
        match self {
            Topic::SyncStatus => "sync_status",
            Topic::PublicNodeStatus => "public_node_status",
            Topic::NodeInfoExtended => "node_info_extended",
            Topic::GossipMetrics => "gossip_metrics",
            Topic::Milestone => "milestone",
            Topic::PeerMetric => "peer_metric",
            Topic::ConfirmedMsMetrics => "confirmed_ms_metrics",
            Topic::VisualizerVertex => "visualizer_vertex",
            Topic::VisualizerSolidInfo => "visualizer_solid_info",
            Topic::VisualizerConfirmedInfo => "visualizer_confirmed_info",
            Topic::VisualizerMilestoneInfo => "visualizer_milestone_info",
            Topic::VisualizerTipInfo => "visualizer_tip_info",
            Topic::DatabaseSizeMetric => "database_size_metric",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_byte())
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let byte = u8::deserialize(deserializer)?;
        Topic::from_byte(byte)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown topic {}", byte)))
    }
}
