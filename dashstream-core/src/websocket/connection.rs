use axum::{
    body::Bytes,
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
};
use futures_util::{FutureExt, SinkExt, StreamExt};
use serde::Serialize;
use std::{
    any::Any,
    collections::HashSet,
    net::SocketAddr,
    ops::RangeInclusive,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::Duration,
};
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, error, warn};

use crate::{
    config::{
        CONTROL_CHANNEL_CAPACITY, INIT_VALUE_TIMEOUT, MAX_CONTROL_FRAME_SIZE,
        MILESTONE_REPLAY_WINDOW, VISUALIZER_INIT_COUNT,
    },
    error::HubError,
    feeds::with_timeout,
    models::{message::Message, node::Milestone, topic::Topic},
    state::AppState,
    websocket::{hub::Connection, queue::DropPolicy},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Register,
    Unregister,
}

/// Inbound binary frame: command byte, topic byte, then an optional bearer
/// token for protected topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlFrame<'a> {
    pub command: ControlCommand,
    pub topic: Topic,
    pub token: &'a [u8],
}

impl<'a> ControlFrame<'a> {
    /// None for short frames, unknown commands and unknown topics.
    pub fn parse(frame: &'a [u8]) -> Option<Self> {
        let [command, topic, token @ ..] = frame else {
            return None;
        };
        let command = match *command {
            0 => ControlCommand::Register,
            1 => ControlCommand::Unregister,
            _ => return None,
        };

        Some(Self {
            command,
            topic: Topic::from_byte(*topic)?,
            token,
        })
    }
}

pub fn proceed_with_socket(
    ws: WebSocketUpgrade,
    addr: SocketAddr,
    headers: &HeaderMap,
    state: Arc<AppState>,
) -> Response {
    let user_agent = headers
        .get("user-agent")
        .and_then(|h| h.to_str().ok())
        .map(String::from);

    // No permessage-deflate is negotiated, origins are not checked.
    ws.max_message_size(MAX_CONTROL_FRAME_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state, addr, user_agent))
}

pub async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    addr: SocketAddr,
    user_agent: Option<String>,
) {
    let subscriptions = state.subscriptions.clone();
    let registered = state
        .hub
        .register(addr, user_agent, move |id, msg| {
            subscriptions.is_subscribed(id, msg.topic())
        })
        .await;
    let conn = match registered {
        Ok(conn) => conn,
        Err(e) => {
            debug!(addr = %addr, error = %e, "connection refused");
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let writer = conn.clone();
    let write_timeout = state.config.websocket_write_timeout;
    let heartbeat_interval = state.config.heartbeat_interval;
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat =
            tokio::time::interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);

        loop {
            let outgoing = tokio::select! {
                biased;
                _ = writer.cancel_token().cancelled() => break,
                msg = writer.queue().pop() => match msg {
                    Some(msg) => WsMessage::Text(msg.text().into()),
                    None => break,
                },
                _ = heartbeat.tick() => WsMessage::Ping(Bytes::new()),
            };

            match tokio::time::timeout(write_timeout, ws_sender.send(outgoing)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(conn_id = writer.id, error = %e, "websocket write failed");
                    break;
                }
                Err(_) => {
                    debug!(conn_id = writer.id, "websocket write timed out");
                    break;
                }
            }
        }

        let _ = ws_sender.close().await;
    });

    let (frame_tx, frame_rx) = mpsc::channel::<Bytes>(CONTROL_CHANNEL_CAPACITY);
    let conn_id = conn.id;
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(WsMessage::Binary(data)) => {
                    if frame_tx.try_send(data).is_err() {
                        debug!(conn_id, "control channel full, frame dropped");
                    }
                }
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!(conn_id, error = %e, "websocket read failed");
                    break;
                }
            }
        }
    });

    let mut control_task = tokio::spawn(process_control_frames(
        state.clone(),
        conn.clone(),
        frame_rx,
    ));

    tokio::select! {
        _ = &mut send_task => {},
        _ = &mut recv_task => {},
        _ = &mut control_task => {},
    }
    send_task.abort();
    recv_task.abort();
    control_task.abort();

    state.hub.unregister(conn.id).await;
}

async fn process_control_frames(
    state: Arc<AppState>,
    conn: Arc<Connection>,
    mut frames: mpsc::Receiver<Bytes>,
) {
    let mut initial_values_sent = HashSet::new();

    while let Some(frame) = frames.recv().await {
        let handled = AssertUnwindSafe(handle_control_frame(
            &state,
            &conn,
            &frame,
            &mut initial_values_sent,
        ))
        .catch_unwind()
        .await;

        if let Err(panic) = handled {
            error!(
                conn_id = conn.id,
                panic = panic_message(&*panic),
                "recovered from panic in control frame handler"
            );
            break;
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

async fn handle_control_frame(
    state: &AppState,
    conn: &Connection,
    frame: &[u8],
    initial_values_sent: &mut HashSet<Topic>,
) {
    let Some(control) = ControlFrame::parse(frame) else {
        debug!(conn_id = conn.id, len = frame.len(), "malformed control frame ignored");
        return;
    };
    let topic = control.topic;

    match control.command {
        ControlCommand::Register => {
            if topic.is_protected() && !is_authorized(state, control.token) {
                debug!(conn_id = conn.id, %topic, "unauthorized subscription ignored");
                return;
            }

            state.subscriptions.subscribe(conn.id, topic);

            // The vertex topic replays on every registration.
            if initial_values_sent.insert(topic) || topic == Topic::VisualizerVertex {
                send_initial_value(state, conn, topic).await;
            }
        }
        ControlCommand::Unregister => state.subscriptions.unsubscribe(conn.id, topic),
    }
}

fn is_authorized(state: &AppState, token: &[u8]) -> bool {
    match std::str::from_utf8(token) {
        Ok(token) if !token.is_empty() => state.auth.verify_admin_token(token),
        _ => false,
    }
}

async fn send<T: Serialize>(
    conn: &Connection,
    topic: Topic,
    data: &T,
    deadline: Duration,
    policy: DropPolicy,
) -> Result<(), HubError> {
    let msg = Message::new(topic, data)?;
    conn.send(msg, deadline, policy).await
}

/// Sends the current value of `topic` to a client that just registered it.
async fn send_initial_value(state: &AppState, conn: &Connection, topic: Topic) {
    let deadline = state.config.websocket_write_timeout;
    let node = &state.node;
    let policy = DropPolicy::DropOldest;

    let sent = match topic {
        Topic::SyncStatus => {
            send(conn, topic, &node.tracker().sync_status(), deadline, policy).await
        }
        Topic::PublicNodeStatus => match with_timeout(INIT_VALUE_TIMEOUT, node.node_info()).await {
            Ok(info) => {
                let status = info.public_status(node.tracker().is_node_almost_synced());
                send(conn, topic, &status, deadline, policy).await
            }
            Err(e) => {
                warn!(error = %e, "failed to get node info");
                return;
            }
        },
        Topic::NodeInfoExtended => {
            match with_timeout(INIT_VALUE_TIMEOUT, node.node_info_extended()).await {
                Ok(extended) => send(conn, topic, &extended, deadline, policy).await,
                Err(e) => {
                    warn!(error = %e, "failed to get extended node info");
                    return;
                }
            }
        }
        Topic::GossipMetrics => match with_timeout(INIT_VALUE_TIMEOUT, node.gossip_metrics()).await {
            Ok(metrics) => send(conn, topic, &metrics, deadline, policy).await,
            Err(e) => {
                warn!(error = %e, "failed to get gossip metrics");
                return;
            }
        },
        Topic::Milestone => replay_milestones(state, conn, deadline).await,
        Topic::PeerMetric => match with_timeout(INIT_VALUE_TIMEOUT, node.peers()).await {
            Ok(peers) => send(conn, topic, &peers, deadline, policy).await,
            Err(e) => {
                warn!(error = %e, "failed to get peer infos");
                return;
            }
        },
        Topic::ConfirmedMsMetrics => match with_timeout(INIT_VALUE_TIMEOUT, node.node_info()).await {
            Ok(info) => send(conn, topic, &info.metrics, deadline, policy).await,
            Err(e) => {
                warn!(error = %e, "failed to get node info");
                return;
            }
        },
        Topic::VisualizerVertex => replay_vertices(state, conn, deadline).await,
        Topic::DatabaseSizeMetric => {
            send(conn, topic, &state.db_sizes.snapshot(), deadline, policy).await
        }
        _ => Ok(()),
    };

    if let Err(e) = sent {
        debug!(conn_id = conn.id, %topic, error = %e, "failed to send initial value");
    }
}

/// Milestone indexes replayed to a new subscriber. Index 0 does not exist.
pub(crate) fn milestone_replay_range(latest: u32) -> RangeInclusive<u32> {
    latest.saturating_sub(MILESTONE_REPLAY_WINDOW).max(1)..=latest
}

/// Stops at the first milestone that cannot be resolved.
async fn replay_milestones(
    state: &AppState,
    conn: &Connection,
    deadline: Duration,
) -> Result<(), HubError> {
    let latest = state.node.tracker().latest_milestone_index();

    for index in milestone_replay_range(latest) {
        let milestone = match with_timeout(INIT_VALUE_TIMEOUT, state.node.milestone(index)).await {
            Ok(info) => Milestone {
                milestone_id: info.milestone_id,
                index,
            },
            Err(e) => {
                warn!(index, error = %e, "failed to get milestone");
                break;
            }
        };
        send(conn, Topic::Milestone, &milestone, deadline, DropPolicy::DropOldest).await?;
    }

    Ok(())
}

/// Replays the cached vertices without dropping any. The whole replay shares
/// one write deadline.
async fn replay_vertices(
    state: &AppState,
    conn: &Connection,
    deadline: Duration,
) -> Result<(), HubError> {
    let vertices = state.visualizer.created_snapshot(VISUALIZER_INIT_COUNT);
    let replay = async {
        for vertex in &vertices {
            send(
                conn,
                Topic::VisualizerVertex,
                vertex,
                deadline,
                DropPolicy::BlockUntilSpace,
            )
            .await?;
        }
        Ok::<(), HubError>(())
    };

    tokio::time::timeout(deadline, replay)
        .await
        .unwrap_or(Err(HubError::Timeout))
}
