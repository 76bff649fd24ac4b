//! One Connection per client socket: read/write task pair, lifecycle state
//! machine, keepalive, and bad-frame abuse tracking.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use protocol::types::{Creature, ParticipantId, RoomId, Transform, WorldVolume};
use protocol::{codec, Frame};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::config::RoomConfig;
use crate::error::{CapacityError, ProtocolError, TimeoutError};
use crate::hub::Hub;
use crate::room::{outbound_channel, OutboundRx, RoomRequest};

const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(5);
const KEEPALIVE_WINDOW: Duration = Duration::from_secs(30);
const WRITE_DEADLINE: Duration = Duration::from_secs(5);
const MAX_DISPLAY_NAME_OCTETS: usize = 32;

/// Drives one accepted websocket end to end: handshake, the joined
/// read/write task pair, and disconnect cleanup.
pub async fn run(socket: WebSocket, hub: Arc<Hub>, room_hint: Option<RoomId>, room_config: RoomConfig) {
    let (sender, mut receiver) = socket.split();
    let sender = Arc::new(Mutex::new(sender));

    let Some((display_name, creature)) =
        await_join_game(&mut receiver, sender.clone()).await
    else {
        return;
    };

    let participant_id = hub.next_participant_id();
    let (room_id, room_tx) = hub.assign(room_hint).await;

    let (outbound, mut outbound_rx) = outbound_channel();
    let (reply_tx, reply_rx) = oneshot::channel();
    if room_tx
        .send(RoomRequest::Join {
            participant_id,
            display_name,
            creature,
            outbound: outbound.clone(),
            reply: reply_tx,
        })
        .await
        .is_err()
    {
        send_close_reason(&sender, "room is no longer available").await;
        return;
    }

    match reply_rx.await {
        Ok(Ok(())) => {}
        Ok(Err(CapacityError::RoomFull(room))) => {
            tracing::info!(room, "rejecting join: room full");
            send_close_reason(&sender, "room is full").await;
            return;
        }
        Ok(Err(err)) => {
            tracing::warn!(%err, "join rejected");
            send_close_reason(&sender, "join rejected").await;
            return;
        }
        Err(_) => {
            send_close_reason(&sender, "room closed during handshake").await;
            return;
        }
    }

    tracing::info!(participant = participant_id.0, room = %room_id.0, "participant joined");

    let write_sender = sender.clone();
    let mut write_task = tokio::spawn(async move {
        write_loop(write_sender, &mut outbound_rx).await;
    });

    let read_room_tx = room_tx.clone();
    let mut read_task = tokio::spawn(async move {
        read_loop(receiver, read_room_tx, participant_id, hub.clone(), room_config).await;
        hub
    });

    tokio::select! {
        _ = &mut write_task => { read_task.abort(); }
        res = &mut read_task => {
            write_task.abort();
            if let Ok(hub) = res {
                hub.forget_connection(participant_id).await;
            }
        }
    }

    let _ = room_tx.send(RoomRequest::Disconnect { participant_id }).await;
    let mut guard = sender.lock().await;
    let _ = guard.send(Message::Close(None)).await;
}

async fn await_join_game(
    receiver: &mut SplitStream<WebSocket>,
    sender: Arc<Mutex<SplitSink<WebSocket, Message>>>,
) -> Option<(String, Creature)> {
    let deadline = tokio::time::sleep(HANDSHAKE_DEADLINE);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                tracing::warn!(error = %TimeoutError::Handshake, "handshake deadline elapsed before JOIN_GAME");
                send_close_reason(&sender, "handshake timed out").await;
                return None;
            }
            frame = receiver.next() => {
                let Some(frame) = frame else {
                    return None;
                };
                let bytes = match frame {
                    Ok(Message::Binary(bytes)) => bytes,
                    Ok(_) => continue,
                    Err(err) => {
                        tracing::warn!(?err, "socket error during handshake");
                        return None;
                    }
                };
                match codec::decode(&bytes) {
                    Ok(Frame::JoinGame { display_name, creature }) => {
                        if display_name.len() > MAX_DISPLAY_NAME_OCTETS {
                            tracing::debug!(error = %ProtocolError::DisplayNameTooLong, "rejecting JOIN_GAME");
                            send_close_reason(&sender, "display name too long").await;
                            return None;
                        }
                        return Some((display_name, creature));
                    }
                    Ok(_) => {
                        // Anything other than JOIN_GAME before the handshake
                        // completes is a protocol error; a single bad frame
                        // here doesn't warrant closing, the client just
                        // hasn't joined yet.
                        let tag = bytes.first().copied().unwrap_or(0);
                        tracing::debug!(error = %ProtocolError::NotJoinedYet { tag }, "ignoring frame before JOIN_GAME");
                        continue;
                    }
                    Err(err) => {
                        tracing::debug!(?err, "decode error awaiting JOIN_GAME");
                        continue;
                    }
                }
            }
        }
    }
}

async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    room_tx: mpsc::Sender<RoomRequest>,
    participant_id: ParticipantId,
    hub: Arc<Hub>,
    room_config: RoomConfig,
) {
    let mut bad_frames = 0u32;
    let mut window_start = Instant::now();

    loop {
        let next = tokio::time::timeout(KEEPALIVE_WINDOW, receiver.next()).await;
        let frame = match next {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::info!(participant = participant_id.0, "socket closed by peer");
                return;
            }
            Err(_) => {
                tracing::info!(
                    participant = participant_id.0,
                    error = %TimeoutError::Keepalive,
                    "closing idle connection"
                );
                return;
            }
        };

        let bytes = match frame {
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Close(_)) => return,
            Ok(_) => continue,
            Err(err) => {
                tracing::warn!(participant = participant_id.0, ?err, "socket read error");
                return;
            }
        };

        hub.record_message(participant_id).await;

        let decoded = codec::decode(&bytes);
        let request = match decoded {
            Ok(frame) => frame_to_request(participant_id, frame),
            Err(err) => {
                tracing::debug!(participant = participant_id.0, ?err, "decode error");
                None
            }
        };

        let Some(request) = request else {
            if tick_bad_frame(&mut bad_frames, &mut window_start, &room_config) {
                tracing::warn!(
                    participant = participant_id.0,
                    "closing connection: sustained bad-frame abuse"
                );
                return;
            }
            continue;
        };

        if room_tx.send(request).await.is_err() {
            tracing::info!(participant = participant_id.0, "room channel closed");
            return;
        }
    }
}

fn tick_bad_frame(count: &mut u32, window_start: &mut Instant, config: &RoomConfig) -> bool {
    if window_start.elapsed() > config.bad_frame_window {
        *count = 0;
        *window_start = Instant::now();
    }
    *count += 1;
    *count >= config.bad_frame_threshold
}

/// Translates an already-decoded client frame into a request for the Room,
/// dropping frames that are server-only or otherwise out of place (treated
/// as a protocol error by the caller's bad-frame counter).
fn frame_to_request(participant_id: ParticipantId, frame: Frame) -> Option<RoomRequest> {
    match frame {
        Frame::Position { transform, volume } => Some(clamp_position(participant_id, transform, volume)),
        Frame::EatNpc { npc_id } => Some(RoomRequest::EatNpc {
            participant_id,
            npc_id,
        }),
        Frame::AbilityStart {
            participant_id: _,
            ability,
            params,
        } => Some(RoomRequest::AbilityStart {
            participant_id,
            ability,
            params,
        }),
        Frame::AbilityStop {
            participant_id: _,
            ability,
            params,
        } => Some(RoomRequest::AbilityStop {
            participant_id,
            ability,
            params,
        }),
        Frame::CreatureUpdate { creature, .. } => Some(RoomRequest::CreatureUpdate {
            participant_id,
            creature,
        }),
        Frame::PrismPlace {
            prism_id, geometry, ..
        } => Some(RoomRequest::PrismPlace {
            participant_id,
            prism_id,
            geometry,
        }),
        Frame::PrismRemove { prism_id, .. } => Some(RoomRequest::PrismRemove {
            participant_id,
            prism_id,
        }),
        Frame::Chat {
            text,
            is_emoji,
            show_proximity,
            ..
        } => Some(RoomRequest::Chat {
            participant_id,
            text,
            is_emoji,
            show_proximity,
        }),
        Frame::RequestMapChange => Some(RoomRequest::RequestMapChange { participant_id }),
        Frame::NpcSnapshot { tick, fish } => Some(RoomRequest::NpcSnapshot {
            participant_id,
            tick,
            fish,
        }),
        Frame::NpcSpawn { payload } => Some(RoomRequest::NpcSpawn {
            participant_id,
            payload,
        }),
        Frame::Ping { client_time_ms } => Some(RoomRequest::Ping {
            participant_id,
            client_time_ms,
        }),
        Frame::Passthrough { tag, .. } => {
            tracing::debug!(tag, "ignoring extension-range frame");
            None
        }
        // JOIN_GAME, and every server-originated variant, are not legal
        // client-to-server requests once joined.
        _ => None,
    }
}

fn clamp_position(
    participant_id: ParticipantId,
    transform: Transform,
    volume: Option<WorldVolume>,
) -> RoomRequest {
    RoomRequest::SubmitTransform {
        participant_id,
        transform,
        volume: volume.map(|v| WorldVolume::clamped(v.0)),
    }
}

async fn write_loop(
    sender: Arc<Mutex<SplitSink<WebSocket, Message>>>,
    outbound: &mut OutboundRx,
) {
    loop {
        let frame = tokio::select! {
            biased;
            lifecycle = outbound.lifecycle.recv() => {
                match lifecycle {
                    Some(frame) => frame,
                    None => return,
                }
            }
            Ok(()) = outbound.batch.changed() => {
                match outbound.batch.borrow_and_update().clone() {
                    Some(frame) => frame,
                    None => continue,
                }
            }
        };

        let bytes = codec::encode(&frame);
        let send_result = tokio::time::timeout(WRITE_DEADLINE, async {
            let mut guard = sender.lock().await;
            guard.send(Message::Binary(bytes.into())).await
        })
        .await;

        match send_result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(?err, "write error, closing connection");
                return;
            }
            Err(_) => {
                tracing::warn!(error = %TimeoutError::Write, "write deadline exceeded");
                return;
            }
        }

        if matches!(frame, Frame::CloseReason { .. }) {
            return;
        }
    }
}

async fn send_close_reason(sender: &Arc<Mutex<SplitSink<WebSocket, Message>>>, reason: &str) {
    let frame = Frame::CloseReason {
        reason: reason.to_string(),
    };
    let bytes = codec::encode(&frame);
    let mut guard = sender.lock().await;
    let _ = guard.send(Message::Binary(bytes.into())).await;
    let _ = guard.send(Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RoomConfig {
        RoomConfig {
            capacity: 32,
            tick_rate_hz: 20,
            bad_frame_threshold: 16,
            bad_frame_window: Duration::from_secs(10),
        }
    }

    /// S6: a single malformed frame increments the counter but stays well
    /// below the sustained-abuse threshold.
    #[test]
    fn single_bad_frame_does_not_cross_threshold() {
        let config = test_config();
        let mut count = 0;
        let mut window_start = Instant::now();
        assert!(!tick_bad_frame(&mut count, &mut window_start, &config));
        assert_eq!(count, 1);
    }

    #[test]
    fn sustained_bad_frames_within_window_cross_threshold() {
        let config = test_config();
        let mut count = 0;
        let mut window_start = Instant::now();
        let mut tripped = false;
        for _ in 0..config.bad_frame_threshold {
            tripped = tick_bad_frame(&mut count, &mut window_start, &config);
        }
        assert!(tripped);
    }

    #[test]
    fn window_reset_after_elapsed_forgives_earlier_bad_frames() {
        let mut config = test_config();
        config.bad_frame_window = Duration::from_millis(0);
        let mut count = 0;
        let mut window_start = Instant::now() - Duration::from_millis(1);
        for _ in 0..config.bad_frame_threshold - 1 {
            tick_bad_frame(&mut count, &mut window_start, &config);
            window_start = Instant::now() - Duration::from_millis(1);
        }
        // Every call saw an already-elapsed window, so the counter never
        // accumulates past 1 and the threshold is never crossed.
        assert!(count < config.bad_frame_threshold);
    }
}
