//! The shipped transport: websocket signaling plus a WebRTC peer link.
//!
//! Implements `SessionTransport` for the classroom core. Per-participant
//! signaling failures (a bad offer, an unroutable candidate) are logged and
//! skipped; only a closed signaling socket or a dead peer connection surfaces
//! as `ConnectionLost`.

use crate::config::Config;
use crate::error::{ClassroomError, JoinFailure, Result};
use crate::rtc::{AudioMixer, GatedRemoteTrack, PeerLink, PlaybackGate};
use crate::signaling::{SignalMessage, SignalingClient};
use crate::transport::{
    MediaKind, ParticipantEvent, PublishedTrack, RemoteTrack, SessionTransport, TransportEvent,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct ClassroomTransport {
    config: Config,
    peer_id: String,
    active: Mutex<Option<Active>>,
}

struct Active {
    room: String,
    outgoing: mpsc::Sender<SignalMessage>,
    link: Arc<PeerLink>,
    /// Keeps the playback thread alive for the session's duration.
    _mixer: AudioMixer,
    pump: JoinHandle<()>,
}

impl ClassroomTransport {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            peer_id: format!("user-{}", rand::random::<u32>()),
            active: Mutex::new(None),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }
}

#[async_trait]
impl SessionTransport for ClassroomTransport {
    async fn connect(&self, room: &str) -> Result<mpsc::Receiver<TransportEvent>> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(JoinFailure::AlreadyJoined.into());
        }

        let mut signaling = SignalingClient::connect(&self.config.signaling_url).await?;
        signaling
            .send(SignalMessage::Join {
                app_id: self.config.app_id.clone(),
                room_id: room.to_string(),
                peer_id: self.peer_id.clone(),
                token: self.config.token.clone(),
            })
            .await?;

        match signaling.recv().await {
            Some(SignalMessage::Joined { .. }) => {}
            Some(SignalMessage::JoinRejected { reason }) => return Err(reason.into()),
            Some(other) => {
                return Err(JoinFailure::Network(format!(
                    "unexpected join reply: {other:?}"
                ))
                .into())
            }
            None => {
                return Err(
                    JoinFailure::Network("signaling closed during join".to_string()).into(),
                )
            }
        }

        let gate = PlaybackGate::default();
        let mixer = AudioMixer::spawn(gate.clone());
        let (events_tx, events_rx) = mpsc::channel(100);
        let outgoing = signaling.sender();

        let link = Arc::new(
            PeerLink::new(
                self.peer_id.clone(),
                outgoing.clone(),
                events_tx.clone(),
                mixer.sender(),
            )
            .await
            .map_err(|e| JoinFailure::Network(e.to_string()))?,
        );

        let pump = tokio::spawn(pump_signaling(
            signaling,
            link.clone(),
            gate,
            events_tx,
            outgoing.clone(),
            self.peer_id.clone(),
        ));

        *active = Some(Active {
            room: room.to_string(),
            outgoing,
            link,
            _mixer: mixer,
            pump,
        });
        Ok(events_rx)
    }

    async fn publish(&self, tracks: Vec<PublishedTrack>) -> Result<()> {
        let active = self.active.lock().await;
        let Some(active) = active.as_ref() else {
            return Err(ClassroomError::NotConnected);
        };

        let kinds: Vec<MediaKind> = tracks.iter().map(|t| t.kind).collect();
        active
            .link
            .add_local_tracks(tracks)
            .await
            .map_err(|e| JoinFailure::Network(e.to_string()))?;
        let offer = active
            .link
            .create_offer()
            .await
            .map_err(|e| JoinFailure::Network(e.to_string()))?;
        active
            .outgoing
            .send(SignalMessage::Offer {
                peer_id: self.peer_id.clone(),
                sdp: offer,
            })
            .await
            .map_err(|e| ClassroomError::JoinFailed(JoinFailure::Network(e.to_string())))?;

        for kind in kinds {
            active
                .outgoing
                .send(SignalMessage::Publish {
                    peer_id: self.peer_id.clone(),
                    kind,
                })
                .await
                .map_err(|e| ClassroomError::JoinFailed(JoinFailure::Network(e.to_string())))?;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let Some(active) = self.active.lock().await.take() else {
            return Ok(());
        };

        // Best effort: a failed goodbye never blocks local teardown.
        let _ = active
            .outgoing
            .send(SignalMessage::Leave {
                room_id: active.room,
                peer_id: self.peer_id.clone(),
            })
            .await;
        if let Err(e) = active.link.close().await {
            warn!(error = %e, "peer connection close failed");
        }
        active.pump.abort();
        info!("transport disconnected");
        Ok(())
    }
}

/// Per-participant negotiation failure, isolated from the session.
fn transient(peer_id: &str, e: anyhow::Error) -> ClassroomError {
    ClassroomError::TransientMediaFailure {
        participant: peer_id.to_string(),
        reason: e.to_string(),
    }
}

/// Translate signaling traffic into participant events and SDP/ICE handling.
async fn pump_signaling(
    mut signaling: SignalingClient,
    link: Arc<PeerLink>,
    gate: PlaybackGate,
    events: mpsc::Sender<TransportEvent>,
    outgoing: mpsc::Sender<SignalMessage>,
    local_peer: String,
) {
    loop {
        let Some(msg) = signaling.recv().await else {
            let _ = events
                .send(TransportEvent::ConnectionLost {
                    reason: "signaling connection closed".to_string(),
                })
                .await;
            break;
        };

        match msg {
            SignalMessage::PeerPublished { peer_id, kind } if peer_id != local_peer => {
                // Fresh handles play until moderated.
                gate.set_playing(&peer_id, kind, true);
                let track: RemoteTrack =
                    Arc::new(GatedRemoteTrack::new(peer_id.clone(), kind, gate.clone()));
                let event = TransportEvent::Participant(ParticipantEvent::MediaPublished {
                    id: peer_id,
                    kind,
                    track,
                });
                if events.send(event).await.is_err() {
                    break;
                }
            }
            SignalMessage::PeerUnpublished { peer_id, kind } if peer_id != local_peer => {
                gate.set_playing(&peer_id, kind, true);
                let event = TransportEvent::Participant(ParticipantEvent::MediaUnpublished {
                    id: peer_id,
                    kind,
                });
                if events.send(event).await.is_err() {
                    break;
                }
            }
            SignalMessage::PeerLeft { peer_id } if peer_id != local_peer => {
                gate.set_playing(&peer_id, MediaKind::Audio, true);
                gate.set_playing(&peer_id, MediaKind::Video, true);
                let event = TransportEvent::Participant(ParticipantEvent::Left { id: peer_id });
                if events.send(event).await.is_err() {
                    break;
                }
            }
            SignalMessage::Offer { peer_id, sdp } => match link.handle_offer(sdp).await {
                Ok(answer) => {
                    let _ = outgoing
                        .send(SignalMessage::Answer {
                            peer_id: local_peer.clone(),
                            sdp: answer,
                        })
                        .await;
                }
                Err(e) => {
                    // Isolated: one bad offer never takes the session down.
                    warn!(error = %transient(&peer_id, e), "skipping offer");
                }
            },
            SignalMessage::Answer { peer_id, sdp } => {
                if let Err(e) = link.handle_answer(sdp).await {
                    warn!(error = %transient(&peer_id, e), "skipping answer");
                }
            }
            SignalMessage::IceCandidate { peer_id, candidate } => {
                if let Err(e) = link.add_remote_candidate(candidate).await {
                    warn!(error = %transient(&peer_id, e), "skipping ICE candidate");
                }
            }
            SignalMessage::Error { message } => {
                warn!(%message, "signaling server reported an error");
            }
            other => {
                debug!(?other, "ignoring signaling message");
            }
        }
    }
}
