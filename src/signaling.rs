//! Websocket signaling client.
//!
//! JSON-tagged messages over a websocket to the classroom signaling server.
//! The server is responsible for fan-out and for rewriting the stream id of
//! forwarded media tracks to the publishing peer's id, which is how remote
//! tracks are attributed on this side.

use crate::error::{ClassroomError, JoinFailure, Result};
use crate::transport::MediaKind;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "message_type")]
pub enum SignalMessage {
    Join {
        app_id: String,
        room_id: String,
        peer_id: String,
        token: Option<String>,
    },
    Joined {
        room_id: String,
    },
    JoinRejected {
        reason: JoinRejection,
    },
    Leave {
        room_id: String,
        peer_id: String,
    },
    /// Announce a local track to the room.
    Publish {
        peer_id: String,
        kind: MediaKind,
    },
    Unpublish {
        peer_id: String,
        kind: MediaKind,
    },
    /// A remote peer published a track of the given kind.
    PeerPublished {
        peer_id: String,
        kind: MediaKind,
    },
    PeerUnpublished {
        peer_id: String,
        kind: MediaKind,
    },
    PeerLeft {
        peer_id: String,
    },
    Offer {
        peer_id: String,
        sdp: String,
    },
    Answer {
        peer_id: String,
        sdp: String,
    },
    IceCandidate {
        peer_id: String,
        candidate: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinRejection {
    Capacity,
    Unauthorized { detail: String },
}

impl From<JoinRejection> for ClassroomError {
    fn from(rejection: JoinRejection) -> Self {
        match rejection {
            JoinRejection::Capacity => JoinFailure::Capacity.into(),
            JoinRejection::Unauthorized { detail } => JoinFailure::Unauthorized(detail).into(),
        }
    }
}

pub struct SignalingClient {
    tx: mpsc::Sender<SignalMessage>,
    rx: mpsc::Receiver<SignalMessage>,
}

impl SignalingClient {
    /// Open the websocket and start the read/write pumps. Connection failures
    /// surface as a network join failure.
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| JoinFailure::Network(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let (incoming_tx, incoming_rx) = mpsc::channel(100);
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<SignalMessage>(100);

        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                match serde_json::to_string(&msg) {
                    Ok(json) => {
                        if write.send(json.into()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to encode signaling message"),
                }
            }
        });

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let Ok(msg) = msg else { break };
                if !msg.is_text() {
                    continue;
                }
                match serde_json::from_str::<SignalMessage>(msg.to_string().as_str()) {
                    Ok(signal) => {
                        if incoming_tx.send(signal).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!(error = %e, "ignoring malformed signaling message"),
                }
            }
            // Dropping incoming_tx lets the consumer observe the closed socket.
        });

        Ok(Self {
            tx: outgoing_tx,
            rx: incoming_rx,
        })
    }

    pub async fn send(&self, msg: SignalMessage) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|e| ClassroomError::JoinFailed(JoinFailure::Network(e.to_string())))
    }

    /// Next message from the server; `None` once the socket is gone.
    pub async fn recv(&mut self) -> Option<SignalMessage> {
        self.rx.recv().await
    }

    /// A send handle usable from the peer link callbacks.
    pub fn sender(&self) -> mpsc::Sender<SignalMessage> {
        self.tx.clone()
    }
}
