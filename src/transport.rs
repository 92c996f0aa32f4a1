//! Transport seam between the session client and the real-time media backend.
//!
//! The classroom core depends only on this surface: connect/disconnect,
//! publish, and the closed set of participant lifecycle events. Any compliant
//! real-time transport can sit behind it; the shipped one is websocket
//! signaling plus a WebRTC peer link (`signaling`/`rtc`), and tests drive the
//! core with an in-memory mock.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Opaque remote peer identity as reported by the transport.
pub type ParticipantId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Handle to one remote participant's published track.
///
/// `set_playing` controls *local playback only*: it never instructs the remote
/// peer to stop transmitting. Handles stay valid after the participant leaves;
/// operations on a stale handle are harmless no-ops at the playback layer.
pub trait RemoteMediaTrack: Send + Sync {
    fn kind(&self) -> MediaKind;
    fn set_playing(&self, playing: bool);
    fn is_playing(&self) -> bool;
}

pub type RemoteTrack = Arc<dyn RemoteMediaTrack>;

/// A local track as handed to the transport for publication.
pub struct PublishedTrack {
    pub kind: MediaKind,
    pub rtc: Arc<TrackLocalStaticSample>,
}

/// Participant lifecycle events, in the order the transport reports them.
///
/// Ordering is preserved per participant by delivering every event through one
/// channel; no batching may present a `Left` before an earlier publish for the
/// same id.
#[derive(Clone)]
pub enum ParticipantEvent {
    MediaPublished {
        id: ParticipantId,
        kind: MediaKind,
        track: RemoteTrack,
    },
    MediaUnpublished {
        id: ParticipantId,
        kind: MediaKind,
    },
    Left {
        id: ParticipantId,
    },
}

impl fmt::Debug for ParticipantEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParticipantEvent::MediaPublished { id, kind, .. } => f
                .debug_struct("MediaPublished")
                .field("id", id)
                .field("kind", kind)
                .finish(),
            ParticipantEvent::MediaUnpublished { id, kind } => f
                .debug_struct("MediaUnpublished")
                .field("id", id)
                .field("kind", kind)
                .finish(),
            ParticipantEvent::Left { id } => f.debug_struct("Left").field("id", id).finish(),
        }
    }
}

/// Everything the transport can report after a successful connect.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Participant(ParticipantEvent),
    /// The underlying connection is gone. Forces a full teardown; the UI
    /// offers an explicit re-join, never a silent reconnect.
    ConnectionLost { reason: String },
}

/// The contract the classroom core holds against the media backend.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Connect to the named room. On success the returned receiver yields
    /// events until disconnect or connection loss.
    async fn connect(&self, room: &str) -> Result<mpsc::Receiver<TransportEvent>>;

    /// Make local tracks visible to the other participants.
    async fn publish(&self, tracks: Vec<PublishedTrack>) -> Result<()>;

    /// Leave the room and stop event delivery. Local resources are released by
    /// the caller regardless of this call's outcome.
    async fn disconnect(&self) -> Result<()>;
}
