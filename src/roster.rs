//! In-process roster of remote participants.
//!
//! The roster is derived purely from transport events, applied one at a time
//! on the event pump task. Consumers never see the live maps: after each apply
//! an immutable `RosterSnapshot` is taken and swapped out, so a handler firing
//! mid-render cannot corrupt iteration.
//!
//! Render slots are the ten fixed student tiles. Video binds to the lowest
//! free slot; when all are taken the publish is still accepted and the
//! participant waits in a FIFO queue, promoted as slots free up.

use crate::config::SEAT_CAPACITY;
use crate::transport::{MediaKind, ParticipantEvent, ParticipantId, RemoteTrack};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

/// Render slots available for remote participants (one seat is the presenter).
pub const REMOTE_SLOTS: usize = SEAT_CAPACITY - 1;

/// One remote peer as currently known. Created on its first publish event,
/// destroyed on `Left` or as soon as it holds no media at all.
pub struct Participant {
    pub id: ParticipantId,
    pub audio: Option<RemoteTrack>,
    pub video: Option<RemoteTrack>,
    /// Local moderation flag; not server-authoritative.
    pub muted_by_moderator: bool,
    /// Render slot this participant's video is bound to, if any.
    pub slot: Option<usize>,
}

impl Participant {
    fn new(id: ParticipantId) -> Self {
        Self {
            id,
            audio: None,
            video: None,
            muted_by_moderator: false,
            slot: None,
        }
    }

    fn is_absent(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }
}

/// What the UI renders for one occupied slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantTile {
    pub id: ParticipantId,
    pub has_video: bool,
    pub has_audio: bool,
    pub muted_by_moderator: bool,
}

/// Immutable view of the roster, consistent with the latest applied event.
#[derive(Debug, Clone, Default)]
pub struct RosterSnapshot {
    /// Indexed by render slot; `None` renders a waiting placeholder.
    pub tiles: Vec<Option<ParticipantTile>>,
    /// Remote participants currently known (slotted or waiting).
    pub participant_count: usize,
    /// Participants with published video waiting for a free slot.
    pub deferred_count: usize,
}

pub struct RosterStore {
    participants: HashMap<ParticipantId, Participant>,
    slots: Vec<Option<ParticipantId>>,
    /// Ids that published video while all slots were taken, oldest first.
    deferred: VecDeque<ParticipantId>,
}

impl Default for RosterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RosterStore {
    pub fn new() -> Self {
        Self {
            participants: HashMap::new(),
            slots: vec![None; REMOTE_SLOTS],
            deferred: VecDeque::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Apply one transport event. Events must arrive in transport order.
    pub fn apply(&mut self, event: ParticipantEvent) {
        match event {
            ParticipantEvent::MediaPublished { id, kind, track } => {
                self.on_published(id, kind, track);
            }
            ParticipantEvent::MediaUnpublished { id, kind } => {
                self.on_unpublished(&id, kind);
            }
            ParticipantEvent::Left { id } => {
                self.on_left(&id);
            }
        }
    }

    fn on_published(&mut self, id: ParticipantId, kind: MediaKind, track: RemoteTrack) {
        let participant = self
            .participants
            .entry(id.clone())
            .or_insert_with(|| Participant::new(id.clone()));

        match kind {
            MediaKind::Audio => {
                participant.audio = Some(track);
                // A fresh audio handle plays by default, so a previous local
                // mute does not survive a republish.
                participant.muted_by_moderator = false;
            }
            MediaKind::Video => {
                participant.video = Some(track);
                if participant.slot.is_none() {
                    match self.slots.iter().position(Option::is_none) {
                        Some(free) => {
                            self.slots[free] = Some(id.clone());
                            if let Some(p) = self.participants.get_mut(&id) {
                                p.slot = Some(free);
                            }
                            debug!(participant = %id, slot = free, "video bound to render slot");
                        }
                        None => {
                            if !self.deferred.contains(&id) {
                                self.deferred.push_back(id.clone());
                            }
                            warn!(
                                participant = %id,
                                "all render slots taken, deferring video"
                            );
                        }
                    }
                }
            }
        }
    }

    fn on_unpublished(&mut self, id: &str, kind: MediaKind) {
        let Some(participant) = self.participants.get_mut(id) else {
            debug!(participant = %id, "unpublish for unknown participant ignored");
            return;
        };

        match kind {
            MediaKind::Audio => {
                participant.audio = None;
                participant.muted_by_moderator = false;
            }
            MediaKind::Video => {
                participant.video = None;
                // Slots render video; one without video goes back to the pool.
                if let Some(slot) = participant.slot.take() {
                    self.slots[slot] = None;
                }
                self.deferred.retain(|d| d != id);
            }
        }

        if self.participants.get(id).map(Participant::is_absent) == Some(true) {
            self.remove(id);
        }
        self.promote_deferred();
    }

    fn on_left(&mut self, id: &str) {
        if self.remove(id) {
            info!(participant = %id, "participant left");
        }
        self.promote_deferred();
    }

    /// Remove a participant and free its slot, regardless of media state.
    fn remove(&mut self, id: &str) -> bool {
        let Some(participant) = self.participants.remove(id) else {
            return false;
        };
        if let Some(audio) = &participant.audio {
            audio.set_playing(false);
        }
        if let Some(slot) = participant.slot {
            self.slots[slot] = None;
        }
        self.deferred.retain(|d| d != id);
        true
    }

    /// Hand freed slots to waiters, first-deferred-first-assigned.
    fn promote_deferred(&mut self) {
        while let Some(free) = self.slots.iter().position(Option::is_none) {
            let Some(id) = self.deferred.pop_front() else {
                break;
            };
            let Some(participant) = self.participants.get_mut(&id) else {
                continue;
            };
            if participant.video.is_none() || participant.slot.is_some() {
                continue;
            }
            participant.slot = Some(free);
            self.slots[free] = Some(id.clone());
            info!(participant = %id, slot = free, "deferred video promoted to render slot");
        }
    }

    /// Locally mute or unmute one participant's audio playback. Returns true
    /// when the state changed; unknown ids and participants without audio are
    /// no-ops.
    pub fn set_participant_muted(&mut self, id: &str, muted: bool) -> bool {
        let Some(participant) = self.participants.get_mut(id) else {
            return false;
        };
        let Some(audio) = &participant.audio else {
            return false;
        };
        if participant.muted_by_moderator == muted {
            return false;
        }
        audio.set_playing(!muted);
        participant.muted_by_moderator = muted;
        true
    }

    pub fn snapshot(&self) -> RosterSnapshot {
        let tiles = self
            .slots
            .iter()
            .map(|slot| {
                slot.as_ref().and_then(|id| {
                    self.participants.get(id).map(|p| ParticipantTile {
                        id: p.id.clone(),
                        has_video: p.video.is_some(),
                        has_audio: p.audio.is_some(),
                        muted_by_moderator: p.muted_by_moderator,
                    })
                })
            })
            .collect();
        RosterSnapshot {
            tiles,
            participant_count: self.participants.len(),
            deferred_count: self.deferred.len(),
        }
    }
}
