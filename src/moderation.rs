//! Presenter-only moderation.
//!
//! `ModerationController` is a capability object: only the presenter role ever
//! holds one, so student clients cannot reach these actions at all. The gate
//! is local; nothing here is enforced server-side.
//!
//! Muting stops *local playback* of the participant's audio track. It does
//! not instruct the remote peer to stop transmitting; other participants
//! still hear them. (Kept as the product behaves today; see DESIGN.md.)

use crate::roster::RosterStore;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Local participant's role in the classroom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Presenter,
    Student,
}

pub struct ModerationController {
    roster: Arc<Mutex<RosterStore>>,
}

impl ModerationController {
    /// Hand out the capability for the presenter; students get `None`.
    pub fn for_role(role: Role, roster: Arc<Mutex<RosterStore>>) -> Option<Self> {
        match role {
            Role::Presenter => Some(Self { roster }),
            Role::Student => None,
        }
    }

    /// Stop local playback of a participant's audio. Idempotent: muting an
    /// already-muted participant, or one that has since left, is a no-op.
    pub fn mute_participant(&self, id: &str) -> bool {
        self.set_muted(id, true)
    }

    /// Resume local playback of a participant's audio.
    pub fn unmute_participant(&self, id: &str) -> bool {
        self.set_muted(id, false)
    }

    fn set_muted(&self, id: &str, muted: bool) -> bool {
        let Ok(mut roster) = self.roster.lock() else {
            return false;
        };
        let changed = roster.set_participant_muted(id, muted);
        if changed {
            info!(participant = %id, muted, "local playback moderation applied");
        }
        changed
    }
}
