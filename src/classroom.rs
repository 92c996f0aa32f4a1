//! Classroom session orchestration.
//!
//! `Classroom` composes the media manager, session client, roster and
//! moderation into the one start/end surface the UI drives. The start
//! sequence is acquire → join → publish; if any step fails, everything that
//! succeeded is unwound in the same pass, so the camera light never stays on
//! after a failed join. Teardown runs unconditionally and is idempotent.
//!
//! A leave requested while a start is still in flight is honored at the next
//! step boundary: whichever of the two finishes last still releases the
//! device exactly once.

use crate::error::{JoinFailure, Result};
use crate::media::{MediaDevices, MediaTrackManager};
use crate::moderation::{ModerationController, Role};
use crate::roster::{RosterSnapshot, RosterStore};
use crate::session::{SessionClient, SessionState};
use crate::transport::{SessionTransport, TransportEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Clonable handle that flags a pending leave from any context (window close,
/// navigation away) without needing the classroom itself.
#[derive(Clone)]
pub struct LeaveRequest(Arc<AtomicBool>);

impl LeaveRequest {
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct Classroom {
    client: SessionClient,
    media: MediaTrackManager,
    roster: Arc<Mutex<RosterStore>>,
    roster_tx: watch::Sender<RosterSnapshot>,
    roster_rx: watch::Receiver<RosterSnapshot>,
    lost_tx: watch::Sender<bool>,
    lost_rx: watch::Receiver<bool>,
    moderation: Option<ModerationController>,
    leave_requested: Arc<AtomicBool>,
    pump: Option<tokio::task::JoinHandle<()>>,
}

impl Classroom {
    pub fn new(
        transport: Arc<dyn SessionTransport>,
        devices: Arc<dyn MediaDevices>,
        role: Role,
    ) -> Self {
        let roster = Arc::new(Mutex::new(RosterStore::new()));
        // Seed with the empty roster so the first render already has every
        // placeholder tile, not a zero-length rail.
        let (roster_tx, roster_rx) = watch::channel(RosterStore::new().snapshot());
        let (lost_tx, lost_rx) = watch::channel(false);
        let moderation = ModerationController::for_role(role, roster.clone());
        Self {
            client: SessionClient::new(transport),
            media: MediaTrackManager::new(devices),
            roster,
            roster_tx,
            roster_rx,
            lost_tx,
            lost_rx,
            moderation,
            leave_requested: Arc::new(AtomicBool::new(false)),
            pump: None,
        }
    }

    /// Start the session: acquire local media, join the room, publish. On any
    /// failure (or a leave that raced the start) the whole sequence is
    /// unwound before returning.
    pub async fn start(&mut self, room: &str) -> Result<()> {
        // A stray second start must never unwind the session it didn't
        // create; refuse up front, before anything is touched.
        if self.client.state() != SessionState::Disconnected || self.media.is_acquired() {
            return Err(JoinFailure::AlreadyJoined.into());
        }
        self.leave_requested.store(false, Ordering::SeqCst);
        let _ = self.lost_tx.send(false);

        let result = self.run_start(room).await;
        if result.is_err() || self.leave_requested.load(Ordering::SeqCst) {
            self.end().await;
        }
        result
    }

    async fn run_start(&mut self, room: &str) -> Result<()> {
        // Device first: a denied permission never touches the transport.
        self.media.acquire().await?;
        if self.leave_requested.load(Ordering::SeqCst) {
            return Ok(());
        }

        let events = self.client.join(room).await?;
        if self.leave_requested.load(Ordering::SeqCst) {
            return Ok(());
        }

        let bundle = self
            .media
            .bundle()
            .ok_or(crate::error::ClassroomError::NotAcquired)?;
        self.client.publish(bundle).await?;

        self.spawn_pump(events);
        info!(room, "classroom session started");
        Ok(())
    }

    /// End the session and release everything. Safe on every path: abrupt
    /// unmount, join still in flight, repeated calls.
    pub async fn end(&mut self) {
        self.leave_requested.store(true, Ordering::SeqCst);
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.client.leave().await;
        // Never gated on the transport goodbye above.
        self.media.release();
        if let Ok(mut roster) = self.roster.lock() {
            *roster = RosterStore::new();
            let _ = self.roster_tx.send(roster.snapshot());
        }
    }

    /// Handle for flagging a leave from outside the classroom's owner.
    pub fn leave_handle(&self) -> LeaveRequest {
        LeaveRequest(self.leave_requested.clone())
    }

    pub fn state(&self) -> SessionState {
        self.client.state()
    }

    pub fn is_active(&self) -> bool {
        self.client.state() == SessionState::Connected
    }

    /// Roster snapshots, updated after every applied event.
    pub fn roster(&self) -> watch::Receiver<RosterSnapshot> {
        self.roster_rx.clone()
    }

    /// Becomes true when the underlying connection is lost; the UI tears down
    /// and offers an explicit re-join.
    pub fn connection_lost(&self) -> watch::Receiver<bool> {
        self.lost_rx.clone()
    }

    pub fn set_mic_enabled(&self, on: bool) -> Result<()> {
        self.media.set_mic_enabled(on)
    }

    pub fn set_camera_enabled(&self, on: bool) -> Result<()> {
        self.media.set_camera_enabled(on)
    }

    /// Presenter-only: stop local playback of one student's audio. Returns
    /// false (a no-op) without the capability, for unknown ids, and for
    /// students that already left.
    pub fn mute_student(&self, id: &str) -> bool {
        self.moderate(id, ModerationController::mute_participant)
    }

    pub fn unmute_student(&self, id: &str) -> bool {
        self.moderate(id, ModerationController::unmute_participant)
    }

    pub fn can_moderate(&self) -> bool {
        self.moderation.is_some()
    }

    fn moderate(&self, id: &str, action: fn(&ModerationController, &str) -> bool) -> bool {
        let Some(moderation) = &self.moderation else {
            return false;
        };
        let changed = action(moderation, id);
        if changed {
            if let Ok(roster) = self.roster.lock() {
                let _ = self.roster_tx.send(roster.snapshot());
            }
        }
        changed
    }

    fn spawn_pump(&mut self, mut events: mpsc::Receiver<TransportEvent>) {
        let roster = self.roster.clone();
        let roster_tx = self.roster_tx.clone();
        let lost_tx = self.lost_tx.clone();
        self.pump = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Participant(event) => {
                        let Ok(mut roster) = roster.lock() else {
                            break;
                        };
                        roster.apply(event);
                        let _ = roster_tx.send(roster.snapshot());
                    }
                    TransportEvent::ConnectionLost { reason } => {
                        warn!(%reason, "session connection lost");
                        let _ = lost_tx.send(true);
                        break;
                    }
                }
            }
        }));
    }
}
