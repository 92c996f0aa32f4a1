//! End-to-end session flows over a scripted transport and fake devices.
//!
//! These tests exercise the public classroom surface the way the UI does:
//! start, react to participant events through the roster watch channel,
//! moderate, and tear down. No hardware or network is involved.

use async_trait::async_trait;
use live_classroom::classroom::Classroom;
use live_classroom::error::{ClassroomError, JoinFailure, Result};
use live_classroom::media::{CaptureGuard, LocalMediaBundle, LocalTrack, MediaDevices};
use live_classroom::moderation::Role;
use live_classroom::roster::REMOTE_SLOTS;
use live_classroom::transport::{
    MediaKind, ParticipantEvent, PublishedTrack, RemoteMediaTrack, RemoteTrack, SessionTransport,
    TransportEvent,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

struct FakeGuard {
    released: Arc<AtomicUsize>,
}

impl CaptureGuard for FakeGuard {}

impl Drop for FakeGuard {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeDevices {
    released: Arc<AtomicUsize>,
    fail: bool,
}

impl FakeDevices {
    fn working() -> (Arc<Self>, Arc<AtomicUsize>) {
        let released = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                released: released.clone(),
                fail: false,
            }),
            released,
        )
    }
}

#[async_trait(?Send)]
impl MediaDevices for FakeDevices {
    async fn acquire(&self) -> Result<LocalMediaBundle> {
        if self.fail {
            return Err(ClassroomError::DeviceUnavailable(
                "no input device".to_string(),
            ));
        }
        Ok(LocalMediaBundle::new(
            LocalTrack::new(MediaKind::Audio, "audio/opus", "mic"),
            LocalTrack::new(MediaKind::Video, "video/vp8", "camera"),
            vec![Box::new(FakeGuard {
                released: self.released.clone(),
            })],
        ))
    }
}

struct FakeRemoteTrack {
    kind: MediaKind,
    playing: AtomicBool,
}

impl FakeRemoteTrack {
    fn track(kind: MediaKind) -> RemoteTrack {
        Arc::new(Self {
            kind,
            playing: AtomicBool::new(true),
        })
    }
}

impl RemoteMediaTrack for FakeRemoteTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }
    fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::SeqCst);
    }
    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

/// Scripted transport: records calls, optionally fails the connect with a
/// chosen reason, and exposes the event sender for injecting room activity.
#[derive(Default)]
struct ScriptedTransport {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    published: Mutex<Vec<MediaKind>>,
    reject_with: Mutex<Option<JoinFailure>>,
    leave_on_connect: Mutex<Option<live_classroom::classroom::LeaveRequest>>,
    events_tx: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

impl ScriptedTransport {
    fn rejecting(reason: JoinFailure) -> Self {
        Self {
            reject_with: Mutex::new(Some(reason)),
            ..Default::default()
        }
    }

    fn events(&self) -> mpsc::Sender<TransportEvent> {
        self.events_tx
            .lock()
            .unwrap()
            .clone()
            .expect("transport not connected")
    }

    async fn publish_remote(&self, id: &str, kind: MediaKind) -> RemoteTrack {
        let track = FakeRemoteTrack::track(kind);
        self.events()
            .send(TransportEvent::Participant(ParticipantEvent::MediaPublished {
                id: id.to_string(),
                kind,
                track: track.clone(),
            }))
            .await
            .unwrap();
        track
    }

    async fn leave_remote(&self, id: &str) {
        self.events()
            .send(TransportEvent::Participant(ParticipantEvent::Left {
                id: id.to_string(),
            }))
            .await
            .unwrap();
    }
}

#[async_trait]
impl SessionTransport for ScriptedTransport {
    async fn connect(&self, _room: &str) -> Result<mpsc::Receiver<TransportEvent>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.reject_with.lock().unwrap().take() {
            return Err(reason.into());
        }
        if let Some(leave) = self.leave_on_connect.lock().unwrap().take() {
            leave.request();
        }
        let (tx, rx) = mpsc::channel(32);
        *self.events_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn publish(&self, tracks: Vec<PublishedTrack>) -> Result<()> {
        let mut published = self.published.lock().unwrap();
        published.extend(tracks.iter().map(|t| t.kind));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn presenter_classroom(transport: Arc<ScriptedTransport>) -> (Classroom, Arc<AtomicUsize>) {
    let (devices, released) = FakeDevices::working();
    (
        Classroom::new(transport, devices, Role::Presenter),
        released,
    )
}

async fn next_snapshot(
    roster: &mut tokio::sync::watch::Receiver<live_classroom::roster::RosterSnapshot>,
) -> live_classroom::roster::RosterSnapshot {
    roster.changed().await.unwrap();
    roster.borrow().clone()
}

#[tokio::test]
async fn full_session_flow() {
    let transport = Arc::new(ScriptedTransport::default());
    let (mut classroom, released) = presenter_classroom(transport.clone());

    classroom.start("algebra-101").await.unwrap();
    assert!(classroom.is_active());
    assert_eq!(
        *transport.published.lock().unwrap(),
        vec![MediaKind::Audio, MediaKind::Video]
    );

    // Two students show up with different media.
    let mut roster = classroom.roster();
    let s1_audio = transport.publish_remote("s1", MediaKind::Audio).await;
    transport.publish_remote("s1", MediaKind::Video).await;
    transport.publish_remote("s2", MediaKind::Video).await;

    let snapshot = loop {
        let snapshot = next_snapshot(&mut roster).await;
        if snapshot.participant_count == 2 && snapshot.tiles[1].is_some() {
            break snapshot;
        }
    };
    assert_eq!(snapshot.tiles[0].as_ref().unwrap().id, "s1");
    assert!(snapshot.tiles[0].as_ref().unwrap().has_audio);
    assert_eq!(snapshot.tiles[1].as_ref().unwrap().id, "s2");
    assert!(!snapshot.tiles[1].as_ref().unwrap().has_audio);

    // Presenter mutes s1 locally: playback stops, the tile shows it.
    assert!(classroom.mute_student("s1"));
    assert!(!s1_audio.is_playing());
    let snapshot = next_snapshot(&mut roster).await;
    assert!(snapshot.tiles[0].as_ref().unwrap().muted_by_moderator);

    assert!(classroom.unmute_student("s1"));
    assert!(s1_audio.is_playing());

    // s2 leaves; their tile frees up.
    transport.leave_remote("s2").await;
    let snapshot = next_snapshot(&mut roster).await;
    assert_eq!(snapshot.participant_count, 1);
    assert!(snapshot.tiles[1].is_none());

    classroom.end().await;
    assert!(!classroom.is_active());
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
    assert!(classroom.roster().borrow().tiles.iter().all(Option::is_none));
}

#[tokio::test]
async fn device_failure_aborts_before_any_join() {
    let transport = Arc::new(ScriptedTransport::default());
    let released = Arc::new(AtomicUsize::new(0));
    let devices = Arc::new(FakeDevices {
        released: released.clone(),
        fail: true,
    });
    let mut classroom = Classroom::new(transport.clone(), devices, Role::Presenter);

    let err = classroom.start("algebra-101").await.unwrap_err();
    assert!(matches!(err, ClassroomError::DeviceUnavailable(_)));
    assert_eq!(transport.connects.load(Ordering::SeqCst), 0);
    assert_eq!(released.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_join_still_releases_the_device() {
    let transport = Arc::new(ScriptedTransport::rejecting(JoinFailure::Network(
        "connection refused".to_string(),
    )));
    let (mut classroom, released) = presenter_classroom(transport.clone());

    let err = classroom.start("algebra-101").await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert!(!classroom.is_active());
}

#[tokio::test]
async fn capacity_rejection_reads_differently_from_network_failure() {
    let transport = Arc::new(ScriptedTransport::rejecting(JoinFailure::Capacity));
    let (mut classroom, _released) = presenter_classroom(transport);

    let capacity_message = classroom.start("algebra-101").await.unwrap_err().user_message();

    let transport = Arc::new(ScriptedTransport::rejecting(JoinFailure::Network(
        "timed out".to_string(),
    )));
    let (mut classroom, _released) = presenter_classroom(transport);
    let network_message = classroom.start("algebra-101").await.unwrap_err().user_message();

    assert_ne!(capacity_message, network_message);
}

#[tokio::test]
async fn rejoin_after_clean_leave_works() {
    let transport = Arc::new(ScriptedTransport::default());
    let (mut classroom, released) = presenter_classroom(transport.clone());

    classroom.start("algebra-101").await.unwrap();
    classroom.end().await;
    classroom.start("algebra-101").await.unwrap();

    assert!(classroom.is_active());
    assert_eq!(transport.connects.load(Ordering::SeqCst), 2);
    // Each session acquired and released its own bundle.
    classroom.end().await;
    assert_eq!(released.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn connection_loss_tears_down_without_reconnecting() {
    let transport = Arc::new(ScriptedTransport::default());
    let (mut classroom, released) = presenter_classroom(transport.clone());
    classroom.start("algebra-101").await.unwrap();

    let mut lost = classroom.connection_lost();
    transport
        .events()
        .send(TransportEvent::ConnectionLost {
            reason: "socket closed".to_string(),
        })
        .await
        .unwrap();
    lost.changed().await.unwrap();
    assert!(*lost.borrow());

    classroom.end().await;
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn eleventh_video_waits_then_takes_a_freed_tile() {
    let transport = Arc::new(ScriptedTransport::default());
    let (mut classroom, _released) = presenter_classroom(transport.clone());
    classroom.start("algebra-101").await.unwrap();

    let mut roster = classroom.roster();
    for i in 0..REMOTE_SLOTS {
        transport
            .publish_remote(&format!("s{i}"), MediaKind::Video)
            .await;
    }
    transport.publish_remote("late", MediaKind::Video).await;

    let snapshot = loop {
        let snapshot = next_snapshot(&mut roster).await;
        if snapshot.participant_count == REMOTE_SLOTS + 1 {
            break snapshot;
        }
    };
    assert_eq!(snapshot.deferred_count, 1);
    assert!(snapshot
        .tiles
        .iter()
        .flatten()
        .all(|tile| tile.id != "late"));

    transport.leave_remote("s4").await;
    let snapshot = loop {
        let snapshot = next_snapshot(&mut roster).await;
        if snapshot.deferred_count == 0 {
            break snapshot;
        }
    };
    assert_eq!(snapshot.tiles[4].as_ref().unwrap().id, "late");
}

#[tokio::test]
async fn leave_flagged_during_join_releases_exactly_once() {
    let transport = Arc::new(ScriptedTransport::default());
    let (mut classroom, released) = presenter_classroom(transport.clone());

    // The leave lands while the join round-trip is still in flight.
    *transport.leave_on_connect.lock().unwrap() = Some(classroom.leave_handle());
    classroom.start("algebra-101").await.unwrap();

    assert!(!classroom.is_active());
    assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn students_cannot_moderate() {
    let transport = Arc::new(ScriptedTransport::default());
    let (devices, _released) = FakeDevices::working();
    let mut classroom = Classroom::new(transport.clone(), devices, Role::Student);
    classroom.start("algebra-101").await.unwrap();

    let mut roster = classroom.roster();
    transport.publish_remote("s1", MediaKind::Audio).await;
    loop {
        if next_snapshot(&mut roster).await.participant_count == 1 {
            break;
        }
    }

    assert!(!classroom.can_moderate());
    assert!(!classroom.mute_student("s1"));
}
