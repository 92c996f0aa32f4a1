//! Session lifecycle state machine.
//!
//! `SessionClient` owns the connection to one named room:
//! `Disconnected → Connecting → Connected → Leaving → Disconnected`.
//! It never retains participant state beyond handing the transport's event
//! stream to the caller; the roster is derived downstream.

use crate::error::{ClassroomError, JoinFailure, Result};
use crate::media::LocalMediaBundle;
use crate::transport::{SessionTransport, TransportEvent};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Leaving,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "Disconnected"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Connected => write!(f, "Connected"),
            SessionState::Leaving => write!(f, "Leaving"),
        }
    }
}

pub struct SessionClient {
    transport: Arc<dyn SessionTransport>,
    state: SessionState,
    room: Option<String>,
}

impl SessionClient {
    pub fn new(transport: Arc<dyn SessionTransport>) -> Self {
        Self {
            transport,
            state: SessionState::Disconnected,
            room: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    /// Join the named room. A second join while not disconnected is an
    /// explicit error, never a silent second connection.
    pub async fn join(&mut self, room: &str) -> Result<mpsc::Receiver<TransportEvent>> {
        if self.state != SessionState::Disconnected {
            return Err(JoinFailure::AlreadyJoined.into());
        }
        self.state = SessionState::Connecting;
        info!(room, "joining room");

        match self.transport.connect(room).await {
            Ok(events) => {
                self.state = SessionState::Connected;
                self.room = Some(room.to_string());
                info!(room, "joined room");
                Ok(events)
            }
            Err(err) => {
                warn!(room, error = %err, "join failed");
                self.state = SessionState::Disconnected;
                Err(err)
            }
        }
    }

    /// Publish local tracks to the room. Valid in `Connected` only.
    pub async fn publish(&self, bundle: &LocalMediaBundle) -> Result<()> {
        if self.state != SessionState::Connected {
            return Err(ClassroomError::NotConnected);
        }
        self.transport.publish(bundle.published_tracks()).await?;
        info!("local tracks published");
        Ok(())
    }

    /// Leave the room. Never fails: a transport-level leave error is logged
    /// and local teardown proceeds, so resource release downstream is not
    /// gated on a successful remote handshake.
    pub async fn leave(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        self.state = SessionState::Leaving;
        if let Err(err) = self.transport.disconnect().await {
            warn!(error = %err, "transport leave failed, continuing local teardown");
        }
        self.state = SessionState::Disconnected;
        self.room = None;
        info!("left room");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{LocalMediaBundle, LocalTrack};
    use crate::transport::{MediaKind, PublishedTrack};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockTransport {
        connect_calls: AtomicUsize,
        publish_calls: AtomicUsize,
        disconnect_calls: AtomicUsize,
        fail_connect_with_capacity: bool,
        fail_disconnect: bool,
    }

    #[async_trait]
    impl SessionTransport for MockTransport {
        async fn connect(&self, _room: &str) -> Result<mpsc::Receiver<TransportEvent>> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect_with_capacity {
                return Err(JoinFailure::Capacity.into());
            }
            let (_tx, rx) = mpsc::channel(8);
            Ok(rx)
        }

        async fn publish(&self, _tracks: Vec<PublishedTrack>) -> Result<()> {
            self.publish_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_disconnect {
                return Err(ClassroomError::JoinFailed(JoinFailure::Network(
                    "socket closed".to_string(),
                )));
            }
            Ok(())
        }
    }

    fn bundle() -> LocalMediaBundle {
        LocalMediaBundle::new(
            LocalTrack::new(MediaKind::Audio, "audio/opus", "mic"),
            LocalTrack::new(MediaKind::Video, "video/vp8", "camera"),
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn join_connects_once() {
        let transport = Arc::new(MockTransport::default());
        let mut client = SessionClient::new(transport.clone());

        client.join("room-a").await.unwrap();
        assert_eq!(client.state(), SessionState::Connected);
        assert_eq!(client.room(), Some("room-a"));

        let err = client.join("room-a").await.unwrap_err();
        assert!(matches!(
            err,
            ClassroomError::JoinFailed(JoinFailure::AlreadyJoined)
        ));
        assert_eq!(transport.connect_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_join_returns_to_disconnected() {
        let transport = Arc::new(MockTransport {
            fail_connect_with_capacity: true,
            ..Default::default()
        });
        let mut client = SessionClient::new(transport.clone());

        let err = client.join("room-a").await.unwrap_err();
        assert!(matches!(
            err,
            ClassroomError::JoinFailed(JoinFailure::Capacity)
        ));
        assert_eq!(client.state(), SessionState::Disconnected);
        assert!(client.room().is_none());
    }

    #[tokio::test]
    async fn publish_requires_connected_state() {
        let transport = Arc::new(MockTransport::default());
        let mut client = SessionClient::new(transport.clone());
        let bundle = bundle();

        let err = client.publish(&bundle).await.unwrap_err();
        assert!(matches!(err, ClassroomError::NotConnected));
        assert_eq!(transport.publish_calls.load(Ordering::SeqCst), 0);

        client.join("room-a").await.unwrap();
        client.publish(&bundle).await.unwrap();
        assert_eq!(transport.publish_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn leave_survives_transport_failure() {
        let transport = Arc::new(MockTransport {
            fail_disconnect: true,
            ..Default::default()
        });
        let mut client = SessionClient::new(transport.clone());

        client.join("room-a").await.unwrap();
        client.leave().await;

        assert_eq!(client.state(), SessionState::Disconnected);
        assert!(client.room().is_none());
        assert_eq!(transport.disconnect_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn leave_when_disconnected_is_a_noop() {
        let transport = Arc::new(MockTransport::default());
        let mut client = SessionClient::new(transport.clone());

        client.leave().await;
        assert_eq!(transport.disconnect_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejoin_after_leave() {
        let transport = Arc::new(MockTransport::default());
        let mut client = SessionClient::new(transport.clone());

        client.join("room-a").await.unwrap();
        client.leave().await;
        assert_eq!(client.state(), SessionState::Disconnected);

        client.join("room-a").await.unwrap();
        assert_eq!(transport.connect_calls.load(Ordering::SeqCst), 2);
    }
}
