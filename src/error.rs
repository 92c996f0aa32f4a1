//! Classroom error taxonomy.
//!
//! Session-fatal conditions (`DeviceUnavailable`, `JoinFailed`) carry enough
//! detail for the UI to render a distinguishable message. Contract errors
//! (`NotConnected`, `NotAcquired`, `AlreadyAcquired`) indicate a sequencing bug
//! in the caller and should not occur when the classroom orchestration is
//! followed. `TransientMediaFailure` is per-participant and never escalates to
//! session failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassroomError {
    /// No camera/mic, or the user denied the permission prompt. Fatal to the
    /// join sequence; requires user action before a retry makes sense.
    #[error("media device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The room could not be joined. Retryable by user action.
    #[error("failed to join room: {0}")]
    JoinFailed(JoinFailure),

    /// An operation that requires a connected session was called while the
    /// session was not connected.
    #[error("session is not connected")]
    NotConnected,

    /// A media toggle was requested before local tracks were acquired.
    #[error("local media has not been acquired")]
    NotAcquired,

    /// `acquire()` was called twice within one session.
    #[error("local media is already acquired")]
    AlreadyAcquired,

    /// A single remote participant's media could not be negotiated or played.
    /// Isolated: logged and skipped, the session continues.
    #[error("transient media failure for {participant}: {reason}")]
    TransientMediaFailure { participant: String, reason: String },

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Why a join attempt failed. The UI renders a different message per reason.
#[derive(Debug, Error)]
pub enum JoinFailure {
    #[error("network error: {0}")]
    Network(String),

    #[error("room is at capacity")]
    Capacity,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A second `join()` on an already-joined client. Never a second
    /// connection.
    #[error("already joined a session")]
    AlreadyJoined,
}

impl ClassroomError {
    /// Message shown in the UI. Join failures stay distinguishable so the user
    /// knows whether to fix permissions, retry, or give up on a full room.
    pub fn user_message(&self) -> String {
        match self {
            ClassroomError::DeviceUnavailable(_) => {
                "Camera or microphone unavailable. Check device permissions.".to_string()
            }
            ClassroomError::JoinFailed(JoinFailure::Network(_)) => {
                "Could not reach the classroom server. Check your connection and retry.".to_string()
            }
            ClassroomError::JoinFailed(JoinFailure::Capacity) => {
                "This classroom is full.".to_string()
            }
            ClassroomError::JoinFailed(JoinFailure::Unauthorized(_)) => {
                "You are not authorized to join this classroom.".to_string()
            }
            ClassroomError::JoinFailed(JoinFailure::AlreadyJoined) => {
                "Already in a classroom session.".to_string()
            }
            ClassroomError::TransientMediaFailure { participant, .. } => {
                format!("A media stream from {participant} could not be played.")
            }
            ClassroomError::NotConnected
            | ClassroomError::NotAcquired
            | ClassroomError::AlreadyAcquired
            | ClassroomError::Config(_) => "An internal error occurred.".to_string(),
        }
    }

    /// True for errors the user can retry by pressing join again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClassroomError::JoinFailed(JoinFailure::Network(_))
                | ClassroomError::JoinFailed(JoinFailure::Capacity)
        )
    }
}

impl From<JoinFailure> for ClassroomError {
    fn from(reason: JoinFailure) -> Self {
        ClassroomError::JoinFailed(reason)
    }
}

pub type Result<T> = std::result::Result<T, ClassroomError>;
