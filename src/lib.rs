//! Live classroom client: one presenter and up to ten students in a
//! real-time audio/video session with a shared whiteboard.
//!
//! The core (`session`, `roster`, `classroom`) is transport-agnostic and
//! tested against mocks; `signaling`, `rtc` and `backend` provide the shipped
//! websocket + WebRTC transport, and `main` puts a Dioxus desktop UI on top.

pub mod backend;
pub mod classroom;
pub mod config;
pub mod error;
pub mod media;
pub mod moderation;
pub mod roster;
pub mod rtc;
pub mod session;
pub mod signaling;
pub mod transport;
