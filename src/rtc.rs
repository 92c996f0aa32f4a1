//! WebRTC peer link and remote audio playback.
//!
//! One peer connection carries all published and subscribed tracks; the
//! classroom server fans media out and rewrites forwarded stream ids to the
//! publishing peer's id. Remote audio is decoded off the RTP readers and
//! mixed on a dedicated playback thread, with a per-peer gate that the
//! moderation layer flips to stop local playback.

use crate::signaling::SignalMessage;
use crate::transport::{MediaKind, PublishedTrack, RemoteMediaTrack, TransportEvent};
use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

const STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Decoded audio batch tagged with the publishing peer.
pub type AudioBatch = (String, Vec<f32>);

/// Which remote peers' audio is locally muted. Shared between the moderation
/// handles and the playback mixer.
#[derive(Clone, Default)]
pub struct PlaybackGate {
    muted: Arc<RwLock<HashSet<(String, MediaKind)>>>,
}

impl PlaybackGate {
    pub fn set_playing(&self, peer_id: &str, kind: MediaKind, playing: bool) {
        let Ok(mut muted) = self.muted.write() else {
            return;
        };
        if playing {
            muted.remove(&(peer_id.to_string(), kind));
        } else {
            muted.insert((peer_id.to_string(), kind));
        }
    }

    pub fn is_playing(&self, peer_id: &str, kind: MediaKind) -> bool {
        self.muted
            .read()
            .map(|muted| !muted.contains(&(peer_id.to_string(), kind)))
            .unwrap_or(true)
    }
}

/// Remote track handle handed to the roster. Play/stop toggles the playback
/// gate for this peer and kind; the remote sender is never touched.
pub struct GatedRemoteTrack {
    peer_id: String,
    kind: MediaKind,
    gate: PlaybackGate,
}

impl GatedRemoteTrack {
    pub fn new(peer_id: String, kind: MediaKind, gate: PlaybackGate) -> Self {
        Self {
            peer_id,
            kind,
            gate,
        }
    }
}

impl RemoteMediaTrack for GatedRemoteTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn set_playing(&self, playing: bool) {
        self.gate.set_playing(&self.peer_id, self.kind, playing);
    }

    fn is_playing(&self) -> bool {
        self.gate.is_playing(&self.peer_id, self.kind)
    }
}

/// Playback mixer on its own thread, so the transport stays `Send` while the
/// cpal output stream (which is not) lives thread-local. Dropping the handle
/// stops the thread and releases the output device.
pub struct AudioMixer {
    samples_tx: std_mpsc::Sender<AudioBatch>,
    _shutdown_tx: std_mpsc::Sender<()>,
}

impl AudioMixer {
    pub fn spawn(gate: PlaybackGate) -> Self {
        let (samples_tx, samples_rx) = std_mpsc::channel::<AudioBatch>();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();

        std::thread::spawn(move || {
            let stream = match Self::open_output(samples_rx, gate) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "no audio output, remote audio will not play");
                    return;
                }
            };
            // Blocks until the handle is dropped, then the stream goes too.
            let _ = shutdown_rx.recv();
            drop(stream);
        });

        Self {
            samples_tx,
            _shutdown_tx: shutdown_tx,
        }
    }

    pub fn sender(&self) -> std_mpsc::Sender<AudioBatch> {
        self.samples_tx.clone()
    }

    fn open_output(
        samples_rx: std_mpsc::Receiver<AudioBatch>,
        gate: PlaybackGate,
    ) -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("no output device available"))?;
        let config = device.default_output_config()?;
        debug!(?config, "output device opened");

        let stream = match config.sample_format() {
            SampleFormat::F32 => {
                Self::build_output_stream::<f32>(&device, &config.into(), samples_rx, gate)?
            }
            SampleFormat::I16 => {
                Self::build_output_stream::<i16>(&device, &config.into(), samples_rx, gate)?
            }
            SampleFormat::U16 => {
                Self::build_output_stream::<u16>(&device, &config.into(), samples_rx, gate)?
            }
            other => anyhow::bail!("unsupported sample format: {other:?}"),
        };
        stream.play()?;
        Ok(stream)
    }

    fn build_output_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        samples_rx: std_mpsc::Receiver<AudioBatch>,
        gate: PlaybackGate,
    ) -> Result<cpal::Stream>
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        let err_fn = |err| warn!(error = %err, "output stream error");

        let stream = device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                // Pull the next audible batch, discarding batches from peers
                // whose playback the presenter stopped.
                let mut batch = None;
                for _ in 0..8 {
                    match samples_rx.try_recv() {
                        Ok((peer_id, samples)) => {
                            if gate.is_playing(&peer_id, MediaKind::Audio) {
                                batch = Some(samples);
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                match batch {
                    Some(samples) => {
                        for (out, sample) in data.iter_mut().zip(samples.iter()) {
                            *out = T::from_sample(*sample);
                        }
                        for out in data.iter_mut().skip(samples.len()) {
                            *out = T::from_sample(0.0);
                        }
                    }
                    None => {
                        for out in data.iter_mut() {
                            *out = T::from_sample(0.0);
                        }
                    }
                }
            },
            err_fn,
            None,
        )?;

        Ok(stream)
    }
}

/// The single peer connection for a classroom session.
pub struct PeerLink {
    pc: Arc<RTCPeerConnection>,
}

impl PeerLink {
    /// Build the peer connection and wire its callbacks: local ICE candidates
    /// go out through signaling, remote audio feeds the mixer, and a dead
    /// connection is reported once as `ConnectionLost`.
    pub async fn new(
        peer_id: String,
        outgoing: mpsc::Sender<SignalMessage>,
        events: mpsc::Sender<TransportEvent>,
        mixer_tx: std_mpsc::Sender<AudioBatch>,
    ) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let api = APIBuilder::new().with_media_engine(media_engine).build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec![STUN_SERVER.to_owned()],
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(config).await?);

        let candidate_out = outgoing.clone();
        let local_peer = peer_id.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let candidate_out = candidate_out.clone();
            let local_peer = local_peer.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = candidate_out
                            .send(SignalMessage::IceCandidate {
                                peer_id: local_peer,
                                candidate: init.candidate,
                            })
                            .await;
                    }
                    Err(e) => warn!(error = %e, "failed to serialize ICE candidate"),
                }
            })
        }));

        let lost_reported = Arc::new(AtomicBool::new(false));
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events = events.clone();
            let lost_reported = lost_reported.clone();
            Box::pin(async move {
                info!(%state, "peer connection state changed");
                let lost = matches!(
                    state,
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                );
                if lost && !lost_reported.swap(true, Ordering::SeqCst) {
                    let _ = events
                        .send(TransportEvent::ConnectionLost {
                            reason: format!("peer connection {state}"),
                        })
                        .await;
                }
            })
        }));

        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let mixer_tx = mixer_tx.clone();
            Box::pin(async move {
                let peer_id = track.stream_id();
                if track.kind() != RTPCodecType::Audio {
                    debug!(peer = %peer_id, "remote video track attached");
                    return;
                }
                debug!(peer = %peer_id, "remote audio track attached");
                tokio::spawn(async move {
                    while let Ok((rtp, _)) = track.read_rtp().await {
                        let samples: Vec<f32> = rtp
                            .payload
                            .chunks_exact(4)
                            .map(|chunk| {
                                f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
                            })
                            .collect();
                        if mixer_tx.send((peer_id.clone(), samples)).is_err() {
                            break;
                        }
                    }
                    debug!(peer = %peer_id, "remote audio track ended");
                });
            })
        }));

        Ok(Self { pc })
    }

    /// Register local tracks for publication.
    pub async fn add_local_tracks(&self, tracks: Vec<PublishedTrack>) -> Result<()> {
        for track in tracks {
            self.pc
                .add_track(Arc::clone(&track.rtc) as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
        }
        Ok(())
    }

    pub async fn create_offer(&self) -> Result<String> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;
        Ok(serde_json::to_string(&offer)?)
    }

    pub async fn handle_offer(&self, sdp: String) -> Result<String> {
        let offer = serde_json::from_str(&sdp)?;
        self.pc.set_remote_description(offer).await?;

        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        Ok(serde_json::to_string(&answer)?)
    }

    pub async fn handle_answer(&self, sdp: String) -> Result<()> {
        let answer = serde_json::from_str(&sdp)?;
        self.pc.set_remote_description(answer).await?;
        Ok(())
    }

    pub async fn add_remote_candidate(&self, candidate: String) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate,
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}
