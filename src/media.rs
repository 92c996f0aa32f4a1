//! Local media acquisition and ownership.
//!
//! `MediaTrackManager` owns the microphone and camera for exactly one session:
//! `acquire` once, toggle enablement without re-acquisition, `release`
//! idempotently on every exit path. Hardware sits behind the `MediaDevices`
//! seam so the session flow is testable without devices.

use crate::error::{ClassroomError, Result};
use crate::transport::{MediaKind, PublishedTrack};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// One publishable local track plus its hardware-level enable flag.
///
/// Disabling flips the flag only: the capture callback stops feeding the
/// track, publication and negotiation are untouched.
pub struct LocalTrack {
    kind: MediaKind,
    enabled: Arc<AtomicBool>,
    rtc: Arc<TrackLocalStaticSample>,
}

impl LocalTrack {
    pub fn new(kind: MediaKind, mime_type: &str, id: &str) -> Self {
        Self {
            kind,
            enabled: Arc::new(AtomicBool::new(true)),
            rtc: Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: mime_type.to_owned(),
                    ..Default::default()
                },
                id.to_owned(),
                "local".to_owned(),
            )),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::SeqCst);
    }

    pub fn published(&self) -> PublishedTrack {
        PublishedTrack {
            kind: self.kind,
            rtc: self.rtc.clone(),
        }
    }
}

/// Releases the underlying capture device when dropped.
pub trait CaptureGuard {}

/// The presenter's own mic + camera pair. Dropping it releases the devices,
/// so the bundle going out of scope on any error path frees the hardware.
pub struct LocalMediaBundle {
    mic: LocalTrack,
    camera: LocalTrack,
    #[allow(dead_code)]
    guards: Vec<Box<dyn CaptureGuard>>,
}

impl LocalMediaBundle {
    pub fn new(mic: LocalTrack, camera: LocalTrack, guards: Vec<Box<dyn CaptureGuard>>) -> Self {
        Self {
            mic,
            camera,
            guards,
        }
    }

    pub fn mic(&self) -> &LocalTrack {
        &self.mic
    }

    pub fn camera(&self) -> &LocalTrack {
        &self.camera
    }

    pub fn published_tracks(&self) -> Vec<PublishedTrack> {
        vec![self.mic.published(), self.camera.published()]
    }
}

/// Hardware capture seam. The desktop implementation is `CpalMediaDevices`;
/// tests substitute fakes.
#[async_trait(?Send)]
pub trait MediaDevices {
    /// Request capture hardware. Fails with `DeviceUnavailable` when no device
    /// exists or the permission prompt was denied.
    async fn acquire(&self) -> Result<LocalMediaBundle>;
}

/// Owns the local capture for one session.
pub struct MediaTrackManager {
    devices: Arc<dyn MediaDevices>,
    bundle: Option<LocalMediaBundle>,
}

impl MediaTrackManager {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            bundle: None,
        }
    }

    /// Acquire the mic and camera. At most once per session.
    pub async fn acquire(&mut self) -> Result<()> {
        if self.bundle.is_some() {
            return Err(ClassroomError::AlreadyAcquired);
        }
        let bundle = self.devices.acquire().await?;
        debug!("local media acquired");
        self.bundle = Some(bundle);
        Ok(())
    }

    pub fn is_acquired(&self) -> bool {
        self.bundle.is_some()
    }

    pub fn bundle(&self) -> Option<&LocalMediaBundle> {
        self.bundle.as_ref()
    }

    pub fn set_mic_enabled(&self, on: bool) -> Result<()> {
        let bundle = self.bundle.as_ref().ok_or(ClassroomError::NotAcquired)?;
        bundle.mic.set_enabled(on);
        Ok(())
    }

    pub fn set_camera_enabled(&self, on: bool) -> Result<()> {
        let bundle = self.bundle.as_ref().ok_or(ClassroomError::NotAcquired)?;
        bundle.camera.set_enabled(on);
        Ok(())
    }

    /// Stop and release both tracks. Idempotent, and safe to call before
    /// `acquire` ever completed.
    pub fn release(&mut self) {
        if self.bundle.take().is_some() {
            debug!("local media released");
        }
    }
}

/// cpal-backed capture: default input device feeds the mic track.
pub struct CpalMediaDevices;

#[async_trait(?Send)]
impl MediaDevices for CpalMediaDevices {
    async fn acquire(&self) -> Result<LocalMediaBundle> {
        let mic = LocalTrack::new(MediaKind::Audio, "audio/opus", "mic");
        let camera = LocalTrack::new(MediaKind::Video, "video/vp8", "camera");
        let guard = MicCapture::open(mic.rtc.clone(), mic.enabled.clone())?;
        // TODO: feed camera frames from a capture backend (nokhwa); the camera
        // track currently publishes no frames.
        Ok(LocalMediaBundle::new(mic, camera, vec![Box::new(guard)]))
    }
}

/// Running microphone capture stream. Dropping it stops the stream and
/// releases the input device.
struct MicCapture {
    #[allow(dead_code)]
    stream: cpal::Stream,
}

impl CaptureGuard for MicCapture {}

impl MicCapture {
    fn open(track: Arc<TrackLocalStaticSample>, enabled: Arc<AtomicBool>) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| ClassroomError::DeviceUnavailable("no input device".to_string()))?;
        let config = device
            .default_input_config()
            .map_err(|e| ClassroomError::DeviceUnavailable(e.to_string()))?;
        debug!(?config, "input device opened");

        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as u32;
        let (sample_tx, sample_rx) = mpsc::channel::<Vec<f32>>(64);

        let stream = match config.sample_format() {
            SampleFormat::F32 => {
                Self::build_input_stream::<f32>(&device, &config.into(), sample_tx, enabled)?
            }
            SampleFormat::I16 => {
                Self::build_input_stream::<i16>(&device, &config.into(), sample_tx, enabled)?
            }
            SampleFormat::U16 => {
                Self::build_input_stream::<u16>(&device, &config.into(), sample_tx, enabled)?
            }
            other => {
                return Err(ClassroomError::DeviceUnavailable(format!(
                    "unsupported sample format: {other:?}"
                )))
            }
        };
        stream
            .play()
            .map_err(|e| ClassroomError::DeviceUnavailable(e.to_string()))?;

        Self::pump_samples(track, sample_rx, sample_rate, channels);

        Ok(Self { stream })
    }

    fn build_input_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        sample_tx: mpsc::Sender<Vec<f32>>,
        enabled: Arc<AtomicBool>,
    ) -> Result<cpal::Stream>
    where
        T: cpal::SizedSample,
        f32: cpal::FromSample<T>,
    {
        let err_fn = |err| warn!(error = %err, "input stream error");

        let stream = device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    // Hardware-level mute: the flag gates capture, not
                    // publication, so toggling never renegotiates.
                    if !enabled.load(Ordering::SeqCst) {
                        return;
                    }
                    let samples: Vec<f32> =
                        data.iter().map(|s| s.to_sample::<f32>()).collect();
                    let _ = sample_tx.try_send(samples);
                },
                err_fn,
                None,
            )
            .map_err(|e| ClassroomError::DeviceUnavailable(e.to_string()))?;

        Ok(stream)
    }

    fn pump_samples(
        track: Arc<TrackLocalStaticSample>,
        mut sample_rx: mpsc::Receiver<Vec<f32>>,
        sample_rate: u32,
        channels: u32,
    ) {
        tokio::spawn(async move {
            while let Some(samples) = sample_rx.recv().await {
                let frames = samples.len() as u32 / channels.max(1);
                let duration =
                    Duration::from_secs_f64(f64::from(frames) / f64::from(sample_rate.max(1)));
                let mut data = Vec::with_capacity(samples.len() * 4);
                for s in &samples {
                    data.extend_from_slice(&s.to_le_bytes());
                }
                let sample = Sample {
                    data: data.into(),
                    duration,
                    ..Default::default()
                };
                if let Err(e) = track.write_sample(&sample).await {
                    warn!(error = %e, "failed to write mic sample");
                }
            }
        });
    }
}
