//! Sender pumps
//!
//! A pump moves frames from a [`TrackHandle`] into the webrtc-rs sample
//! track bound to an RTP sender. Video is encoded on the blocking pool;
//! audio packets are already Opus and are written as-is. Frames are
//! dropped while the source track is disabled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use super::encoder::VideoEncoder;
use crate::media::{MediaFrame, MediaKind, TrackHandle};
use crate::utils::LogThrottler;
use crate::warn_throttled;

/// H.264 clock rate (RFC 6184)
pub const H264_CLOCK_RATE: u32 = 90_000;

/// Opus clock rate
pub const OPUS_CLOCK_RATE: u32 = 48_000;

pub const STREAM_ID: &str = "live-publisher";

pub fn codec_capability(kind: MediaKind) -> RTCRtpCodecCapability {
    match kind {
        MediaKind::Video => RTCRtpCodecCapability {
            mime_type: "video/H264".to_string(),
            clock_rate: H264_CLOCK_RATE,
            channels: 0,
            sdp_fmtp_line: "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                .to_string(),
            rtcp_feedback: vec![],
        },
        MediaKind::Audio => RTCRtpCodecCapability {
            mime_type: "audio/opus".to_string(),
            clock_rate: OPUS_CLOCK_RATE,
            channels: 2,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
            rtcp_feedback: vec![],
        },
    }
}

/// Fresh sample track for one attachment
pub fn new_local_track(kind: MediaKind) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        codec_capability(kind),
        format!("{}-{}", kind, uuid::Uuid::new_v4()),
        STREAM_ID.to_string(),
    ))
}

pub struct SenderPump {
    source_id: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    samples: Arc<AtomicU64>,
}

impl SenderPump {
    pub fn video(
        source: TrackHandle,
        local: Arc<TrackLocalStaticSample>,
        encoder: Box<dyn VideoEncoder>,
        fps: u32,
    ) -> Self {
        let frame_duration = Duration::from_micros(1_000_000 / fps.clamp(1, 60) as u64);
        Self::spawn(source, |ctx| video_loop(ctx, local, encoder, frame_duration))
    }

    pub fn audio(source: TrackHandle, local: Arc<TrackLocalStaticSample>) -> Self {
        Self::spawn(source, |ctx| audio_loop(ctx, local))
    }

    fn spawn<F, Fut>(source: TrackHandle, run: F) -> Self
    where
        F: FnOnce(PumpContext) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let samples = Arc::new(AtomicU64::new(0));
        let source_id = source.id().to_string();
        let ctx = PumpContext {
            rx: source.subscribe(),
            source,
            cancel: cancel.clone(),
            samples: samples.clone(),
        };
        Self {
            source_id,
            cancel,
            task: Some(tokio::spawn(run(ctx))),
            samples,
        }
    }

    /// Id of the [`TrackHandle`] feeding this pump
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn samples_written(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SenderPump {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct PumpContext {
    source: TrackHandle,
    rx: broadcast::Receiver<MediaFrame>,
    cancel: CancellationToken,
    samples: Arc<AtomicU64>,
}

impl PumpContext {
    /// Next frame, or `None` once the pump should exit
    async fn next(&mut self) -> Option<MediaFrame> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                _ = self.source.wait_ended() => return None,
                result = self.rx.recv() => match result {
                    Ok(frame) => return Some(frame),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Sender for {} lagged by {} frames", self.source.label(), n);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    }

    async fn write(&self, local: &TrackLocalStaticSample, sample: Sample, throttler: &LogThrottler) {
        match local.write_sample(&sample).await {
            Ok(()) => {
                self.samples.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn_throttled!(throttler, "write_sample", "Write sample failed for {}: {}", self.source.label(), e);
            }
        }
    }
}

async fn video_loop(
    mut ctx: PumpContext,
    local: Arc<TrackLocalStaticSample>,
    encoder: Box<dyn VideoEncoder>,
    frame_duration: Duration,
) {
    let throttler = LogThrottler::default();
    let mut encoder = Some(encoder);
    let mut was_enabled = true;

    while let Some(frame) = ctx.next().await {
        let MediaFrame::Video(frame) = frame else {
            continue;
        };
        if !ctx.source.is_enabled() {
            was_enabled = false;
            continue;
        }
        let Some(mut enc) = encoder.take() else {
            break;
        };
        if !was_enabled {
            enc.request_keyframe();
            was_enabled = true;
        }

        let joined = tokio::task::spawn_blocking(move || {
            let result = enc.encode(&frame);
            (enc, result)
        })
        .await;
        let (enc, result) = match joined {
            Ok(v) => v,
            Err(e) => {
                warn!("Encoder task failed: {}", e);
                break;
            }
        };
        encoder = Some(enc);

        match result {
            Ok(Some(encoded)) => {
                let sample = Sample {
                    data: encoded.data,
                    duration: frame_duration,
                    ..Default::default()
                };
                ctx.write(&local, sample, &throttler).await;
            }
            Ok(None) => {}
            Err(e) => {
                warn_throttled!(throttler, "encode", "Encode failed: {}", e);
            }
        }
    }
    debug!("Video pump for {} stopped", ctx.source.label());
}

async fn audio_loop(mut ctx: PumpContext, local: Arc<TrackLocalStaticSample>) {
    let throttler = LogThrottler::default();

    while let Some(frame) = ctx.next().await {
        let MediaFrame::Audio(frame) = frame else {
            continue;
        };
        if !ctx.source.is_enabled() {
            continue;
        }
        let sample = Sample {
            data: frame.data.clone(),
            duration: frame.duration(),
            ..Default::default()
        };
        ctx.write(&local, sample, &throttler).await;
    }
    debug!("Audio pump for {} stopped", ctx.source.label());
}
