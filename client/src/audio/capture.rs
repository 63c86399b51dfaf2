//! Microphone Capture Pipeline
//!
//! Device callback → shared PCM buffer → 20 ms encoder tick → capture track.
//! The cpal stream is not `Send`, so it lives on a blocking task that holds it
//! until told to stop; the encoder tick runs as a normal task and owns its
//! scratch buffers for the whole call (no per-tick allocation).

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use super::{
    opus_channels, AudioBuffer, AudioError, CHANNELS, FRAME_DURATION, FRAME_SAMPLES,
    OPUS_BUFFER_SIZE, SAMPLE_RATE,
};
use crate::error::ClientError;

/// Capture microphone audio and write encoded 20 ms samples to the track
/// until cancelled. Device and codec failures during startup are fatal.
pub async fn run(
    token: CancellationToken,
    track: Arc<TrackLocalStaticSample>,
) -> Result<(), ClientError> {
    let pcm = Arc::new(AudioBuffer::new());

    let (stop_tx, stop_rx) = mpsc::channel::<()>(1);
    let (ready_tx, ready_rx) = oneshot::channel();
    let pcm_device = pcm.clone();
    let device_task = tokio::task::spawn_blocking(move || {
        run_device_task(pcm_device, ready_tx, stop_rx);
    });

    // wait for the device before touching the encoder; a failed microphone
    // aborts the call rather than degrading to receive-only
    match ready_rx.await {
        Ok(Ok(())) => info!("capture device started"),
        Ok(Err(e)) => return Err(ClientError::media(e)),
        Err(_) => return Err(ClientError::media(AudioError::DeviceGone)),
    }

    let result = encode_loop(&token, &track, &pcm).await;

    // stop the tick loop first, then release the device
    let _ = stop_tx.send(()).await;
    let _ = device_task.await;
    debug!("capture device released");

    result
}

/// The 20 ms producer tick: extract one frame if a full one is queued, encode
/// it, and hand it to the track. A tick with insufficient data is a drop; the
/// receiver's decoder conceals the gap.
async fn encode_loop(
    token: &CancellationToken,
    track: &TrackLocalStaticSample,
    pcm: &AudioBuffer,
) -> Result<(), ClientError> {
    let mut encoder = opus::Encoder::new(SAMPLE_RATE, opus_channels(), opus::Application::Voip)
        .map_err(|e| ClientError::media(AudioError::Encoder(e)))?;

    let mut frame = vec![0i16; FRAME_SAMPLES];
    let mut encoded = vec![0u8; OPUS_BUFFER_SIZE];

    let mut ticker = tokio::time::interval(FRAME_DURATION);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = token.cancelled() => return Ok(()),
            _ = ticker.tick() => {
                if !pcm.take_exact(&mut frame) {
                    continue; // wait for more data
                }

                let bytes = match encoder.encode(&frame, &mut encoded) {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(error = %e, "opus encode failed, dropping frame");
                        continue;
                    }
                };

                let sample = Sample {
                    data: bytes::Bytes::copy_from_slice(&encoded[..bytes]),
                    duration: FRAME_DURATION,
                    ..Default::default()
                };
                if let Err(e) = track.write_sample(&sample).await {
                    warn!(error = %e, "writing sample to track");
                }
            }
        }
    }
}

/// Owns the cpal input stream for its whole lifetime. The data callback runs
/// on a cpal-managed thread and appends converted samples to the shared
/// buffer under its mutex.
fn run_device_task(
    pcm: Arc<AudioBuffer>,
    ready: oneshot::Sender<Result<(), AudioError>>,
    mut stop: mpsc::Receiver<()>,
) {
    let stream = match build_input_stream(&pcm) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready.send(Err(AudioError::Stream(e.to_string())));
        return;
    }
    let _ = ready.send(Ok(()));

    let _ = stop.blocking_recv();
    drop(stream);
}

fn build_input_stream(pcm: &Arc<AudioBuffer>) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(AudioError::NoInputDevice)?;

    let config = StreamConfig {
        channels: CHANNELS,
        sample_rate: SampleRate(SAMPLE_RATE),
        buffer_size: BufferSize::Default,
    };

    let pcm = pcm.clone();
    let mut scratch: Vec<i16> = Vec::with_capacity(FRAME_SAMPLES * 2);
    device
        .build_input_stream(
            &config,
            move |data: &[f32], _| {
                scratch.clear();
                scratch.extend(
                    data.iter()
                        .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16),
                );
                pcm.extend(&scratch);
            },
            |err| {
                error!(error = %err, "capture stream error");
            },
            None,
        )
        .map_err(|e| AudioError::Stream(e.to_string()))
}
