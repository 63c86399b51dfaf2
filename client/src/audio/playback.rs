//! Speaker Playback Pipeline
//!
//! Remote track → RTP packet loop → Opus decode → shared PCM buffer → output
//! device callback. The packet loop for each remote track is spawned from the
//! peer connection's `on_track` event and runs until the connection closes,
//! which forces its blocking read to end-of-stream.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use tokio::sync::{mpsc, oneshot};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_remote::TrackRemote;

use super::{
    opus_channels, AudioBuffer, AudioError, CHANNELS, PCM_BUFFER_SIZE, SAMPLE_RATE,
};
use crate::error::ClientError;
use crate::peer;

/// A running playback pipeline.
///
/// Holds the device task's stop handle and the tracker joining the per-track
/// packet loops; [`Playback::shutdown`] releases everything in order.
pub struct Playback {
    stop: mpsc::Sender<()>,
    device_task: tokio::task::JoinHandle<()>,
    tracks: TaskTracker,
}

/// Initialize the output device and hook decoding onto remote tracks as the
/// peer connection produces them.
///
/// Returns immediately; device startup happens on its blocking task and a
/// failure is reported on `errors` (speaker init runs concurrently with
/// signaling, and a dead speaker must abort the call like any other fault).
pub fn start(pc: &RTCPeerConnection, errors: mpsc::Sender<ClientError>) -> Playback {
    let pcm = Arc::new(AudioBuffer::new());

    let (stop_tx, stop_rx) = mpsc::channel::<()>(1);
    let (ready_tx, ready_rx) = oneshot::channel();
    let pcm_device = pcm.clone();
    let device_task = tokio::task::spawn_blocking(move || {
        run_device_task(pcm_device, ready_tx, stop_rx);
    });

    tokio::spawn(async move {
        match ready_rx.await {
            Ok(Ok(())) => info!("playback device started"),
            Ok(Err(e)) => {
                let _ = errors.try_send(ClientError::media(e));
            }
            Err(_) => {
                let _ = errors.try_send(ClientError::media(AudioError::DeviceGone));
            }
        }
    });

    let tracks = TaskTracker::new();
    let tracker = tracks.clone();
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let pcm = pcm.clone();
        let tracker = tracker.clone();
        Box::pin(async move {
            info!(kind = %track.kind(), ssrc = track.ssrc(), "remote track");
            tracker.spawn(read_track(track, pcm));
        })
    }));

    Playback {
        stop: stop_tx,
        device_task,
        tracks,
    }
}

impl Playback {
    /// Tear down in order: close the peer connection (unblocking the packet
    /// loops with end-of-stream), join them, then release the device.
    pub async fn shutdown(self, pc: &RTCPeerConnection) {
        peer::close_peer(pc).await;

        self.tracks.close();
        self.tracks.wait().await;

        let _ = self.stop.send(()).await;
        let _ = self.device_task.await;
        debug!("playback device released");
    }
}

/// Read RTP packets from one remote track, decode, and queue PCM for the
/// device. Decode failures are transient and skipped; a read error is the
/// end of the stream.
async fn read_track(track: Arc<TrackRemote>, pcm: Arc<AudioBuffer>) {
    let mut decoder = match opus::Decoder::new(SAMPLE_RATE, opus_channels()) {
        Ok(decoder) => decoder,
        Err(e) => {
            error!(error = %e, "creating opus decoder");
            return;
        }
    };
    let mut scratch = vec![0i16; PCM_BUFFER_SIZE];

    loop {
        let (packet, _) = match track.read_rtp().await {
            Ok(read) => read,
            Err(e) => {
                debug!(error = %e, "remote track ended");
                return;
            }
        };

        let samples = match decoder.decode(&packet.payload, &mut scratch, false) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "opus decode failed, skipping packet");
                continue;
            }
        };

        pcm.extend(&scratch[..samples * CHANNELS as usize]);
    }
}

/// Owns the cpal output stream. The data callback drains exactly
/// `frames × channels` samples or writes silence; it never blocks beyond the
/// buffer mutex.
fn run_device_task(
    pcm: Arc<AudioBuffer>,
    ready: oneshot::Sender<Result<(), AudioError>>,
    mut stop: mpsc::Receiver<()>,
) {
    let stream = match build_output_stream(&pcm) {
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

fn build_output_stream(pcm: &Arc<AudioBuffer>) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::NoOutputDevice)?;

    let config = StreamConfig {
        channels: CHANNELS,
        sample_rate: SampleRate(SAMPLE_RATE),
        buffer_size: BufferSize::Default,
    };

    let pcm = pcm.clone();
    let mut scratch: Vec<i16> = Vec::new();
    device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _| {
                let len = data.len();
                if scratch.len() < len {
                    scratch.resize(len, 0);
                }
                if pcm.take_exact(&mut scratch[..len]) {
                    let scratch_slice = &scratch[..len];
                    for (dst, &sample) in data.iter_mut().zip(scratch_slice) {
                        *dst = f32::from(sample) / 32768.0;
                    }
                } else {
                    data.fill(0.0);
                }
            },
            |err| {
                error!(error = %err, "playback stream error");
            },
            None,
        )
        .map_err(|e| AudioError::Stream(e.to_string()))
}
