//! Audio Pipelines
//!
//! Capture (microphone → Opus → track) and playback (remote track → Opus →
//! speaker) built on cpal and the opus codec. Device callbacks run on
//! OS-managed threads owned by cpal; they talk to the task world only through
//! the mutex-guarded [`AudioBuffer`].

pub mod capture;
pub mod playback;

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: u16 = 2;
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Samples per channel in one 20 ms frame.
pub const FRAME_SIZE: usize = (SAMPLE_RATE as usize / 1000) * 20;

/// Total samples in one interleaved frame.
pub const FRAME_SAMPLES: usize = FRAME_SIZE * CHANNELS as usize;

/// Scratch space for one encoded Opus frame; reused across ticks.
pub const OPUS_BUFFER_SIZE: usize = 1_500;

/// Decoder scratch, sized for the longest frame Opus can emit (120 ms).
pub const PCM_BUFFER_SIZE: usize = 6 * FRAME_SAMPLES;

/// Audio errors.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no input device available")]
    NoInputDevice,

    #[error("no output device available")]
    NoOutputDevice,

    #[error("failed to build stream: {0}")]
    Stream(String),

    #[error("opus encoder error: {0}")]
    Encoder(#[from] opus::Error),

    #[error("audio device task ended before it was ready")]
    DeviceGone,
}

fn opus_channels() -> opus::Channels {
    if CHANNELS == 1 {
        opus::Channels::Mono
    } else {
        opus::Channels::Stereo
    }
}

/// An ordered queue of interleaved signed-16-bit PCM, shared between exactly
/// one producer and one consumer.
///
/// The consumer only ever takes exact sample counts: a frame for the encoder
/// tick, `frames × channels` for the output callback. If that much is not
/// queued, nothing is taken and the caller skips its turn; neither side ever
/// blocks beyond the mutex.
#[derive(Default)]
pub struct AudioBuffer {
    samples: Mutex<VecDeque<i16>>,
}

impl AudioBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(FRAME_SAMPLES * 8)),
        }
    }

    /// Append samples (producer side).
    pub fn extend(&self, samples: &[i16]) {
        self.lock().extend(samples.iter().copied());
    }

    /// Drain exactly `out.len()` samples from the head into `out`, or take
    /// nothing and return false.
    pub fn take_exact(&self, out: &mut [i16]) -> bool {
        let mut queue = self.lock();
        let len = out.len();
        if queue.len() < len {
            return false;
        }
        for (dst, sample) in out.iter_mut().zip(queue.drain(..len)) {
            *dst = sample;
        }
        true
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<i16>> {
        // neither side can panic while holding the lock
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
