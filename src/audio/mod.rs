pub mod buffer;
pub mod capture;
pub mod codec;
pub mod playback;
pub mod resample;

use crossbeam_channel::Receiver;

use crate::config::AudioConfig;
use crate::error::Result;
use crate::session::events::{EventSender, SessionEvent};

use self::buffer::FrameAccumulator;
use self::capture::MicrophoneCapture;
use self::codec::PlayableBuffer;
use self::playback::Speaker;
use self::resample::Resampler;

/// Microphone capture rate expected by the remote peer.
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Rate of the PCM chunks the remote peer sends back.
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// MIME descriptor attached to every outbound audio chunk.
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Playback side of the audio hardware, driven by an output clock.
pub trait OutputSink {
    /// Current output clock reading in seconds. Never decreases.
    fn current_time(&self) -> f64;

    /// Queue `buffer` to start exactly at `start_time` on the output clock.
    fn schedule(&mut self, buffer: PlayableBuffer, start_time: f64);

    /// Start (or un-suspend) the output clock.
    fn resume(&mut self) -> Result<()>;

    /// Stop output and drop anything still queued.
    fn close(&mut self);
}

/// Capture side of the audio hardware.
pub trait Microphone {
    /// Begin delivering fixed-size 16kHz mono frames as [`SessionEvent::FrameCaptured`].
    fn start(&mut self, frames: EventSender) -> Result<()>;

    /// Stop capture. Safe to call more than once.
    fn stop(&mut self);
}

/// Acquires audio hardware for a session.
pub trait AudioDevices {
    fn open_output(&mut self) -> Result<Box<dyn OutputSink>>;
    fn open_microphone(&mut self) -> Result<Box<dyn Microphone>>;
}

/// [`AudioDevices`] backed by the default cpal host.
pub struct CpalDevices {
    config: AudioConfig,
}

impl CpalDevices {
    #[must_use]
    pub const fn new(config: AudioConfig) -> Self {
        Self { config }
    }
}

impl AudioDevices for CpalDevices {
    fn open_output(&mut self) -> Result<Box<dyn OutputSink>> {
        Ok(Box::new(Speaker::new(&self.config)?))
    }

    fn open_microphone(&mut self) -> Result<Box<dyn Microphone>> {
        Ok(Box::new(MicrophoneCapture::new(&self.config)?))
    }
}

/// Runs the capture pipeline in a dedicated thread: raw device samples →
/// mono 16kHz → fixed-size frames → session events.
pub(crate) fn spawn_frame_pipeline(
    raw_rx: Receiver<Vec<f32>>,
    sample_rate: u32,
    channels: u16,
    frame_size: usize,
    events: EventSender,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut resampler = match Resampler::new(sample_rate, INPUT_SAMPLE_RATE, channels) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("failed to create resampler: {e}");
                return;
            }
        };

        tracing::debug!(
            "capture pipeline: source_rate={sample_rate}, channels={channels}, frame={frame_size}"
        );

        let mut accumulator = FrameAccumulator::new(frame_size);

        while let Ok(raw_samples) = raw_rx.recv() {
            let mono_16k = match resampler.process(&raw_samples) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("resample error: {e}");
                    continue;
                }
            };

            for frame in accumulator.feed(&mono_16k) {
                if !events.send(SessionEvent::FrameCaptured(frame)) {
                    tracing::debug!("event loop gone, stopping capture pipeline");
                    return;
                }
            }
        }

        tracing::debug!(
            "capture pipeline thread exiting, {} samples discarded",
            accumulator.pending()
        );
    })
}
