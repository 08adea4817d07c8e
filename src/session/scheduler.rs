use crate::audio::codec::{self, PlayableBuffer};
use crate::audio::{OUTPUT_SAMPLE_RATE, OutputSink};
use crate::error::Result;

/// Where and for how long a chunk was placed on the output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub start_time: f64,
    pub duration: f64,
}

/// Chains inbound audio chunks back to back on the output clock.
///
/// Each chunk starts where the previous one ended, unless the clock has
/// already passed that point, in which case it starts immediately.
#[derive(Debug, Clone, Default)]
pub struct PlaybackScheduler {
    next_start_time: f64,
}

impl PlaybackScheduler {
    #[must_use]
    pub const fn new(clock_now: f64) -> Self {
        Self {
            next_start_time: clock_now,
        }
    }

    #[must_use]
    pub const fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Decode a base64 PCM chunk and schedule it on `sink`.
    ///
    /// A chunk that fails to decode is logged and skipped; playback of later
    /// chunks is unaffected.
    pub fn enqueue(&mut self, data: &str, sink: &mut dyn OutputSink) -> Option<ScheduledChunk> {
        match decode_chunk(data) {
            Ok(buffer) => Some(self.schedule(buffer, sink)),
            Err(e) => {
                tracing::warn!("skipping inbound audio chunk: {e}");
                None
            }
        }
    }

    /// Schedule an already decoded buffer.
    pub fn schedule(
        &mut self,
        buffer: PlayableBuffer,
        sink: &mut dyn OutputSink,
    ) -> ScheduledChunk {
        let duration = buffer.duration();
        let start_time = self.plan(duration, sink.current_time());
        sink.schedule(buffer, start_time);
        tracing::debug!("scheduled {duration:.3}s of audio at {start_time:.3}s");
        ScheduledChunk {
            start_time,
            duration,
        }
    }

    /// Pick a start time for a chunk of `duration` seconds and advance the cursor.
    pub fn plan(&mut self, duration: f64, clock_now: f64) -> f64 {
        let start_time = self.next_start_time.max(clock_now);
        self.next_start_time = start_time + duration;
        start_time
    }
}

fn decode_chunk(data: &str) -> Result<PlayableBuffer> {
    let raw = codec::from_wire_bytes(data)?;
    codec::decode(&raw, OUTPUT_SAMPLE_RATE, 1)
}
