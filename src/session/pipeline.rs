use std::sync::Arc;

use crate::audio::{INPUT_MIME_TYPE, codec};
use crate::error::Result;
use crate::net::TransportHandle;
use crate::net::protocol::MediaBlob;

/// What happened to one captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Sent,
    /// No open transport yet (or any more); the frame was discarded.
    Dropped,
}

/// Level metering, encoding and forwarding for captured microphone frames.
#[derive(Default)]
pub struct CapturePipeline {
    transport: Option<Arc<dyn TransportHandle>>,
    sent: u64,
    dropped: u64,
}

impl CapturePipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start forwarding frames to `transport`.
    pub fn attach(&mut self, transport: Arc<dyn TransportHandle>) {
        self.transport = Some(transport);
    }

    pub fn detach(&mut self) {
        if self.transport.take().is_some() {
            tracing::debug!(
                "capture detached: {} frames sent, {} dropped",
                self.sent,
                self.dropped
            );
        }
    }

    /// Report the frame's level, then encode and send it.
    ///
    /// A send failure is returned to the caller; the pipeline stays attached.
    pub fn process_frame<F>(&mut self, frame: &[f32], on_level: F) -> Result<FrameOutcome>
    where
        F: FnOnce(f32),
    {
        on_level(rms(frame));

        let Some(ref transport) = self.transport else {
            self.dropped += 1;
            tracing::debug!("no open transport, dropping {}-sample frame", frame.len());
            return Ok(FrameOutcome::Dropped);
        };

        let media = MediaBlob {
            mime_type: INPUT_MIME_TYPE.to_string(),
            data: codec::to_wire_bytes(&codec::encode(frame)),
        };
        transport.send_realtime_input(media)?;
        self.sent += 1;
        Ok(FrameOutcome::Sent)
    }

    #[must_use]
    pub const fn frames_sent(&self) -> u64 {
        self.sent
    }

    #[must_use]
    pub const fn frames_dropped(&self) -> u64 {
        self.dropped
    }
}

/// Root-mean-square amplitude of `frame`, clamped to [0, 1].
#[must_use]
pub fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: f64 = frame.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    ((sum / frame.len() as f64).sqrt() as f32).clamp(0.0, 1.0)
}
