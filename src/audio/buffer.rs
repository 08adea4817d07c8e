/// Cuts a continuous 16kHz mono stream into fixed-size capture frames.
pub struct FrameAccumulator {
    buffer: Vec<f32>,
    frame_size: usize,
}

impl FrameAccumulator {
    #[must_use]
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            buffer: Vec::with_capacity(frame_size),
            frame_size,
        }
    }

    /// Feed samples and return any complete frames, oldest first.
    pub fn feed(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.buffer.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.buffer.len() >= self.frame_size {
            let rest = self.buffer.split_off(self.frame_size);
            frames.push(std::mem::replace(&mut self.buffer, rest));
        }

        frames
    }

    /// Samples waiting for the next frame to fill.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub const fn frame_size(&self) -> usize {
        self.frame_size
    }
}
