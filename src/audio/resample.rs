use audioadapter_buffers::direct::SequentialSliceOfVecs;
use rubato::audioadapter::Adapter;
use rubato::{Fft, FixedSync, Resampler as RubatoResampler};

use crate::error::{LifelineError, Result};

/// Mixes interleaved device audio down to mono and resamples it to a fixed target rate.
pub struct Resampler {
    inner: Option<Fft<f32>>,
    channels: u16,
    input_buf: Vec<f32>,
}

impl Resampler {
    pub fn new(source_rate: u32, target_rate: u32, channels: u16) -> Result<Self> {
        let chunk_size = 1024;

        let inner = if source_rate == target_rate {
            None
        } else {
            Some(
                Fft::new(
                    source_rate as usize,
                    target_rate as usize,
                    chunk_size,
                    2, // sub_chunks
                    1, // mono out
                    FixedSync::Input,
                )
                .map_err(|e| {
                    LifelineError::Acquisition(format!("failed to create resampler: {e}"))
                })?,
            )
        };

        Ok(Self {
            inner,
            channels: channels.max(1),
            input_buf: Vec::new(),
        })
    }

    /// Process interleaved multi-channel samples into mono at the target rate.
    pub fn process(&mut self, interleaved: &[f32]) -> Result<Vec<f32>> {
        let mono = downmix(interleaved, self.channels);

        let Some(ref mut resampler) = self.inner else {
            return Ok(mono);
        };

        self.input_buf.extend_from_slice(&mono);

        let mut output = Vec::new();
        let frames_needed = resampler.input_frames_next();

        while self.input_buf.len() >= frames_needed {
            let chunk: Vec<f32> = self.input_buf.drain(..frames_needed).collect();
            let input_data = vec![chunk];
            let input_buf = SequentialSliceOfVecs::new(&input_data, 1, frames_needed)
                .map_err(|e| LifelineError::Other(format!("resample buffer error: {e}")))?;
            let result = resampler
                .process(&input_buf, 0, None)
                .map_err(|e| LifelineError::Other(format!("resample error: {e}")))?;
            for frame in 0..result.frames() {
                output.push(result.read_sample(0, frame).unwrap_or(0.0));
            }
        }

        Ok(output)
    }
}

fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels == 1 {
        return interleaved.to_vec();
    }

    let ch = channels as usize;
    interleaved
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}
