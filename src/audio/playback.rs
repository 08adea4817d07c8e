use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};

use crate::config::AudioConfig;
use crate::error::{LifelineError, Result};

use super::OutputSink;
use super::capture::{device_name, find_device};
use super::codec::PlayableBuffer;

/// A buffer pinned to a device-frame range on the output clock.
#[derive(Debug)]
struct Scheduled {
    start_frame: u64,
    end_frame: u64,
    buffer: PlayableBuffer,
}

impl Scheduled {
    /// Linearly interpolated source sample for device frame `pos`, output channel `channel`.
    fn sample_at(&self, pos: u64, channel: usize, device_rate: u32) -> f32 {
        let src_channels = usize::from(self.buffer.channels.max(1));
        let frames = self.buffer.frames();
        let offset = pos.saturating_sub(self.start_frame);
        let src_pos =
            offset as f64 * f64::from(self.buffer.sample_rate) / f64::from(device_rate);
        let index = src_pos.floor() as usize;
        if index >= frames {
            return 0.0;
        }

        let frac = (src_pos - src_pos.floor()) as f32;
        let ch = channel % src_channels;
        let s0 = self.buffer.samples[index * src_channels + ch];
        let s1 = if index + 1 < frames {
            self.buffer.samples[(index + 1) * src_channels + ch]
        } else {
            s0
        };
        s0 + (s1 - s0) * frac
    }
}

/// Renders scheduled buffers against a frame-counting output clock.
///
/// The clock is the number of device frames rendered so far; it only moves
/// when the device pulls audio.
#[derive(Debug)]
pub struct ScheduleMixer {
    device_rate: u32,
    channels: u16,
    position: u64,
    queue: VecDeque<Scheduled>,
}

impl ScheduleMixer {
    #[must_use]
    pub fn new(device_rate: u32, channels: u16) -> Self {
        Self {
            device_rate: device_rate.max(1),
            channels: channels.max(1),
            position: 0,
            queue: VecDeque::new(),
        }
    }

    /// Output clock in seconds.
    #[must_use]
    pub fn current_time(&self) -> f64 {
        self.position as f64 / f64::from(self.device_rate)
    }

    /// Queue `buffer` at `start_time`.
    ///
    /// A buffer that would start behind the clock, or inside the buffer queued
    /// before it, is delayed until that point so it still plays from its first
    /// sample. The delay carries over to buffers chained after it.
    pub fn schedule(&mut self, buffer: PlayableBuffer, start_time: f64) {
        let rate = f64::from(self.device_rate);
        let start_time = start_time.max(0.0);
        let start_frame = (start_time * rate).round() as u64;
        let end_frame = ((start_time + buffer.duration()) * rate).round() as u64;
        if end_frame <= start_frame {
            return;
        }

        let earliest = self
            .queue
            .back()
            .map_or(self.position, |tail| tail.end_frame.max(self.position));
        let delay = earliest.saturating_sub(start_frame);
        if delay > 0 {
            tracing::debug!("output buffer delayed by {delay} frames");
        }

        let entry = Scheduled {
            start_frame: start_frame + delay,
            end_frame: end_frame + delay,
            buffer,
        };
        let start_frame = entry.start_frame;
        let at = self.queue.partition_point(|q| q.start_frame <= start_frame);
        self.queue.insert(at, entry);
    }

    /// Fill an interleaved device buffer and advance the clock.
    pub fn render(&mut self, out: &mut [f32]) {
        let channels = usize::from(self.channels);
        for frame in out.chunks_mut(channels) {
            let pos = self.position;
            while self.queue.front().is_some_and(|q| q.end_frame <= pos) {
                self.queue.pop_front();
            }

            match self.queue.front() {
                Some(current) if current.start_frame <= pos => {
                    for (ch, slot) in frame.iter_mut().enumerate() {
                        *slot = current.sample_at(pos, ch, self.device_rate);
                    }
                }
                _ => frame.fill(0.0),
            }

            self.position += 1;
        }
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Buffers scheduled but not yet fully played.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

/// Speaker output via cpal, exposing its rendered-frame count as the output clock.
pub struct Speaker {
    stream: Option<Stream>,
    mixer: Arc<Mutex<ScheduleMixer>>,
    playing: bool,
}

impl Speaker {
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = match config.output_device {
            Some(ref name) => find_device(
                host.output_devices().map_err(|e| {
                    LifelineError::Acquisition(format!("failed to enumerate output devices: {e}"))
                })?,
                name,
            )
            .ok_or_else(|| LifelineError::Acquisition(format!("output device not found: {name}")))?,
            None => host.default_output_device().ok_or_else(|| {
                LifelineError::Acquisition("no default output device available".to_string())
            })?,
        };

        let supported = device.default_output_config().map_err(|e| {
            LifelineError::Acquisition(format!("failed to get default output config: {e}"))
        })?;

        let sample_rate = supported.sample_rate();
        let channels = supported.channels();

        let stream_config = StreamConfig {
            channels,
            sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let mixer = Arc::new(Mutex::new(ScheduleMixer::new(sample_rate, channels)));
        let render_mixer = Arc::clone(&mixer);

        let err_fn = |err: cpal::StreamError| {
            tracing::error!("output stream error: {err}");
        };

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    match render_mixer.lock() {
                        Ok(mut mixer) => mixer.render(data),
                        Err(_) => data.fill(0.0),
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| {
                LifelineError::Acquisition(format!("failed to build output stream: {e}"))
            })?;

        tracing::info!(
            "speaker opened: {} ({sample_rate} Hz, {channels} channel(s))",
            device_name(&device).unwrap_or_else(|| "unknown".to_string())
        );

        Ok(Self {
            stream: Some(stream),
            mixer,
            playing: false,
        })
    }
}

impl OutputSink for Speaker {
    fn current_time(&self) -> f64 {
        self.mixer.lock().map_or(0.0, |m| m.current_time())
    }

    fn schedule(&mut self, buffer: PlayableBuffer, start_time: f64) {
        match self.mixer.lock() {
            Ok(mut mixer) => mixer.schedule(buffer, start_time),
            Err(_) => tracing::warn!("output mixer poisoned, dropping buffer"),
        }
    }

    fn resume(&mut self) -> Result<()> {
        if self.playing {
            return Ok(());
        }
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| LifelineError::Acquisition("speaker already closed".to_string()))?;
        stream.play().map_err(|e| {
            LifelineError::Acquisition(format!("failed to start output stream: {e}"))
        })?;
        self.playing = true;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::warn!("failed to pause output stream: {e}");
            }
            drop(stream);
            tracing::debug!("speaker released");
        }
        self.playing = false;
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.clear();
        }
    }
}

impl Drop for Speaker {
    fn drop(&mut self) {
        self.close();
    }
}

/// Names of every output device the default host knows about.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.output_devices().map_err(|e| {
        LifelineError::Acquisition(format!("failed to enumerate output devices: {e}"))
    })?;
    Ok(devices.filter_map(|d| device_name(&d)).collect())
}

#[must_use]
pub fn default_output_device_name() -> Option<String> {
    cpal::default_host()
        .default_output_device()
        .and_then(|d| device_name(&d))
}
