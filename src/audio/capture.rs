use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use crossbeam_channel::{Receiver, bounded};

use crate::config::AudioConfig;
use crate::error::{LifelineError, Result};
use crate::session::events::EventSender;

use super::Microphone;

/// Microphone capture via cpal.
pub struct MicrophoneCapture {
    stream: Option<Stream>,
    receiver: Receiver<Vec<f32>>,
    sample_rate: u32,
    channels: u16,
    frame_size: usize,
    pipeline: Option<JoinHandle<()>>,
}

impl MicrophoneCapture {
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = match config.input_device {
            Some(ref name) => find_device(
                host.input_devices().map_err(|e| {
                    LifelineError::Acquisition(format!("failed to enumerate input devices: {e}"))
                })?,
                name,
            )
            .ok_or_else(|| LifelineError::Acquisition(format!("input device not found: {name}")))?,
            None => host.default_input_device().ok_or_else(|| {
                LifelineError::Acquisition("no default input device available".to_string())
            })?,
        };

        let supported = device.default_input_config().map_err(|e| {
            LifelineError::Acquisition(format!("failed to get default input config: {e}"))
        })?;

        let sample_rate = supported.sample_rate();
        let channels = supported.channels();

        let stream_config = StreamConfig {
            channels,
            sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        // Bounded channel; try_send keeps the audio callback from blocking
        let (tx, rx) = bounded::<Vec<f32>>(64);

        let err_fn = |err: cpal::StreamError| {
            tracing::error!("input stream error: {err}");
        };

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    let _ = tx.try_send(data.to_vec());
                },
                err_fn,
                None,
            )
            .map_err(|e| LifelineError::Acquisition(format!("failed to build input stream: {e}")))?;

        tracing::info!("microphone opened: {sample_rate} Hz, {channels} channel(s)");

        Ok(Self {
            stream: Some(stream),
            receiver: rx,
            sample_rate,
            channels,
            frame_size: config.frame_size,
            pipeline: None,
        })
    }
}

impl Microphone for MicrophoneCapture {
    fn start(&mut self, frames: EventSender) -> Result<()> {
        let Some(ref stream) = self.stream else {
            return Err(LifelineError::Acquisition(
                "microphone already released".to_string(),
            ));
        };

        if self.pipeline.is_none() {
            self.pipeline = Some(super::spawn_frame_pipeline(
                self.receiver.clone(),
                self.sample_rate,
                self.channels,
                self.frame_size,
                frames,
            ));
        }

        stream
            .play()
            .map_err(|e| LifelineError::Acquisition(format!("failed to start input stream: {e}")))
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::warn!("failed to pause input stream: {e}");
            }
            // Dropping the stream drops the callback's sender, which ends the pipeline thread.
            drop(stream);
            tracing::debug!("microphone released");
        }
        // Detached; the thread exits once the callback's sender is gone.
        self.pipeline = None;
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

pub(crate) fn find_device(
    mut devices: impl Iterator<Item = Device>,
    name: &str,
) -> Option<Device> {
    devices.find(|d| device_name(d).as_deref() == Some(name))
}

pub(crate) fn device_name(device: &Device) -> Option<String> {
    device
        .description()
        .ok()
        .map(|desc| desc.name().to_string())
}

/// Names of every input device the default host knows about.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.input_devices().map_err(|e| {
        LifelineError::Acquisition(format!("failed to enumerate input devices: {e}"))
    })?;
    Ok(devices.filter_map(|d| device_name(&d)).collect())
}

#[must_use]
pub fn default_input_device_name() -> Option<String> {
    cpal::default_host()
        .default_input_device()
        .and_then(|d| device_name(&d))
}
