//! Audio device lookup
//!
//! Only the host's default devices are used; picking among devices is left
//! to the operating system.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::config::StreamConfig;
use crate::error::AudioError;

/// Wrapper around cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
        }
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }
}

/// Get default input device
pub fn default_input_device() -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    host.default_input_device()
        .map(AudioDevice::from_cpal)
        .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string()))
}

/// Get default output device
pub fn default_output_device() -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    host.default_output_device()
        .map(AudioDevice::from_cpal)
        .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))
}

/// cpal stream configuration for the agreed frame geometry. `fixed_buffer`
/// asks the device for exactly one frame per callback.
pub fn stream_config(config: &StreamConfig, fixed_buffer: bool) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: if fixed_buffer {
            cpal::BufferSize::Fixed(config.frame_size as u32)
        } else {
            cpal::BufferSize::Default
        },
    }
}

/// Split interleaved `data` into per-channel buffers. The buffers only grow,
/// so steady-state callbacks do not allocate.
pub fn deinterleave(data: &[f32], channels: &mut [Vec<f32>]) {
    let count = channels.len();
    if count == 0 {
        return;
    }
    let frames = data.len() / count;
    for (ch, buffer) in channels.iter_mut().enumerate() {
        buffer.resize(frames, 0.0);
        for (i, sample) in buffer.iter_mut().enumerate() {
            *sample = data[i * count + ch];
        }
    }
}

/// Inverse of [`deinterleave`]
pub fn interleave(channels: &[Vec<f32>], data: &mut [f32]) {
    let count = channels.len();
    if count == 0 {
        data.fill(0.0);
        return;
    }
    for (i, sample) in data.iter_mut().enumerate() {
        *sample = channels[i % count].get(i / count).copied().unwrap_or(0.0);
    }
}
