//! Audio playback for the receiving side
//!
//! Mirror of [`super::capture`]: the output stream asks the session to fill
//! all channels of every device period in one call.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::device::{self, AudioDevice};
use crate::error::AudioError;
use crate::session::StreamSession;

/// Output stream drained from a receiving session
pub struct AudioPlayback {
    session: StreamSession,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<AudioError>>,
}

impl AudioPlayback {
    pub fn new(session: StreamSession) -> Self {
        Self {
            session,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            error_rx: None,
        }
    }

    /// Open the default output device and start playback
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = device::default_output_device()?;
        tracing::info!("Playing to {}", device.name);

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        self.error_rx = Some(error_rx);
        self.running.store(true, Ordering::SeqCst);

        let session = self.session.clone();
        let running = self.running.clone();

        let handle = thread::Builder::new()
            .name("audio-playback".into())
            .spawn(move || {
                let stream = match build_stream(device, &session, &running, &error_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::error!("Failed to build output stream: {}", e);
                        let _ = error_tx.try_send(e);
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    tracing::error!("Failed to start output stream: {}", e);
                    let _ = error_tx.try_send(AudioError::StreamError(e.to_string()));
                    return;
                }

                while running.load(Ordering::Relaxed) {
                    thread::sleep(std::time::Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_stream(
    device: AudioDevice,
    session: &StreamSession,
    running: &Arc<AtomicBool>,
    error_tx: &Sender<AudioError>,
) -> Result<cpal::Stream, AudioError> {
    let config = session.config();
    let device = device.into_inner();
    let channels = config.channels as usize;

    let open = |fixed_buffer: bool| {
        let session = session.clone();
        let running = running.clone();
        let error_tx = error_tx.clone();
        let mut channel_buffers: Vec<Vec<f32>> = (0..channels)
            .map(|_| Vec::with_capacity(config.frame_size))
            .collect();

        device.build_output_stream(
            &device::stream_config(config, fixed_buffer),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if !running.load(Ordering::Relaxed) {
                    data.fill(0.0);
                    return;
                }
                let frames = data.len() / channels.max(1);
                for buffer in channel_buffers.iter_mut() {
                    buffer.resize(frames, 0.0);
                }
                session.process_output(channel_buffers.as_mut_slice());
                device::interleave(&channel_buffers, data);
            },
            move |err| {
                let _ = error_tx.try_send(AudioError::DeviceUnavailable(err.to_string()));
            },
            None,
        )
    };

    match open(true) {
        Ok(stream) => Ok(stream),
        Err(e) => {
            tracing::warn!(
                "Fixed {}-sample buffer rejected ({}), using device default",
                config.frame_size,
                e
            );
            open(false).map_err(|e| AudioError::StreamError(e.to_string()))
        }
    }
}
