//! Audio capture for the sending side
//!
//! Runs the input stream on a dedicated thread and hands every device
//! period to the session as one buffer per channel.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::device::{self, AudioDevice};
use crate::error::AudioError;
use crate::session::StreamSession;

/// Input stream feeding a sending session
pub struct AudioCapture {
    session: StreamSession,

    /// Whether capture is running
    running: Arc<AtomicBool>,

    /// Stream thread handle
    thread_handle: Option<JoinHandle<()>>,

    /// Channel for stream errors
    error_rx: Option<Receiver<AudioError>>,
}

impl AudioCapture {
    pub fn new(session: StreamSession) -> Self {
        Self {
            session,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            error_rx: None,
        }
    }

    /// Open the default input device and start capturing
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = device::default_input_device()?;
        tracing::info!("Capturing from {}", device.name);

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        self.error_rx = Some(error_rx);
        self.running.store(true, Ordering::SeqCst);

        let session = self.session.clone();
        let running = self.running.clone();

        let handle = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let stream = match build_stream(device, &session, &running, &error_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::error!("Failed to build input stream: {}", e);
                        let _ = error_tx.try_send(e);
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    tracing::error!("Failed to start input stream: {}", e);
                    let _ = error_tx.try_send(AudioError::StreamError(e.to_string()));
                    return;
                }

                // Keep thread alive while running
                while running.load(Ordering::Relaxed) {
                    thread::sleep(std::time::Duration::from_millis(10));
                }

                // Stream is dropped here, stopping capture
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    /// Check for errors
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioCapture {
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

        device.build_input_stream(
            &device::stream_config(config, fixed_buffer),
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                device::deinterleave(data, &mut channel_buffers);
                session.process_input(channel_buffers.as_slice());
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
