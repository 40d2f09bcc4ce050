//! Dedicated audio I/O thread.
//!
//! `cpal::Stream` is `!Send` on some platforms, so both streams are confined
//! to one OS thread and controlled through commands. The streams' callbacks
//! talk to the engine through the `Send + Sync` [`CaptureBridge`] and
//! [`PlayerHandle`]; this thread only opens and closes them.

use std::sync::mpsc;
use std::thread;

use cpal::Stream;
use tracing::{debug, warn};

use super::capture::{self, CaptureBridge};
use super::devices;
use super::playback::{self, PlayerHandle};
use crate::error::EngineError;

enum AudioCommand {
    StartCapture {
        device: Option<usize>,
        reply: mpsc::Sender<Result<(), EngineError>>,
    },
    StopCapture,
    StartPlayback {
        device: Option<usize>,
        virtual_device_name: Option<String>,
        reply: mpsc::Sender<Result<(), EngineError>>,
    },
    StopPlayback,
    Shutdown,
}

/// `Send + Sync` proxy for the audio thread.
pub struct AudioIoHandle {
    cmd_tx: mpsc::Sender<AudioCommand>,
    thread: Option<thread::JoinHandle<()>>,
}

impl AudioIoHandle {
    /// Spawn the audio thread. Streams are opened later via the start
    /// commands so device errors surface per operation.
    pub fn spawn(bridge: CaptureBridge, player: PlayerHandle) -> Result<Self, EngineError> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<AudioCommand>();

        let thread = thread::Builder::new()
            .name("voicebridge-audio".into())
            .spawn(move || run(bridge, player, cmd_rx))
            .map_err(|e| EngineError::Device(format!("failed to spawn audio thread: {e}")))?;

        Ok(Self {
            cmd_tx,
            thread: Some(thread),
        })
    }

    /// Open the capture stream on the given device (or the default).
    pub fn start_capture(&self, device: Option<usize>) -> Result<(), EngineError> {
        let (reply, rx) = mpsc::channel();
        self.cmd_tx
            .send(AudioCommand::StartCapture { device, reply })
            .map_err(|_| EngineError::AudioThreadDied)?;
        rx.recv().map_err(|_| EngineError::AudioThreadDied)?
    }

    pub fn stop_capture(&self) {
        let _ = self.cmd_tx.send(AudioCommand::StopCapture);
    }

    /// Open the playback stream on the given device (or the default).
    pub fn start_playback(
        &self,
        device: Option<usize>,
        virtual_device_name: Option<String>,
    ) -> Result<(), EngineError> {
        let (reply, rx) = mpsc::channel();
        self.cmd_tx
            .send(AudioCommand::StartPlayback {
                device,
                virtual_device_name,
                reply,
            })
            .map_err(|_| EngineError::AudioThreadDied)?;
        rx.recv().map_err(|_| EngineError::AudioThreadDied)?
    }

    pub fn stop_playback(&self) {
        let _ = self.cmd_tx.send(AudioCommand::StopPlayback);
    }
}

impl Drop for AudioIoHandle {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(AudioCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("audio thread panicked during shutdown");
            }
        }
    }
}

/// Audio thread body: owns the streams for their whole lifetime.
fn run(bridge: CaptureBridge, player: PlayerHandle, cmd_rx: mpsc::Receiver<AudioCommand>) {
    use cpal::traits::StreamTrait;

    let mut capture_stream: Option<Stream> = None;
    let mut playback_stream: Option<Stream> = None;

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            AudioCommand::StartCapture { device, reply } => {
                let result = devices::input_device(device)
                    .and_then(|device| capture::build_stream(&device, bridge.clone()))
                    .and_then(|stream| {
                        stream
                            .play()
                            .map_err(|e| EngineError::Device(e.to_string()))?;
                        Ok(stream)
                    });
                let _ = reply.send(match result {
                    Ok(stream) => {
                        capture_stream = Some(stream);
                        Ok(())
                    }
                    Err(e) => Err(e),
                });
            }

            AudioCommand::StopCapture => {
                capture_stream = None;
                debug!("capture stream closed");
            }

            AudioCommand::StartPlayback {
                device,
                virtual_device_name,
                reply,
            } => {
                let result = devices::output_device(device)
                    .and_then(|device| {
                        playback::build_stream(&device, player.clone(), virtual_device_name.as_deref())
                    })
                    .and_then(|stream| {
                        stream
                            .play()
                            .map_err(|e| EngineError::Device(e.to_string()))?;
                        Ok(stream)
                    });
                let _ = reply.send(match result {
                    Ok(stream) => {
                        playback_stream = Some(stream);
                        Ok(())
                    }
                    Err(e) => Err(e),
                });
            }

            AudioCommand::StopPlayback => {
                playback_stream = None;
                debug!("playback stream closed");
            }

            AudioCommand::Shutdown => break,
        }
    }

    // Streams drop here, on the thread that created them.
    drop(capture_stream);
    drop(playback_stream);
    debug!("audio thread shut down");
}
