//! Physical camera backend built on `nokhwa`.
//!
//! Camera handles are not `Send` on every platform, so each stream gets its
//! own worker thread that owns the device; tracks talk to it over a channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

use async_trait::async_trait;
use image::RgbImage;
use log::{error, info};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::{Camera, NokhwaError};

use super::{CaptureDevice, CaptureError, CaptureStream, VideoTrack};

enum CameraCommand {
    Grab(mpsc::Sender<Result<RgbImage, CaptureError>>),
    Shutdown,
}

pub struct WebcamDevice {
    index: u32,
    name: String,
}

impl WebcamDevice {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            name: format!("webcam:{index}"),
        }
    }
}

#[async_trait]
impl CaptureDevice for WebcamDevice {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self) -> Result<CaptureStream, CaptureError> {
        let index = self.index;
        let label = self.name.clone();
        let track = tokio::task::spawn_blocking(move || WebcamTrack::spawn(index, label))
            .await
            .map_err(|err| CaptureError::DeviceUnavailable(format!("camera worker join failed: {err}")))??;

        Ok(CaptureStream::new(vec![Arc::new(track)]))
    }
}

struct WebcamTrack {
    label: String,
    sender: mpsc::Sender<CameraCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
    live: AtomicBool,
}

impl WebcamTrack {
    fn spawn(index: u32, label: String) -> Result<Self, CaptureError> {
        let (command_tx, command_rx) = mpsc::channel::<CameraCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name(format!("emosense-camera-{index}"))
            .spawn(move || {
                let requested =
                    RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
                let mut camera = match Camera::new(CameraIndex::Index(index), requested)
                    .and_then(|mut camera| camera.open_stream().map(|_| camera))
                {
                    Ok(camera) => camera,
                    Err(err) => {
                        let _ = ready_tx.send(Err(map_open_error(err)));
                        return;
                    }
                };

                if ready_tx.send(Ok(())).is_err() {
                    let _ = camera.stop_stream();
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        CameraCommand::Grab(reply) => {
                            let frame = camera
                                .frame()
                                .and_then(|buffer| buffer.decode_image::<RgbFormat>())
                                .map_err(|err| CaptureError::Frame(err.to_string()))
                                .and_then(|decoded| {
                                    let (width, height) = (decoded.width(), decoded.height());
                                    RgbImage::from_raw(width, height, decoded.into_raw()).ok_or_else(
                                        || CaptureError::Frame("frame buffer size mismatch".into()),
                                    )
                                });
                            let _ = reply.send(frame);
                        }
                        CameraCommand::Shutdown => break,
                    }
                }

                if let Err(err) = camera.stop_stream() {
                    error!("Failed to stop camera stream: {err}");
                }
                info!("Camera worker {index} shutting down");
            })
            .map_err(|err| CaptureError::DeviceUnavailable(format!("failed to spawn camera worker: {err}")))?;

        ready_rx
            .recv()
            .map_err(|_| CaptureError::DeviceUnavailable("camera worker exited before signaling readiness".into()))??;

        Ok(Self {
            label,
            sender: command_tx,
            worker: Mutex::new(Some(worker)),
            live: AtomicBool::new(true),
        })
    }
}

fn map_open_error(err: NokhwaError) -> CaptureError {
    let message = err.to_string();
    if message.to_ascii_lowercase().contains("permission") {
        CaptureError::PermissionDenied(message)
    } else {
        CaptureError::DeviceUnavailable(message)
    }
}

impl VideoTrack for WebcamTrack {
    fn label(&self) -> &str {
        &self.label
    }

    fn grab_frame(&self) -> Result<RgbImage, CaptureError> {
        if !self.is_live() {
            return Err(CaptureError::TrackEnded);
        }
        let (reply_tx, reply_rx) = mpsc::channel();
        self.sender
            .send(CameraCommand::Grab(reply_tx))
            .map_err(|_| CaptureError::TrackEnded)?;
        reply_rx.recv().map_err(|_| CaptureError::TrackEnded)?
    }

    fn stop(&self) {
        if !self.live.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.sender.send(CameraCommand::Shutdown);

        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = guard.take() {
            if let Err(join_err) = handle.join() {
                error!("Failed to join camera worker: {join_err:?}");
            }
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

impl Drop for WebcamTrack {
    fn drop(&mut self) {
        self.stop();
    }
}
