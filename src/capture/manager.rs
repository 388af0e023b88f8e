use std::sync::Arc;

use log::{info, warn};

use super::{CaptureDevice, CaptureError, CaptureStream, VideoSurface};

/// Holds at most one stream. `release` is the single cleanup routine for
/// every exit path.
pub struct CaptureManager {
    device: Arc<dyn CaptureDevice>,
    stream: Option<CaptureStream>,
    acquisitions: u64,
    releases: u64,
}

impl CaptureManager {
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        Self {
            device,
            stream: None,
            acquisitions: 0,
            releases: 0,
        }
    }

    /// Opens the device unless a live stream is already held, in which case
    /// that stream is returned untouched. A held stream whose tracks died is
    /// released before the device is opened again.
    pub async fn acquire(&mut self) -> Result<&CaptureStream, CaptureError> {
        let held_live = self.stream.as_ref().map(CaptureStream::is_live);
        match held_live {
            Some(true) => {}
            Some(false) => {
                warn!("Held capture stream is no longer live; releasing before reacquiring");
                self.release();
                self.open_stream().await?;
            }
            None => self.open_stream().await?,
        }

        self.stream
            .as_ref()
            .ok_or_else(|| CaptureError::DeviceUnavailable("capture stream missing".into()))
    }

    async fn open_stream(&mut self) -> Result<(), CaptureError> {
        let stream = self.device.open().await?;
        info!(
            "Camera '{}' acquired (stream {}, {} track(s))",
            self.device.name(),
            stream.id(),
            stream.track_count()
        );
        self.acquisitions += 1;
        self.stream = Some(stream);
        Ok(())
    }

    /// Stops every track of the held stream. Returns false when nothing was
    /// held.
    pub fn release(&mut self) -> bool {
        match self.stream.take() {
            Some(stream) => {
                stream.stop_all();
                self.releases += 1;
                info!("Camera stream {} released", stream.id());
                true
            }
            None => false,
        }
    }

    pub fn surface(&self) -> Option<VideoSurface> {
        self.stream.as_ref().and_then(CaptureStream::surface)
    }

    pub fn acquisitions(&self) -> u64 {
        self.acquisitions
    }

    pub fn releases(&self) -> u64 {
        self.releases
    }
}
