use std::sync::Arc;

use async_trait::async_trait;
use image::RgbImage;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CaptureError {
    #[error("{0}")]
    PermissionDenied(String),
    #[error("{0}")]
    DeviceUnavailable(String),
    #[error("video track has been stopped")]
    TrackEnded,
    #[error("frame unavailable: {0}")]
    Frame(String),
}

/// One live video track. `grab_frame` returns the current frame at the
/// track's native resolution.
pub trait VideoTrack: Send + Sync {
    fn label(&self) -> &str;
    fn grab_frame(&self) -> Result<RgbImage, CaptureError>;
    /// Stops the track. Calling it twice is harmless.
    fn stop(&self);
    fn is_live(&self) -> bool;
}

#[async_trait]
pub trait CaptureDevice: Send + Sync {
    fn name(&self) -> &str;
    async fn open(&self) -> Result<CaptureStream, CaptureError>;
}

/// Live camera handle made of one or more tracks.
pub struct CaptureStream {
    id: String,
    tracks: Vec<Arc<dyn VideoTrack>>,
}

impl CaptureStream {
    pub fn new(tracks: Vec<Arc<dyn VideoTrack>>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// The first track is the one rendered and sampled.
    pub fn surface(&self) -> Option<VideoSurface> {
        self.tracks.first().map(|track| VideoSurface {
            track: Arc::clone(track),
        })
    }

    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(|track| track.is_live())
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Read-only view of the stream used for frame grabbing.
#[derive(Clone)]
pub struct VideoSurface {
    track: Arc<dyn VideoTrack>,
}

impl VideoSurface {
    pub fn grab(&self) -> Result<RgbImage, CaptureError> {
        if !self.track.is_live() {
            return Err(CaptureError::TrackEnded);
        }
        self.track.grab_frame()
    }

    pub fn label(&self) -> &str {
        self.track.label()
    }
}
