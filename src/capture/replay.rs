use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use image::RgbImage;

use super::{CaptureDevice, CaptureError, CaptureStream, VideoTrack};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

#[derive(Clone)]
enum ReplaySource {
    Directory(PathBuf),
    Frames(Arc<Vec<RgbImage>>),
}

/// Virtual camera that loops over still images, either from a directory
/// (sorted by file name) or from frames held in memory.
pub struct ReplayCamera {
    name: String,
    source: ReplaySource,
}

impl ReplayCamera {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            name: format!("replay:{}", dir.display()),
            source: ReplaySource::Directory(dir),
        }
    }

    pub fn from_frames(frames: Vec<RgbImage>) -> Self {
        Self {
            name: "replay:memory".into(),
            source: ReplaySource::Frames(Arc::new(frames)),
        }
    }
}

#[async_trait]
impl CaptureDevice for ReplayCamera {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self) -> Result<CaptureStream, CaptureError> {
        let frames = match &self.source {
            ReplaySource::Directory(dir) => ReplayFrames::Files(list_frame_files(dir).await?),
            ReplaySource::Frames(frames) => {
                if frames.is_empty() {
                    return Err(CaptureError::DeviceUnavailable(
                        "replay camera has no frames".into(),
                    ));
                }
                ReplayFrames::Memory(Arc::clone(frames))
            }
        };

        let track: Arc<dyn VideoTrack> = Arc::new(ReplayTrack {
            label: self.name.clone(),
            frames,
            cursor: AtomicUsize::new(0),
            live: AtomicBool::new(true),
        });
        Ok(CaptureStream::new(vec![track]))
    }
}

async fn list_frame_files(dir: &Path) -> Result<Vec<PathBuf>, CaptureError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|err| map_io_error(dir, err))?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| map_io_error(dir, err))?
    {
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_image {
            files.push(path);
        }
    }

    if files.is_empty() {
        return Err(CaptureError::DeviceUnavailable(format!(
            "no frames found in {}",
            dir.display()
        )));
    }

    files.sort();
    Ok(files)
}

fn map_io_error(dir: &Path, err: std::io::Error) -> CaptureError {
    match err.kind() {
        ErrorKind::PermissionDenied => {
            CaptureError::PermissionDenied(format!("cannot read {}: {err}", dir.display()))
        }
        _ => CaptureError::DeviceUnavailable(format!("cannot open {}: {err}", dir.display())),
    }
}

enum ReplayFrames {
    Files(Vec<PathBuf>),
    Memory(Arc<Vec<RgbImage>>),
}

impl ReplayFrames {
    fn len(&self) -> usize {
        match self {
            ReplayFrames::Files(files) => files.len(),
            ReplayFrames::Memory(frames) => frames.len(),
        }
    }

    fn load(&self, index: usize) -> Result<RgbImage, CaptureError> {
        match self {
            ReplayFrames::Files(files) => image::open(&files[index])
                .map(|img| img.to_rgb8())
                .map_err(|err| {
                    CaptureError::Frame(format!("{}: {err}", files[index].display()))
                }),
            ReplayFrames::Memory(frames) => Ok(frames[index].clone()),
        }
    }
}

struct ReplayTrack {
    label: String,
    frames: ReplayFrames,
    cursor: AtomicUsize,
    live: AtomicBool,
}

impl VideoTrack for ReplayTrack {
    fn label(&self) -> &str {
        &self.label
    }

    fn grab_frame(&self) -> Result<RgbImage, CaptureError> {
        if !self.is_live() {
            return Err(CaptureError::TrackEnded);
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.frames.len();
        self.frames.load(index)
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}
