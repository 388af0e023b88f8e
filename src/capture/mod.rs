//! Camera acquisition and release.
//!
//! A [`CaptureStream`] is owned by exactly one [`CaptureManager`]; the frame
//! sampler only sees a [`VideoSurface`] borrowed from it.

mod device;
mod manager;
mod replay;
#[cfg(feature = "webcam")]
mod webcam;

pub use device::{CaptureDevice, CaptureError, CaptureStream, VideoSurface, VideoTrack};
pub use manager::CaptureManager;
pub use replay::ReplayCamera;
#[cfg(feature = "webcam")]
pub use webcam::WebcamDevice;
