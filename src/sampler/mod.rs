mod controller;
mod encode;
mod loop_worker;
mod stats;

pub use controller::SamplerController;
pub use encode::{encode_jpeg, EncodedFrame, DEFAULT_JPEG_QUALITY};
pub use loop_worker::{FrameReport, SamplingContext, DEFAULT_CAPTURE_INTERVAL};
pub use stats::{SamplerCounters, SamplerStats};
