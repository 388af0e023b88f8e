mod activity;
mod emotion;
mod session;

pub use activity::{Activity, SubjectRef};
pub use emotion::{EmotionObservation, EmotionResult, NOT_DETECTED_LABEL};
pub use session::{parse_backend_timestamp, ActivitySession, SessionHandle};
