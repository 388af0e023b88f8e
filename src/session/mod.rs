//! Activity session lifecycle: preconditions, creation, countdown, sampling
//! and the single end routine.

pub mod controller;
pub mod events;
pub mod policy;
pub mod recovery;
pub mod state;

pub use controller::{SessionConfig, SessionController, SessionDeps};
pub use events::{format_remaining, EndReport, EventBus, SessionEvent};
pub use policy::RolePolicy;
pub use recovery::recover_interrupted_sessions;
pub use state::{EndReason, SessionPhase, SessionState};
