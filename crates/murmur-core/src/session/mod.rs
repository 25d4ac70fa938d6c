//! The DM session: one identity's sync pipeline, message store and send path.

mod engine;
mod phase;
mod pipeline;
mod relay_list;
mod send;

pub use engine::DmSession;
pub use phase::{LoadingPhase, PhaseError, PhaseMachine};
pub use send::SendError;
