//! Paginated playlist delivery.

mod coordinator;
mod state;

pub use coordinator::{ItemPipeline, SessionCoordinator, SessionSink};
pub use state::{
    PlaylistSession, SessionConfig, SessionOutcome, SessionPhase, SessionSnapshot, SignalOutcome,
    StartOutcome,
};
