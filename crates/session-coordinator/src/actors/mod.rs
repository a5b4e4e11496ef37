//! Actor model for per-meeting serialization.
//!
//! ```text
//! MeetingRegistry (one per process)
//! └── MeetingActor (one per active meeting)
//!     ├── enrichment job (spawned, at most one)
//!     └── terminal job (spawned, once)
//! ```
//!
//! Handles wrap an mpsc sender; every request carries a oneshot reply
//! channel. Cancellation flows down through child `CancellationToken`s.

pub mod meeting;
pub mod messages;
pub mod registry;

pub use meeting::{MeetingActor, MeetingActorHandle, MeetingContext, PipelineSettings};
pub use messages::{
    FinalizeOutcome, FinalizeTrigger, MeetingActorState, RegistryStatus, SegmentInput,
};
pub use registry::{recover_pending_finalizations, MeetingRegistry, MeetingRegistryHandle};
