pub mod coordinator;

pub use coordinator::{
    ApprovalCoordinator, CancelOutcome, CreateError, ExpireOutcome, ResolveOutcome,
};
