pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::bootstrap::{
    BootstrapResult, SqliteSchedulingService, Workspace, bootstrap_workspace, open_workspace,
    open_workspace_from_env,
};
pub use application::error::SchedulingError;
pub use application::scheduling_service::{SchedulingService, SchedulingSettings};
pub use application::session_lifecycle::{
    BookingRequest, ExternalSyncFailure, PendingSyncSummary, RescheduleOutcome, TransitionOutcome,
};
pub use domain::availability::SlotQuery;
pub use domain::lifecycle::{LifecycleEvent, LifecycleEventKind};
pub use domain::models::{
    AvailabilityTemplate, BlockedDateSet, BusyInterval, CalendarProvider, CoachId, ConflictPolicy,
    DayAvailability, ExternalRef, MenteeId, Session, SessionId, SessionStatus, SlotStart,
};
pub use infrastructure::error::InfraError;
