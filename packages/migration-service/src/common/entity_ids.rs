//! Typed ID definitions for migration entities.

pub use super::id::Id;

/// Marker type for migration jobs.
pub struct MigrationJob;

/// Marker type for migration tasks.
pub struct MigrationTask;

/// Marker type for job audit events.
pub struct MigrationJobEvent;

/// Typed ID for migration jobs.
pub type JobId = Id<MigrationJob>;

/// Typed ID for migration tasks.
pub type TaskId = Id<MigrationTask>;

/// Typed ID for job audit events.
pub type JobEventId = Id<MigrationJobEvent>;
