use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::common::JobEventId;
use crate::domains::migration::state::State;

/// What caused a job's state to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "migration_job_action", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    Created,
    /// A worker claimed the job off the queue.
    Claimed,
    /// The rule engine promoted the job after all its tasks reached a milestone.
    Promoted,
    Failed,
}

/// Append-only audit record of a job state change.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub id: JobEventId,
    pub job_number: i64,
    pub action: JobAction,
    pub from_state: Option<State>,
    pub to_state: State,
    pub created_at: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(
        job_number: i64,
        action: JobAction,
        from_state: Option<State>,
        to_state: State,
    ) -> Self {
        Self {
            id: JobEventId::new(),
            job_number,
            action,
            from_state,
            to_state,
            created_at: Utc::now(),
        }
    }
}
