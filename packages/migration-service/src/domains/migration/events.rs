use tracing::warn;

use super::models::{JobAction, JobEvent};
use super::state::State;
use crate::kernel::BaseMigrationStore;

/// Append a job event after the state write it describes.
///
/// The audit trail never fails the operation that triggered it; a failed
/// insert is logged and dropped.
pub async fn record(
    store: &dyn BaseMigrationStore,
    job_number: i64,
    action: JobAction,
    from_state: Option<State>,
    to_state: State,
) {
    let event = JobEvent::new(job_number, action, from_state, to_state);
    if let Err(e) = store.insert_job_event(&event).await {
        warn!(
            job_number = job_number,
            action = ?action,
            error = %e,
            "failed to record job event"
        );
    }
}
