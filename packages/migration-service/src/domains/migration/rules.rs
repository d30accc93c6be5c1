//! Job promotion rules.
//!
//! A job moves on once every one of its tasks reaches a milestone state.
//! Rules are keyed by the job's current state; the engine runs after each
//! task execution.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::error::{MigrationError, Result};
use super::events;
use super::models::{Job, JobAction};
use super::state::{is_reachable, State};
use crate::kernel::BaseMigrationStore;

/// Promote a job to `job_target_state` once all its tasks are in
/// `task_target_state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransitionRule {
    pub task_target_state: State,
    pub job_target_state: State,
    pub description: String,
}

impl StateTransitionRule {
    pub fn new(
        task_target_state: State,
        job_target_state: State,
        description: impl Into<String>,
    ) -> Self {
        Self {
            task_target_state,
            job_target_state,
            description: description.into(),
        }
    }
}

/// The built-in rules: review once all tasks are in review, published once
/// all tasks are published.
pub fn default_rules() -> Vec<(State, StateTransitionRule)> {
    vec![
        (
            State::Migrating,
            StateTransitionRule::new(
                State::InReview,
                State::InReview,
                "all tasks migrated, job ready for review",
            ),
        ),
        (
            State::InReview,
            StateTransitionRule::new(
                State::Published,
                State::Published,
                "all tasks published, job published",
            ),
        ),
    ]
}

pub struct RuleEngine {
    store: Arc<dyn BaseMigrationStore>,
    rules: HashMap<State, Vec<StateTransitionRule>>,
}

impl RuleEngine {
    /// Engine with the built-in rules.
    pub fn new(store: Arc<dyn BaseMigrationStore>) -> Self {
        let mut rules: HashMap<State, Vec<StateTransitionRule>> = HashMap::new();
        for (from, rule) in default_rules() {
            rules.entry(from).or_default().push(rule);
        }
        Self { store, rules }
    }

    /// Engine with a custom rule set.
    ///
    /// Each rule's job target state must be reachable from the state it is
    /// keyed on.
    pub fn with_rules(
        store: Arc<dyn BaseMigrationStore>,
        rules: impl IntoIterator<Item = (State, StateTransitionRule)>,
    ) -> Result<Self> {
        let mut keyed: HashMap<State, Vec<StateTransitionRule>> = HashMap::new();
        for (from, rule) in rules {
            if !is_reachable(from, rule.job_target_state) {
                return Err(MigrationError::InvalidTransition {
                    from,
                    to: rule.job_target_state,
                });
            }
            keyed.entry(from).or_default().push(rule);
        }
        Ok(Self { store, rules: keyed })
    }

    pub fn rules_for(&self, state: State) -> &[StateTransitionRule] {
        self.rules.get(&state).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Promote the job if a rule for its current state is satisfied.
    ///
    /// The promotion target must be reachable from the job's state through
    /// the state machine, otherwise `InvalidTransition` is returned.
    ///
    /// Returns the promoted job, or `None` when no rule fired. A job with no
    /// tasks is never promoted. Two concurrent triggers promote at most once
    /// because the state write only applies to a job still in the state the
    /// rule was keyed on.
    pub async fn trigger_job_state_transitions(&self, job_number: i64) -> Result<Option<Job>> {
        let job = self.store.get_job_by_number(job_number).await?;
        let total = self.store.count_tasks(job_number).await?;
        if total == 0 {
            debug!(job_number = job_number, "job has no tasks, nothing to promote");
            return Ok(None);
        }

        for rule in self.rules_for(job.state) {
            let in_target = self
                .store
                .count_tasks_in_state(job_number, rule.task_target_state)
                .await?;

            if in_target != total {
                debug!(
                    job_number = job_number,
                    task_state = %rule.task_target_state,
                    in_target = in_target,
                    total = total,
                    "rule not satisfied"
                );
                continue;
            }

            if !is_reachable(job.state, rule.job_target_state) {
                return Err(MigrationError::InvalidTransition {
                    from: job.state,
                    to: rule.job_target_state,
                });
            }

            let promoted = self
                .store
                .update_job_state(job.id, job.state, rule.job_target_state)
                .await?;

            return match promoted {
                Some(promoted) => {
                    info!(
                        job_number = job_number,
                        from = %job.state,
                        to = %promoted.state,
                        rule = %rule.description,
                        "job promoted"
                    );
                    events::record(
                        self.store.as_ref(),
                        job_number,
                        JobAction::Promoted,
                        Some(job.state),
                        promoted.state,
                    )
                    .await;
                    Ok(Some(promoted))
                }
                None => {
                    debug!(
                        job_number = job_number,
                        "job state changed concurrently, skipping promotion"
                    );
                    Ok(None)
                }
            };
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::migration::models::{JobConfig, NewTask, Task, TaskMetadata, TaskType};
    use crate::kernel::InMemoryMigrationStore;

    async fn job_with_tasks(store: &InMemoryMigrationStore, n: usize) -> (Job, Vec<Task>) {
        let number = store.next_job_number().await.unwrap();
        let config = JobConfig::builder().source_id("src").target_id("dst").build();
        let mut job = Job::new(config, number, "job", "http://api");
        job.state = State::Migrating;
        let job = store.insert_job(&job).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..n {
            let mut task = Task::new(
                NewTask::builder()
                    .job_number(number)
                    .task_type(TaskType::DatasetVersion)
                    .source(TaskMetadata::builder().id(format!("v{}", i)).build())
                    .build(),
                "http://api",
            );
            task.state = State::Migrating;
            tasks.push(store.insert_task(&task).await.unwrap());
        }
        (job, tasks)
    }

    async fn review(store: &InMemoryMigrationStore, task: &Task) {
        store
            .update_task_state(task.id, State::Migrating, State::InReview)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_partial_completion_does_not_promote() {
        let store = Arc::new(InMemoryMigrationStore::new());
        let engine = RuleEngine::new(store.clone());
        let (job, tasks) = job_with_tasks(&store, 3).await;

        review(&store, &tasks[0]).await;
        review(&store, &tasks[1]).await;

        let promoted = engine.trigger_job_state_transitions(job.job_number).await.unwrap();
        assert!(promoted.is_none());
        assert_eq!(store.get_job(job.id).await.unwrap().state, State::Migrating);
    }

    #[tokio::test]
    async fn test_promotes_exactly_once_when_all_tasks_reach_milestone() {
        let store = Arc::new(InMemoryMigrationStore::new());
        let engine = RuleEngine::new(store.clone());
        let (job, tasks) = job_with_tasks(&store, 3).await;

        let mut promotions = 0;
        for task in tasks.iter().rev() {
            review(&store, task).await;
            if engine
                .trigger_job_state_transitions(job.job_number)
                .await
                .unwrap()
                .is_some()
            {
                promotions += 1;
            }
        }
        // Triggering again once promoted is a no-op.
        assert!(engine
            .trigger_job_state_transitions(job.job_number)
            .await
            .unwrap()
            .is_none());

        assert_eq!(promotions, 1);
        assert_eq!(store.get_job(job.id).await.unwrap().state, State::InReview);

        let events = store.list_job_events(job.job_number).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, JobAction::Promoted);
        assert_eq!(events[0].from_state, Some(State::Migrating));
        assert_eq!(events[0].to_state, State::InReview);
    }

    #[tokio::test]
    async fn test_concurrent_triggers_promote_once() {
        let store = Arc::new(InMemoryMigrationStore::new());
        let engine = Arc::new(RuleEngine::new(store.clone()));
        let (job, tasks) = job_with_tasks(&store, 4).await;
        for task in &tasks {
            review(&store, task).await;
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let engine = engine.clone();
            let number = job.job_number;
            handles.push(tokio::spawn(async move {
                engine.trigger_job_state_transitions(number).await.unwrap()
            }));
        }

        let mut promotions = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                promotions += 1;
            }
        }
        assert_eq!(promotions, 1);
    }

    #[tokio::test]
    async fn test_job_without_tasks_is_never_promoted() {
        let store = Arc::new(InMemoryMigrationStore::new());
        let engine = RuleEngine::new(store.clone());
        let (job, _) = job_with_tasks(&store, 0).await;

        assert!(engine
            .trigger_job_state_transitions(job.job_number)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.get_job(job.id).await.unwrap().state, State::Migrating);
    }

    #[tokio::test]
    async fn test_failed_tasks_block_promotion() {
        let store = Arc::new(InMemoryMigrationStore::new());
        let engine = RuleEngine::new(store.clone());
        let (job, tasks) = job_with_tasks(&store, 2).await;

        review(&store, &tasks[0]).await;
        store
            .update_task_state(tasks[1].id, State::Migrating, State::FailedMigration)
            .await
            .unwrap();

        assert!(engine
            .trigger_job_state_transitions(job.job_number)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_review_promotes_to_published() {
        let store = Arc::new(InMemoryMigrationStore::new());
        let engine = RuleEngine::new(store.clone());
        let (job, tasks) = job_with_tasks(&store, 1).await;
        store
            .update_job_state(job.id, State::Migrating, State::InReview)
            .await
            .unwrap();
        store
            .update_task_state(tasks[0].id, State::Migrating, State::Published)
            .await
            .unwrap();

        let promoted = engine
            .trigger_job_state_transitions(job.job_number)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(promoted.state, State::Published);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let store = Arc::new(InMemoryMigrationStore::new());
        let engine = RuleEngine::new(store);

        let err = engine.trigger_job_state_transitions(42).await.unwrap_err();
        assert!(matches!(err, MigrationError::JobNotFound(_)));
    }

    #[test]
    fn test_custom_rules_must_be_reachable() {
        let store: Arc<dyn BaseMigrationStore> = Arc::new(InMemoryMigrationStore::new());

        let err = RuleEngine::with_rules(
            store.clone(),
            vec![(
                State::Completed,
                StateTransitionRule::new(State::Published, State::Migrating, "backwards"),
            )],
        )
        .err()
        .unwrap();
        assert!(matches!(err, MigrationError::InvalidTransition { .. }));

        let engine = RuleEngine::with_rules(
            store,
            vec![(
                State::Published,
                StateTransitionRule::new(State::Completed, State::Completed, "all done"),
            )],
        )
        .unwrap();
        assert_eq!(engine.rules_for(State::Published).len(), 1);
        assert!(engine.rules_for(State::Migrating).is_empty());
    }

    #[test]
    fn test_default_rules_are_reachable() {
        for (from, rule) in default_rules() {
            assert!(
                is_reachable(from, rule.job_target_state),
                "{} cannot reach {}",
                from,
                rule.job_target_state
            );
        }
    }

    #[test]
    fn test_default_rules() {
        let store = Arc::new(InMemoryMigrationStore::new());
        let engine = RuleEngine::new(store);

        assert_eq!(
            engine.rules_for(State::Migrating)[0].job_target_state,
            State::InReview
        );
        assert_eq!(
            engine.rules_for(State::InReview)[0].job_target_state,
            State::Published
        );
    }
}
