//! Shared lifecycle for migration jobs and tasks.
//!
//! The transition table is the single source of truth for which state
//! writes are legal. Claims, task advances and failures only use edges it
//! lists; rule promotions are checked with [`is_reachable`] when the rule
//! is registered. Nothing in this module touches storage.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{MigrationError, Result};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "migration_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum State {
    Submitted,
    Migrating,
    InReview,
    Approved,
    Rejected,
    Publishing,
    Published,
    PostPublishing,
    Completed,
    Reverting,
    FailedMigration,
    FailedPublish,
    FailedPostPublish,
    Cancelled,
}

impl State {
    /// Every state, in lifecycle order.
    pub const ALL: [State; 14] = [
        State::Submitted,
        State::Migrating,
        State::InReview,
        State::Approved,
        State::Rejected,
        State::Publishing,
        State::Published,
        State::PostPublishing,
        State::Completed,
        State::Reverting,
        State::FailedMigration,
        State::FailedPublish,
        State::FailedPostPublish,
        State::Cancelled,
    ];

    /// State every job and task is created in.
    pub const INITIAL: State = State::Submitted;

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Submitted => "submitted",
            State::Migrating => "migrating",
            State::InReview => "in_review",
            State::Approved => "approved",
            State::Rejected => "rejected",
            State::Publishing => "publishing",
            State::Published => "published",
            State::PostPublishing => "post_publishing",
            State::Completed => "completed",
            State::Reverting => "reverting",
            State::FailedMigration => "failed_migration",
            State::FailedPublish => "failed_publish",
            State::FailedPostPublish => "failed_post_publish",
            State::Cancelled => "cancelled",
        }
    }

    /// Failure state an active state falls into when its work fails.
    pub fn failure_state(&self) -> Option<State> {
        match self {
            State::Migrating => Some(State::FailedMigration),
            State::Publishing => Some(State::FailedPublish),
            State::PostPublishing => Some(State::FailedPostPublish),
            _ => None,
        }
    }

    /// Whether a job in this state blocks creating another job with the same
    /// source, target and type.
    pub fn is_active(&self) -> bool {
        !is_terminal_state(*self)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self> {
        State::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| MigrationError::UnknownState(s.to_string()))
    }
}

/// Legal next states for `from`, in a stable order. Empty for terminal states.
pub fn next_states(from: State) -> &'static [State] {
    match from {
        State::Submitted => &[State::Migrating, State::Cancelled],
        State::Migrating => &[State::InReview, State::FailedMigration],
        State::InReview => &[State::Approved, State::Rejected],
        State::Approved => &[State::Publishing],
        State::Publishing => &[State::Published, State::FailedPublish],
        State::Published => &[State::PostPublishing],
        State::PostPublishing => &[State::Completed, State::FailedPostPublish],
        State::Rejected => &[State::Reverting],
        State::Reverting => &[State::Cancelled],
        State::FailedMigration => &[State::Rejected],
        State::FailedPublish => &[State::Approved],
        State::FailedPostPublish => &[State::Published],
        State::Completed | State::Cancelled => &[],
    }
}

pub fn can_transition(from: State, to: State) -> bool {
    next_states(from).contains(&to)
}

pub fn validate_transition(from: State, to: State) -> Result<()> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(MigrationError::InvalidTransition { from, to })
    }
}

/// Validates a transition given as raw state names, as read from outside
/// the type system (API payloads, operator input).
pub fn validate_transition_str(from: &str, to: &str) -> Result<()> {
    let from: State = from.parse()?;
    let to: State = to.parse()?;
    validate_transition(from, to)
}

pub fn is_terminal_state(state: State) -> bool {
    next_states(state).is_empty()
}

pub fn is_failure_state(state: State) -> bool {
    matches!(
        state,
        State::FailedMigration | State::FailedPublish | State::FailedPostPublish
    )
}

/// Whether `to` can be reached from `from` by following one or more legal
/// transitions.
pub fn is_reachable(from: State, to: State) -> bool {
    let mut seen = vec![from];
    let mut queue = VecDeque::from([from]);

    while let Some(state) = queue.pop_front() {
        for &next in next_states(state) {
            if next == to {
                return true;
            }
            if !seen.contains(&next) {
                seen.push(next);
                queue.push_back(next);
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_matches_next_states_for_every_pair() {
        for from in State::ALL {
            for to in State::ALL {
                let listed = next_states(from).contains(&to);
                assert_eq!(validate_transition(from, to).is_ok(), listed, "{from} -> {to}");
                assert_eq!(can_transition(from, to), listed);
            }
        }
    }

    #[test]
    fn test_invalid_transition_reports_endpoints() {
        let err = validate_transition(State::Submitted, State::Completed).unwrap_err();
        assert!(matches!(
            err,
            MigrationError::InvalidTransition {
                from: State::Submitted,
                to: State::Completed
            }
        ));
    }

    #[test]
    fn test_unknown_state_is_rejected() {
        let err = validate_transition_str("submitted", "teleported").unwrap_err();
        assert!(matches!(err, MigrationError::UnknownState(s) if s == "teleported"));

        let err = validate_transition_str("limbo", "migrating").unwrap_err();
        assert!(matches!(err, MigrationError::UnknownState(_)));

        assert!(validate_transition_str("submitted", "migrating").is_ok());
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        let terminal: Vec<State> = State::ALL
            .into_iter()
            .filter(|s| is_terminal_state(*s))
            .collect();
        assert_eq!(terminal, vec![State::Completed, State::Cancelled]);

        for state in terminal {
            assert!(next_states(state).is_empty());
            assert!(state.failure_state().is_none());
            assert!(!state.is_active());
        }
    }

    #[test]
    fn test_failure_states() {
        assert!(is_failure_state(State::FailedMigration));
        assert!(is_failure_state(State::FailedPublish));
        assert!(is_failure_state(State::FailedPostPublish));
        assert!(!is_failure_state(State::Cancelled));
        assert!(!is_failure_state(State::Migrating));
    }

    #[test]
    fn test_failure_mapping_follows_graph() {
        for state in State::ALL {
            if let Some(failed) = state.failure_state() {
                assert!(can_transition(state, failed));
                assert!(is_failure_state(failed));
            }
        }
        assert_eq!(
            State::Migrating.failure_state(),
            Some(State::FailedMigration)
        );
        assert_eq!(State::InReview.failure_state(), None);
    }

    #[test]
    fn test_retry_edges() {
        assert_eq!(next_states(State::FailedMigration), &[State::Rejected]);
        assert_eq!(next_states(State::FailedPublish), &[State::Approved]);
        assert_eq!(next_states(State::FailedPostPublish), &[State::Published]);
    }

    #[test]
    fn test_reachability() {
        assert!(is_reachable(State::Migrating, State::InReview));
        assert!(is_reachable(State::InReview, State::Published));
        assert!(is_reachable(State::Submitted, State::Completed));
        assert!(!is_reachable(State::Completed, State::Submitted));
        assert!(!is_reachable(State::Published, State::InReview));
    }

    #[test]
    fn test_string_round_trip() {
        for state in State::ALL {
            assert_eq!(state.to_string().parse::<State>().unwrap(), state);
        }
        assert_eq!(
            serde_json::to_string(&State::PostPublishing).unwrap(),
            "\"post_publishing\""
        );
    }
}
