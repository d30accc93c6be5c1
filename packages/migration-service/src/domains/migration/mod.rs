pub mod error;
pub mod events;
pub mod failure;
pub mod models;
pub mod rules;
pub mod service;
pub mod state;

pub use error::{MigrationError, Result};
pub use failure::FailureHandler;
pub use models::*;
pub use rules::{RuleEngine, StateTransitionRule};
pub use service::MigrationService;
pub use state::State;
