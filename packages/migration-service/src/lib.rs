// Content Migration Service - orchestration core
//
// This crate drives migration jobs and their tasks from the legacy publishing
// system into the new services. Jobs and tasks share one state machine; a
// worker pool claims submitted work, runs the registered executor and either
// fails the work or lets the rule engine promote the owning job.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;
