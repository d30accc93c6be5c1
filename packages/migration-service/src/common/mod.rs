// Common types shared across the migration service

pub mod entity_ids;
pub mod id;
pub mod links;

pub use entity_ids::*;
pub use id::Id;
pub use links::{Link, Links};
