pub mod event;
pub mod job;
pub mod task;

pub use event::{JobAction, JobEvent};
pub use job::{Job, JobConfig, JobType};
pub use task::{NewTask, Task, TaskMetadata, TaskType};
