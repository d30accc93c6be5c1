use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::common::{Links, TaskId};
use crate::domains::migration::state::State;

/// The kind of content object a task migrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "migration_task_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    DatasetSeries,
    DatasetEdition,
    DatasetVersion,
    DatasetDownload,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::DatasetSeries => "dataset_series",
            TaskType::DatasetEdition => "dataset_edition",
            TaskType::DatasetVersion => "dataset_version",
            TaskType::DatasetDownload => "dataset_download",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifiers of a content object on one side of the migration.
///
/// On the target side these are filled in as upstream systems allocate
/// them (dataset first, then edition, then version).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
pub struct TaskMetadata {
    #[builder(setter(into))]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(into, strip_option))]
    pub dataset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(into, strip_option))]
    pub edition_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(into, strip_option))]
    pub version_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(into, strip_option))]
    pub label: Option<String>,
}

/// Input for creating a task under an existing job.
#[derive(Debug, Clone, TypedBuilder)]
pub struct NewTask {
    pub job_number: i64,
    pub task_type: TaskType,
    pub source: TaskMetadata,
    #[builder(default, setter(strip_option))]
    pub target: Option<TaskMetadata>,
}

/// One content object to migrate, owned by a job.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub job_number: i64,
    pub task_type: TaskType,
    pub state: State,
    pub source: Json<TaskMetadata>,
    pub target: Option<Json<TaskMetadata>>,
    pub links: Json<Links>,
    pub last_updated: DateTime<Utc>,
}

impl Task {
    /// Builds a freshly submitted task.
    pub fn new(new_task: NewTask, api_url: &str) -> Self {
        let id = TaskId::new();
        Self {
            id,
            job_number: new_task.job_number,
            task_type: new_task.task_type,
            state: State::INITIAL,
            source: Json(new_task.source),
            target: new_task.target.map(Json),
            links: Json(Links::for_task(api_url, new_task.job_number, id)),
            last_updated: Utc::now(),
        }
    }
}
