use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use typed_builder::TypedBuilder;

use crate::common::{JobId, Links};
use crate::domains::migration::state::State;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "migration_job_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    StaticDataset,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::StaticDataset => "static_dataset",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a job migrates: fixed when the job is created.
#[derive(FromRow, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct JobConfig {
    /// Identifier of the content in the legacy system.
    pub source_id: String,
    /// Identifier the content is migrated to in the new services.
    pub target_id: String,
    #[builder(default = JobType::StaticDataset)]
    pub job_type: JobType,
}

/// A migration job: one source to target mapping.
///
/// Config is never updated after insert; state only moves through the
/// store's compare-and-set writes.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_number: i64,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub config: JobConfig,
    pub state: State,
    pub label: String,
    pub links: Json<Links>,
    pub last_updated: DateTime<Utc>,
}

impl Job {
    /// Builds a freshly submitted job.
    pub fn new(
        config: JobConfig,
        job_number: i64,
        label: impl Into<String>,
        api_url: &str,
    ) -> Self {
        Self {
            id: JobId::new(),
            job_number,
            config,
            state: State::INITIAL,
            label: label.into(),
            links: Json(Links::for_job(api_url, job_number)),
            last_updated: Utc::now(),
        }
    }

    pub fn job_type(&self) -> JobType {
        self.config.job_type
    }
}
