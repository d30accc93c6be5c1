use serde::{Deserialize, Serialize};

/// A single hypermedia link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
}

impl Link {
    pub fn new(href: impl Into<String>) -> Self {
        Self { href: href.into() }
    }
}

/// Links attached to jobs and tasks.
///
/// Jobs only carry `self`; tasks also point back at their owning job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Links {
    #[serde(rename = "self")]
    pub self_link: Link,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<Link>,
}

impl Links {
    pub fn for_job(api_url: &str, job_number: i64) -> Self {
        Self {
            self_link: Link::new(job_href(api_url, job_number)),
            job: None,
        }
    }

    pub fn for_task(api_url: &str, job_number: i64, task_id: impl std::fmt::Display) -> Self {
        let job = job_href(api_url, job_number);
        Self {
            self_link: Link::new(format!("{}/tasks/{}", job, task_id)),
            job: Some(Link::new(job)),
        }
    }
}

fn job_href(api_url: &str, job_number: i64) -> String {
    format!(
        "{}/v1/migration-jobs/{}",
        api_url.trim_end_matches('/'),
        job_number
    )
}
