use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Schedule literal meaning "fire once when the scheduler starts, never
/// register with the cron engine".
pub const ONEWAY_SCHEDULE: &str = "@oneway";

pub const CONCURRENCY_ALLOW: &str = "allow";
pub const CONCURRENCY_FORBID: &str = "forbid";

/// Derived status of a job's last firing cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Success,
    Running,
    Failed,
    PartialyFailed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobMetaData {
    pub success_count: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub error_count: u64,
    pub last_error: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HttpProperties {
    pub url: String,
    pub method: String,
    pub body: String,
    pub headers: HashMap<String, String>,
    pub timeout: i32,
}

/// A job definition, uniquely identified by `name`.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    pub name: String,

    #[builder(default)]
    pub breif: String,

    pub schedule: String,

    #[builder(default = "rpc".to_string())]
    pub job_type: String,

    #[builder(default)]
    pub command: String,

    #[builder(default)]
    pub http_properties: HttpProperties,

    #[builder(default)]
    pub disabled: bool,

    #[builder(default)]
    pub owner: String,

    #[builder(default)]
    pub owner_email: String,

    #[builder(default = CONCURRENCY_ALLOW.to_string())]
    pub concurrency: String,

    #[builder(default)]
    pub is_done: bool,

    #[builder(default)]
    pub metadata: JobMetaData,

    #[builder(default)]
    pub payload: HashMap<String, String>,

    #[builder(default)]
    pub tags: HashMap<String, String>,

    pub application: String,
}

impl Job {
    /// Whether this job should ever be handed to the cron engine. `@oneway`
    /// jobs are excluded even when enabled — they fire once at scheduler
    /// start instead (see `Scheduler::start`).
    pub fn is_cron_registrable(&self) -> bool {
        !self.disabled && !self.is_done && self.schedule.trim() != ONEWAY_SCHEDULE
    }

    pub fn is_oneway(&self) -> bool {
        self.schedule.trim() == ONEWAY_SCHEDULE
    }

    /// Merge semantics used by `Store::set_job`: the caller's fields win
    /// except the metadata counters/timestamps, where the larger/more
    /// recent of the two records is kept.
    pub fn merge_metadata_from(&mut self, existing: &Job) {
        if existing.metadata.last_error > self.metadata.last_error {
            self.metadata.last_error = existing.metadata.last_error;
        }
        if existing.metadata.last_success > self.metadata.last_success {
            self.metadata.last_success = existing.metadata.last_success;
        }
        if existing.metadata.success_count > self.metadata.success_count {
            self.metadata.success_count = existing.metadata.success_count;
        }
        if existing.metadata.error_count > self.metadata.error_count {
            self.metadata.error_count = existing.metadata.error_count;
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"name: {}, scheduled: {}, job_type: {}, disabled: {}, tags: {:?}\"",
            self.name, self.schedule, self.job_type, self.disabled, self.tags
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(name: &str) -> Job {
        Job::builder()
            .name(name)
            .schedule("@every 2s")
            .application("spider")
            .build()
    }

    #[test]
    fn oneway_job_is_not_cron_registrable() {
        let mut j = job("j1");
        j.schedule = ONEWAY_SCHEDULE.to_string();
        assert!(j.is_oneway());
        assert!(!j.is_cron_registrable());
    }

    #[test]
    fn disabled_job_is_not_cron_registrable() {
        let mut j = job("j1");
        j.disabled = true;
        assert!(!j.is_cron_registrable());
    }

    #[test]
    fn done_job_is_not_cron_registrable() {
        let mut j = job("j1");
        j.is_done = true;
        assert!(!j.is_cron_registrable());
    }

    #[test]
    fn plain_job_is_cron_registrable() {
        assert!(job("j1").is_cron_registrable());
    }

    #[test]
    fn merge_metadata_keeps_larger_counts_and_more_recent_timestamps() {
        let mut incoming = job("j1");
        incoming.metadata.success_count = 1;
        incoming.metadata.last_success = Some(Utc::now() - chrono::Duration::seconds(10));

        let mut existing = job("j1");
        existing.metadata.success_count = 5;
        existing.metadata.last_success = Some(Utc::now());

        incoming.merge_metadata_from(&existing);

        assert_eq!(incoming.metadata.success_count, 5);
        assert_eq!(incoming.metadata.last_success, existing.metadata.last_success);
    }

    #[test]
    fn display_matches_expected_shape() {
        let j = job("j1");
        let s = j.to_string();
        assert!(s.contains("name: j1"));
        assert!(s.contains("job_type: rpc"));
    }
}
