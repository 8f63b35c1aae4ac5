use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::Job;

/// One firing of a job on one worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    pub job_name: String,
    #[serde(default)]
    pub payload: HashMap<String, String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub started_at: DateTime<Utc>,
    /// Zero value (`None`) until the worker reports completion.
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub output: Vec<u8>,
    #[serde(default)]
    pub node_name: String,
    /// Creation-time nanos; shared by every execution of one firing cohort
    /// when the job's concurrency policy is `allow`.
    pub group: i64,
    pub application: String,
    #[serde(default = "default_attempt")]
    pub attempt: u32,
    pub concurrency: String,
}

fn default_attempt() -> u32 {
    1
}

impl Execution {
    /// Builds a new execution from a job firing, inheriting payload, tags,
    /// application and concurrency policy. Mirrors `NewExecution` in the
    /// original coordinator.
    pub fn new(job: &Job) -> Self {
        Execution {
            job_name: job.name.clone(),
            payload: job.payload.clone(),
            tags: job.tags.clone(),
            started_at: Utc::now(),
            finished_at: None,
            success: false,
            output: Vec::new(),
            node_name: String::new(),
            group: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            application: job.application.clone(),
            attempt: 1,
            concurrency: job.concurrency.clone(),
        }
    }

    /// The execution's KV key fragment: `"{started_at_nanos}-{node_name}"`.
    pub fn key(&self) -> String {
        format!(
            "{}-{}",
            self.started_at.timestamp_nanos_opt().unwrap_or_default(),
            self.node_name
        )
    }

    pub fn is_outstanding(&self) -> bool {
        self.finished_at.is_none()
    }

    /// The quota label this execution counts against: `tags["type"]`, or
    /// `"undo"` when absent.
    pub fn quota_label(&self) -> String {
        self.tags
            .get("type")
            .cloned()
            .unwrap_or_else(|| "undo".to_string())
    }
}

/// Orders executions ascending by `started_at`, the order `Store::set_execution`
/// uses to decide which records are "oldest" for retention trimming.
pub fn cmp_started_at(a: &Execution, b: &Execution) -> Ordering {
    a.started_at.cmp(&b.started_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::job::Job;

    fn job() -> Job {
        Job::builder()
            .name("j1")
            .schedule("@every 2s")
            .application("spider")
            .concurrency("forbid")
            .build()
    }

    #[test]
    fn new_execution_inherits_from_job() {
        let j = job();
        let ex = Execution::new(&j);
        assert_eq!(ex.job_name, "j1");
        assert_eq!(ex.application, "spider");
        assert_eq!(ex.concurrency, "forbid");
        assert_eq!(ex.attempt, 1);
        assert!(ex.is_outstanding());
    }

    #[test]
    fn quota_label_defaults_to_undo() {
        let j = job();
        let ex = Execution::new(&j);
        assert_eq!(ex.quota_label(), "undo");
    }

    #[test]
    fn quota_label_uses_type_tag_when_present() {
        let mut j = job();
        j.tags.insert("type".to_string(), "scrape".to_string());
        let ex = Execution::new(&j);
        assert_eq!(ex.quota_label(), "scrape");
    }

    #[test]
    fn key_combines_started_at_and_node_name() {
        let j = job();
        let mut ex = Execution::new(&j);
        ex.node_name = "w1".to_string();
        let key = ex.key();
        assert!(key.ends_with("-w1"));
    }
}
