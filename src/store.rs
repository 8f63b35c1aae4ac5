use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::kv::{KvStore, WatchStream};
use crate::model::{cmp_started_at, Execution, Job, Processor};

/// Upper bound on retained executions per job before a trim pass runs.
pub const MAX_EXECUTIONS: usize = 200;

/// Typed operations over a `KvStore`: jobs, processors, executions, with
/// merge, retention-trim and orphan-cleanup semantics layered on top of the
/// raw key/value backend.
pub struct Store {
    kv: Arc<dyn KvStore>,
    keyspace: String,
}

impl Store {
    pub fn new(kv: Arc<dyn KvStore>, keyspace: impl Into<String>) -> Self {
        Self {
            kv,
            keyspace: keyspace.into(),
        }
    }

    fn job_key(&self, name: &str) -> String {
        format!("{}/jobs/{}", self.keyspace, name)
    }

    fn jobs_prefix(&self) -> String {
        format!("{}/jobs/", self.keyspace)
    }

    fn processor_key(&self, app: &str, addr: &str) -> String {
        format!("{}/processors/{}/{}", self.keyspace, app, addr)
    }

    fn processors_prefix(&self) -> String {
        format!("{}/processors/", self.keyspace)
    }

    fn processors_app_prefix(&self, app: &str) -> String {
        format!("{}/processors/{}", self.keyspace, app)
    }

    fn executions_job_prefix(&self, job_name: &str) -> String {
        format!("{}/executions/{}/", self.keyspace, job_name)
    }

    fn execution_key(&self, ex: &Execution) -> String {
        format!("{}/executions/{}/{}", self.keyspace, ex.job_name, ex.key())
    }

    fn executions_prefix(&self) -> String {
        format!("{}/executions/", self.keyspace)
    }

    // ---- Jobs -----------------------------------------------------------

    /// Merge semantics: loads any existing record, keeps the more recent of
    /// `last_error`/`last_success` and the larger of the count fields, then
    /// overwrites. Returns the record actually persisted.
    pub async fn set_job(&self, mut job: Job) -> Result<Job> {
        match self.get_job(&job.name).await {
            Ok(existing) => job.merge_metadata_from(&existing),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let json = serde_json::to_vec(&job).map_err(|e| Error::Decode {
            key: job.name.clone(),
            source: e,
        })?;
        debug!(job = %job.name, "store: setting job");
        self.kv.put(&self.job_key(&job.name), json).await?;
        Ok(job)
    }

    pub async fn get_job(&self, name: &str) -> Result<Job> {
        let bytes = self.kv.get(&self.job_key(name)).await?;
        let job: Job = serde_json::from_slice(&bytes).map_err(|e| Error::Decode {
            key: name.to_string(),
            source: e,
        })?;
        Ok(job)
    }

    pub async fn get_jobs(&self) -> Result<Vec<Job>> {
        let pairs = self.kv.list(&self.jobs_prefix()).await?;
        let mut jobs = Vec::with_capacity(pairs.len());
        for pair in pairs {
            match serde_json::from_slice::<Job>(&pair.value) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    error!(key = %pair.key, err = %e, "store: failed to decode job, skipping");
                }
            }
        }
        Ok(jobs)
    }

    pub async fn delete_job(&self, name: &str) -> Result<Job> {
        let job = self.get_job(name).await?;
        self.kv.delete(&self.job_key(name)).await?;
        Ok(job)
    }

    /// Lazy, infinite sequence of batches of changed jobs. If the prefix
    /// doesn't exist yet, seeds a disabled `@yearly` placeholder job first
    /// to force the directory into existence.
    pub async fn watch_jobs_tree(&self) -> Result<WatchStream> {
        let dir = format!("{}/jobs", self.keyspace);
        if !self.kv.exists(&dir).await? {
            let placeholder = Job::builder()
                .name("watch")
                .schedule("@yearly")
                .job_type("rpc")
                .disabled(true)
                .concurrency("forbid")
                .application("system")
                .build();
            if let Err(e) = self.set_job(placeholder).await {
                error!(err = %e, "store: failed to seed jobs watch placeholder");
            }
        }
        self.kv.watch_tree(&dir).await
    }

    // ---- Processors -------------------------------------------------------

    pub async fn set_processor(&self, p: &Processor) -> Result<()> {
        let key = self.processor_key(&p.application, &p.addr());
        let json = serde_json::to_vec(p).map_err(|e| Error::Decode {
            key: key.clone(),
            source: e,
        })?;
        debug!(addr = %p.addr(), "store: setting processor");
        self.kv.put(&key, json).await
    }

    pub async fn get_processor(&self, app: &str, addr: &str) -> Result<Processor> {
        let bytes = self.kv.get(&self.processor_key(app, addr)).await?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Decode {
            key: addr.to_string(),
            source: e,
        })
    }

    pub async fn delete_processor(&self, app: &str, addr: &str) -> Result<Processor> {
        let p = self.get_processor(app, addr).await?;
        self.kv.delete(&self.processor_key(app, addr)).await?;
        Ok(p)
    }

    pub async fn get_processors(&self) -> Result<Vec<Processor>> {
        self.decode_processors(&self.processors_prefix()).await
    }

    pub async fn get_processors_by_app(&self, app: &str) -> Result<Vec<Processor>> {
        self.decode_processors(&self.processors_app_prefix(app)).await
    }

    async fn decode_processors(&self, prefix: &str) -> Result<Vec<Processor>> {
        let pairs = self.kv.list(prefix).await?;
        let mut out = Vec::with_capacity(pairs.len());
        for pair in pairs {
            match serde_json::from_slice::<Processor>(&pair.value) {
                Ok(p) => out.push(p),
                Err(e) => {
                    error!(key = %pair.key, err = %e, "store: failed to decode processor, skipping");
                }
            }
        }
        Ok(out)
    }

    /// Analogous placeholder-seeding watch as `watch_jobs_tree`.
    pub async fn watch_processor_tree(&self) -> Result<WatchStream> {
        let dir = format!("{}/processors", self.keyspace);
        if !self.kv.exists(&dir).await? {
            let placeholder = Processor {
                application: "system".to_string(),
                node_name: "khronos01".to_string(),
                ip: "127.0.0.1".to_string(),
                port: 10005,
                status: true,
                max_execution_limit: 10,
                undone: 0,
            };
            if let Err(e) = self.set_processor(&placeholder).await {
                error!(err = %e, "store: failed to seed processors watch placeholder");
            }
        }
        self.kv.watch_tree(&dir).await
    }

    // ---- Executions ---------------------------------------------------

    /// Writes, then enforces retention: deletes the oldest
    /// `count - MAX_EXECUTIONS + 100` entries by `started_at` once the
    /// total for this job exceeds `MAX_EXECUTIONS`.
    pub async fn set_execution(&self, ex: &Execution) -> Result<String> {
        let key = ex.key();
        let json = serde_json::to_vec(ex).map_err(|e| Error::Decode {
            key: key.clone(),
            source: e,
        })?;

        debug!(job = %ex.job_name, execution = %key, "store: setting execution");
        self.kv.put(&self.execution_key(ex), json).await?;

        let mut execs = self.get_executions(&ex.job_name).await.unwrap_or_else(|e| {
            error!(job = %ex.job_name, err = %e, "store: no executions found for job after write");
            Vec::new()
        });

        if execs.len() > MAX_EXECUTIONS {
            execs.sort_by(cmp_started_at);
            let delete_count = execs.len() - MAX_EXECUTIONS + 100;
            for old in execs.iter().take(delete_count) {
                let k = self.execution_key(old);
                if let Err(e) = self.kv.delete(&k).await {
                    error!(job = %old.job_name, execution = %old.key(), err = %e, "store: failed to delete overflowed execution");
                }
            }
        }

        Ok(key)
    }

    pub async fn get_executions(&self, job_name: &str) -> Result<Vec<Execution>> {
        let pairs = self.kv.list(&self.executions_job_prefix(job_name)).await?;
        let mut out = Vec::with_capacity(pairs.len());
        for pair in pairs {
            match serde_json::from_slice::<Execution>(&pair.value) {
                Ok(ex) => out.push(ex),
                Err(e) => {
                    error!(key = %pair.key, err = %e, "store: failed to decode execution, skipping");
                }
            }
        }
        Ok(out)
    }

    pub async fn get_executions_all(&self) -> Result<Vec<Execution>> {
        let pairs = self.kv.list(&self.executions_prefix()).await?;
        let mut out = Vec::with_capacity(pairs.len());
        for pair in pairs {
            match serde_json::from_slice::<Execution>(&pair.value) {
                Ok(ex) => out.push(ex),
                Err(e) => {
                    error!(key = %pair.key, err = %e, "store: failed to decode execution, skipping");
                }
            }
        }
        Ok(out)
    }

    /// The full cohort of the execution with the greatest `started_at`.
    pub async fn get_last_execution_group(&self, job_name: &str) -> Result<Vec<Execution>> {
        let execs = self.get_executions(job_name).await?;
        let Some(last) = execs.iter().max_by(|a, b| cmp_started_at(a, b)) else {
            return Ok(Vec::new());
        };
        self.get_execution_group(last).await
    }

    /// Cohort with `group == ex.group`.
    pub async fn get_execution_group(&self, ex: &Execution) -> Result<Vec<Execution>> {
        let execs = self.get_executions(&ex.job_name).await?;
        Ok(execs.into_iter().filter(|e| e.group == ex.group).collect())
    }

    /// Executions grouped by firing cohort, with group keys sorted
    /// descending for display/inspection convenience.
    pub async fn get_grouped_executions(
        &self,
        job_name: &str,
    ) -> Result<(HashMap<i64, Vec<Execution>>, Vec<i64>)> {
        let execs = self.get_executions(job_name).await?;
        let mut groups: HashMap<i64, Vec<Execution>> = HashMap::new();
        for ex in execs {
            groups.entry(ex.group).or_default().push(ex);
        }
        let mut keys: Vec<i64> = groups.keys().copied().collect();
        keys.sort_unstable_by(|a, b| b.cmp(a));
        Ok((groups, keys))
    }

    pub async fn delete_executions(&self, job_name: &str) -> Result<()> {
        self.kv.delete_tree(&self.executions_job_prefix(job_name)).await
    }

    /// Orphan cleanup: deletes every unfinished (`success == false`)
    /// execution belonging to `node_name`, across all jobs. Finished
    /// executions are preserved.
    pub async fn delete_executions_by_node_name(&self, node_name: &str) -> Result<()> {
        let execs = self.get_executions_all().await?;
        for ex in execs {
            if ex.node_name == node_name && !ex.success {
                let key = self.execution_key(&ex);
                if let Err(e) = self.kv.delete(&key).await {
                    if !e.is_not_found() {
                        error!(node = %node_name, execution = %ex.key(), err = %e, "store: failed to delete orphan execution");
                    }
                }
            }
        }
        Ok(())
    }
}
