mod execution;
mod job;
mod processor;

pub use execution::{cmp_started_at, Execution};
pub use job::{
    HttpProperties, Job, JobMetaData, JobStatus, CONCURRENCY_ALLOW, CONCURRENCY_FORBID,
    ONEWAY_SCHEDULE,
};
pub use processor::{Processor, DEFAULT_MAX_EXECUTION_LIMIT};
