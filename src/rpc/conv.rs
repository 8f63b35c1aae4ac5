use chrono::{DateTime, TimeZone, Utc};

use super::proto;
use crate::model::{Execution, HttpProperties, Job, JobMetaData, Processor};

fn millis_of(dt: Option<DateTime<Utc>>) -> i64 {
    dt.map(|d| d.timestamp_millis()).unwrap_or(0)
}

fn millis_to_dt(millis: i64) -> Option<DateTime<Utc>> {
    if millis == 0 {
        None
    } else {
        Utc.timestamp_millis_opt(millis).single()
    }
}

fn nanos_of(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_nanos_opt().unwrap_or(0)
}

fn nanos_opt_of(dt: Option<DateTime<Utc>>) -> i64 {
    dt.map(nanos_of).unwrap_or(0)
}

fn nanos_to_dt(nanos: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(nanos)
}

fn nanos_to_dt_opt(nanos: i64) -> Option<DateTime<Utc>> {
    if nanos == 0 {
        None
    } else {
        Some(Utc.timestamp_nanos(nanos))
    }
}

impl From<&Job> for proto::Job {
    fn from(j: &Job) -> Self {
        proto::Job {
            name: j.name.clone(),
            breif: j.breif.clone(),
            schedule: j.schedule.clone(),
            job_type: j.job_type.clone(),
            command: j.command.clone(),
            http_properties: Some(proto::HttpProperties {
                url: j.http_properties.url.clone(),
                method: j.http_properties.method.clone(),
                body: j.http_properties.body.clone(),
                headers: j.http_properties.headers.clone(),
                timeout: j.http_properties.timeout,
            }),
            disabled: j.disabled,
            owner: j.owner.clone(),
            owner_email: j.owner_email.clone(),
            concurrency: j.concurrency.clone(),
            is_done: j.is_done,
            metadata: Some(proto::JobMetaData {
                success_count: j.metadata.success_count,
                last_success: millis_of(j.metadata.last_success),
                error_count: j.metadata.error_count,
                last_error: millis_of(j.metadata.last_error),
            }),
            payload: j.payload.clone(),
            tags: j.tags.clone(),
            application: j.application.clone(),
        }
    }
}

impl From<proto::Job> for Job {
    fn from(p: proto::Job) -> Self {
        let http = p.http_properties.unwrap_or_default();
        let meta = p.metadata.unwrap_or_default();
        Job::builder()
            .name(p.name)
            .breif(p.breif)
            .schedule(p.schedule)
            .job_type(p.job_type)
            .command(p.command)
            .http_properties(HttpProperties {
                url: http.url,
                method: http.method,
                body: http.body,
                headers: http.headers,
                timeout: http.timeout,
            })
            .disabled(p.disabled)
            .owner(p.owner)
            .owner_email(p.owner_email)
            .concurrency(p.concurrency)
            .is_done(p.is_done)
            .metadata(JobMetaData {
                success_count: meta.success_count,
                last_success: millis_to_dt(meta.last_success),
                error_count: meta.error_count,
                last_error: millis_to_dt(meta.last_error),
            })
            .payload(p.payload)
            .tags(p.tags)
            .application(p.application)
            .build()
    }
}

impl From<&Processor> for proto::Processor {
    fn from(p: &Processor) -> Self {
        proto::Processor {
            application: p.application.clone(),
            node_name: p.node_name.clone(),
            ip: p.ip.clone(),
            port: p.port,
            status: p.status,
            max_execution_limit: p.max_execution_limit,
            undone: p.undone as i32,
        }
    }
}

impl From<proto::Processor> for Processor {
    fn from(p: proto::Processor) -> Self {
        Processor {
            application: p.application,
            node_name: p.node_name,
            ip: p.ip,
            port: p.port,
            status: p.status,
            max_execution_limit: p.max_execution_limit,
            undone: p.undone.max(0) as u64,
        }
    }
}

impl From<&Execution> for proto::Execution {
    fn from(ex: &Execution) -> Self {
        proto::Execution {
            job_name: ex.job_name.clone(),
            payload: ex.payload.clone(),
            tags: ex.tags.clone(),
            started_at: nanos_of(ex.started_at),
            finished_at: nanos_opt_of(ex.finished_at),
            success: ex.success,
            output: ex.output.clone(),
            node_name: ex.node_name.clone(),
            group: ex.group,
            application: ex.application.clone(),
            attempt: ex.attempt,
            concurrency: ex.concurrency.clone(),
        }
    }
}

impl From<proto::Execution> for Execution {
    fn from(p: proto::Execution) -> Self {
        Execution {
            job_name: p.job_name,
            payload: p.payload,
            tags: p.tags,
            started_at: nanos_to_dt(p.started_at),
            finished_at: nanos_to_dt_opt(p.finished_at),
            success: p.success,
            output: p.output,
            node_name: p.node_name,
            group: p.group,
            application: p.application,
            attempt: p.attempt,
            concurrency: p.concurrency,
        }
    }
}
