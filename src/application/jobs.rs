//! In-memory job registry for long-running selection runs. Jobs live
//! only for the life of the process; a restart drops them.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use uuid::Uuid;

/// `(processed, total, selected)` callback fired as a run advances.
/// Calls are monotonic in all three arguments.
pub type ProgressSink = Arc<dyn Fn(u64, u64, u64) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobProgress {
    pub processed: u64,
    pub total: u64,
    pub selected: u64,
    /// floor(100 · processed / total); 0 while total is unknown.
    pub percent: u8,
}

impl JobProgress {
    fn update(&mut self, processed: u64, total: u64, selected: u64) {
        self.processed = processed;
        self.total = total;
        self.selected = selected;
        self.percent = if total > 0 {
            (processed * 100 / total).min(100) as u8
        } else {
            0
        };
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub parameters: Value,
    pub progress: JobProgress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// Process-wide registry. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct JobManager {
    jobs: Arc<Mutex<HashMap<String, Job>>>,
}

impl JobManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job and spawn its task. The task receives a progress
    /// sink that updates the job record atomically; its returned value
    /// (or error) lands in the job on completion.
    pub fn submit<F, Fut>(&self, parameters: Value, task: F) -> String
    where
        F: FnOnce(ProgressSink) -> Fut,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let job_id = Uuid::new_v4().simple().to_string();
        let now = Utc::now();
        {
            let mut jobs = self.jobs.lock().expect("job map lock");
            jobs.insert(
                job_id.clone(),
                Job {
                    job_id: job_id.clone(),
                    status: JobStatus::Pending,
                    parameters,
                    progress: JobProgress::default(),
                    created_at: now,
                    updated_at: now,
                    result: None,
                    error: None,
                },
            );
        }

        let sink: ProgressSink = {
            let jobs = Arc::clone(&self.jobs);
            let job_id = job_id.clone();
            Arc::new(move |processed, total, selected| {
                let mut jobs = jobs.lock().expect("job map lock");
                if let Some(job) = jobs.get_mut(&job_id) {
                    job.progress.update(processed, total, selected);
                    job.updated_at = Utc::now();
                }
            })
        };

        let future = task(Arc::clone(&sink));

        let jobs = Arc::clone(&self.jobs);
        let spawned_id = job_id.clone();
        tokio::spawn(async move {
            set_status(&jobs, &spawned_id, JobStatus::Running);
            match future.await {
                Ok(result) => {
                    let mut map = jobs.lock().expect("job map lock");
                    if let Some(job) = map.get_mut(&spawned_id) {
                        job.status = JobStatus::Completed;
                        job.result = Some(result);
                        job.updated_at = Utc::now();
                    }
                    info!("Job {} completed", spawned_id);
                }
                Err(err) => {
                    let mut map = jobs.lock().expect("job map lock");
                    if let Some(job) = map.get_mut(&spawned_id) {
                        job.status = JobStatus::Failed;
                        job.error = Some(err.to_string());
                        job.updated_at = Utc::now();
                    }
                    error!("Job {} failed: {}", spawned_id, err);
                }
            }
        });

        job_id
    }

    /// Deep snapshot of one job; never aliases internal state.
    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs.lock().expect("job map lock").get(job_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().expect("job map lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn set_status(jobs: &Arc<Mutex<HashMap<String, Job>>>, job_id: &str, status: JobStatus) {
    let mut map = jobs.lock().expect("job map lock");
    if let Some(job) = map.get_mut(job_id) {
        job.status = status;
        job.updated_at = Utc::now();
    }
}
