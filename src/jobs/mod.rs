// sitevault/src/jobs/mod.rs
//
// Durable queue of deferred post-capture actions. Capture enqueues and
// returns immediately; the scheduler later invokes the worker, which
// drains at most one job per run under a single-flight lock, so two
// overlapping worker invocations can never upload the same archive
// twice. A failed job stays queued and is retried on the next run.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::remote;
use crate::state::{LockFile, StateStore};

pub const JOBS_KEY: &str = "jobs";
const WORKER_LOCK: &str = "jobs.lock";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub action: String,
    pub action_data: String,
    pub action_title: String,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

#[derive(Debug)]
pub enum WorkerOutcome {
    /// Nothing queued.
    Idle,
    /// Another worker invocation holds the lock.
    AlreadyRunning,
    /// The job ran to completion and was removed from the queue.
    Completed(Job),
    /// The job failed and stays queued for the next run.
    Failed(Job),
}

pub struct JobQueue {
    store: StateStore,
}

impl JobQueue {
    pub fn new(store: StateStore) -> Self {
        JobQueue { store }
    }

    pub fn list(&self) -> Vec<Job> {
        self.store.get(JOBS_KEY).unwrap_or_default()
    }

    fn save(&self, jobs: &[Job]) -> Result<()> {
        self.store
            .put(JOBS_KEY, &jobs)
            .context("Failed to persist the jobs queue")
    }

    /// Appends a job to the back of the queue.
    pub fn enqueue(&self, action: &str, action_data: &str, action_title: &str) -> Result<Job> {
        let job = Job {
            id: Uuid::new_v4(),
            action: action.to_string(),
            action_data: action_data.to_string(),
            action_title: action_title.to_string(),
            enqueued_at: Utc::now(),
            attempts: 0,
            last_error: None,
        };

        let mut jobs = self.list();
        jobs.push(job.clone());
        self.save(&jobs)?;

        Ok(job)
    }

    /// The oldest queued job, if any.
    pub fn next_job(&self) -> Option<Job> {
        self.list().into_iter().next()
    }

    /// Removes a finished job from the queue.
    pub fn complete(&self, id: Uuid) -> Result<()> {
        let jobs: Vec<Job> = self.list().into_iter().filter(|j| j.id != id).collect();
        self.save(&jobs)
    }

    /// Records a failed attempt, leaving the job queued for retry.
    pub fn record_failure(&self, id: Uuid, error: &str) -> Result<Option<Job>> {
        let mut jobs = self.list();
        let mut updated = None;
        for job in jobs.iter_mut() {
            if job.id == id {
                job.attempts += 1;
                job.last_error = Some(error.to_string());
                updated = Some(job.clone());
            }
        }
        self.save(&jobs)?;
        Ok(updated)
    }

    /// Worker entry point: process at most one job to completion.
    ///
    /// Runs outside the request/response cycle with the extended
    /// `job_timeout_secs` budget, not a request budget.
    pub async fn run_worker(&self, app_config: &AppConfig) -> Result<WorkerOutcome> {
        let _lock = match LockFile::acquire(self.store.dir(), WORKER_LOCK) {
            Ok(lock) => lock,
            Err(AppError::Locked(_)) => {
                println!("Jobs worker already running; nothing to do");
                return Ok(WorkerOutcome::AlreadyRunning);
            }
            Err(e) => return Err(e.into()),
        };

        let Some(job) = self.next_job() else {
            return Ok(WorkerOutcome::Idle);
        };

        println!("Running job: {} ({})", job.action_title, job.action);
        let budget = Duration::from_secs(app_config.site.job_timeout_secs);

        let result = match tokio::time::timeout(budget, execute_job(app_config, &job)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "Job exceeded its {}s time budget",
                budget.as_secs()
            )),
        };

        match result {
            Ok(()) => {
                self.complete(job.id)?;
                println!("✓ Job completed: {}", job.action_title);
                Ok(WorkerOutcome::Completed(job))
            }
            Err(e) => {
                eprintln!("Job failed, leaving it queued: {}", e);
                let failed = self
                    .record_failure(job.id, &e.to_string())?
                    .unwrap_or(job);
                Ok(WorkerOutcome::Failed(failed))
            }
        }
    }
}

/// Dispatches one job by its action identifier.
async fn execute_job(app_config: &AppConfig, job: &Job) -> Result<()> {
    if let Some(provider_key) = job.action.strip_prefix("upload_") {
        let provider = remote::find_provider(app_config, provider_key).ok_or_else(|| {
            anyhow::anyhow!("No remote provider configured for key '{}'", provider_key)
        })?;
        if !provider.is_setup() {
            anyhow::bail!("Remote provider '{}' is not set up", provider_key);
        }

        provider.upload(Path::new(&job.action_data)).await?;
        return Ok(());
    }

    anyhow::bail!("Unknown job action: {}", job.action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn queue_in(dir: &Path) -> JobQueue {
        JobQueue::new(StateStore::new(dir).unwrap())
    }

    fn sample_config(dir: &Path) -> AppConfig {
        let raw = serde_json::from_value(serde_json::json!({
            "site_root": dir.join("site"),
            "backup_dir": dir.join("backups"),
            "database_url": "postgres://u:p@localhost/site",
            "table_prefix": "site_",
            "site_url": "https://example.com",
            "job_timeout_secs": 5
        }))
        .unwrap();
        AppConfig::from_raw(raw).unwrap()
    }

    #[test]
    fn test_enqueue_is_fifo_and_durable() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let queue = queue_in(dir.path());

        let first = queue.enqueue("upload_sftp", "/b/one.tar.gz", "Upload backup file to SFTP")?;
        queue.enqueue("upload_s3", "/b/one.tar.gz", "Upload backup file to S3 Object Storage")?;

        // A fresh queue over the same directory sees both jobs, oldest first.
        let reopened = queue_in(dir.path());
        let jobs = reopened.list();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, first.id);
        assert_eq!(reopened.next_job().unwrap().id, first.id);
        Ok(())
    }

    #[test]
    fn test_complete_removes_only_the_finished_job() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let queue = queue_in(dir.path());

        let first = queue.enqueue("upload_sftp", "/b/one.tar.gz", "first")?;
        let second = queue.enqueue("upload_sftp", "/b/two.tar.gz", "second")?;

        queue.complete(first.id)?;
        let jobs = queue.list();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, second.id);
        Ok(())
    }

    #[test]
    fn test_record_failure_keeps_job_queued() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let queue = queue_in(dir.path());

        let job = queue.enqueue("upload_sftp", "/b/one.tar.gz", "first")?;
        let updated = queue.record_failure(job.id, "connection refused")?.unwrap();

        assert_eq!(updated.attempts, 1);
        assert_eq!(updated.last_error.as_deref(), Some("connection refused"));
        assert_eq!(queue.list().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_worker_processes_one_job_per_invocation() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let config = sample_config(dir.path());
        let queue = queue_in(&config.site.backup_dir);

        // Neither provider is configured, so the first job fails and
        // stays queued; the second must not be touched at all.
        let first = queue.enqueue("upload_sftp", "/b/one.tar.gz", "first")?;
        let second = queue.enqueue("upload_s3", "/b/one.tar.gz", "second")?;

        let outcome = queue.run_worker(&config).await?;
        match outcome {
            WorkerOutcome::Failed(job) => assert_eq!(job.id, first.id),
            other => panic!("expected Failed, got {:?}", other),
        }

        let jobs = queue.list();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].attempts, 1);
        assert!(jobs[0].last_error.is_some());
        assert_eq!(jobs[1].id, second.id);
        assert_eq!(jobs[1].attempts, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_worker_is_single_flight() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let config = sample_config(dir.path());
        let queue = queue_in(&config.site.backup_dir);
        queue.enqueue("upload_sftp", "/b/one.tar.gz", "first")?;

        let _held = LockFile::acquire(queue.store.dir(), WORKER_LOCK)?;
        let outcome = queue.run_worker(&config).await?;
        assert!(matches!(outcome, WorkerOutcome::AlreadyRunning));

        // The held lock means the job was never attempted.
        assert_eq!(queue.list()[0].attempts, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_worker_idle_on_empty_queue() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let config = sample_config(dir.path());
        let queue = queue_in(&config.site.backup_dir);

        let outcome = queue.run_worker(&config).await?;
        assert!(matches!(outcome, WorkerOutcome::Idle));
        Ok(())
    }
}
