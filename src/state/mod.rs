use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::job::Job;

/// Where job records live. Implementations must be safe to share across tasks.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: Job);

    async fn get(&self, id: Uuid) -> Option<Job>;

    /// Overwrites an existing record. Returns false, and stores nothing, when the
    /// job is gone.
    async fn replace(&self, job: Job) -> bool;

    async fn remove(&self, id: Uuid) -> Option<Job>;

    /// Jobs whose expiry is at or before `now`.
    async fn list_expired(&self, now: DateTime<Utc>) -> Vec<Job>;

    async fn list_by_session(&self, session_id: &str) -> Vec<Job>;
}

/// Process-local store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: Job) {
        self.jobs.lock().await.insert(job.id, job);
    }

    async fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.lock().await.get(&id).cloned()
    }

    async fn replace(&self, job: Job) -> bool {
        match self.jobs.lock().await.get_mut(&job.id) {
            Some(slot) => {
                *slot = job;
                true
            }
            None => false,
        }
    }

    async fn remove(&self, id: Uuid) -> Option<Job> {
        self.jobs.lock().await.remove(&id)
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Vec<Job> {
        self.jobs
            .lock()
            .await
            .values()
            .filter(|job| job.is_expired(now))
            .cloned()
            .collect()
    }

    async fn list_by_session(&self, session_id: &str) -> Vec<Job> {
        self.jobs
            .lock()
            .await
            .values()
            .filter(|job| job.session_id == session_id)
            .cloned()
            .collect()
    }
}
