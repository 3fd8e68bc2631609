//! Job record persistence as seen by the pipeline.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tubewiki_shared::{JobId, JobRecord, JobStatus, Result, TubeWikiError};
use tubewiki_storage::Storage;

/// Read-after-write consistent store of job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, id: JobId) -> Result<Option<JobRecord>>;

    async fn save(&self, record: &JobRecord) -> Result<()>;

    /// Atomically move `id` to `processing` if it is `pending`, or is
    /// `processing` with `updated_at` before `stale_before`. Returns whether
    /// the caller now owns the job.
    async fn claim(&self, id: JobId, stale_before: DateTime<Utc>) -> Result<bool>;

    /// Refresh `updated_at` of a `processing` job so its claim stays live.
    /// Returns whether the job was still `processing`.
    async fn touch(&self, id: JobId) -> Result<bool>;
}

#[async_trait]
impl JobStore for Storage {
    async fn get(&self, id: JobId) -> Result<Option<JobRecord>> {
        self.get_job(id).await
    }

    async fn save(&self, record: &JobRecord) -> Result<()> {
        self.save_job(record).await
    }

    async fn claim(&self, id: JobId, stale_before: DateTime<Utc>) -> Result<bool> {
        self.claim_job(id, stale_before).await
    }

    async fn touch(&self, id: JobId) -> Result<bool> {
        self.touch_job(id).await
    }
}

/// In-process store, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: JobRecord) -> Result<()> {
        self.lock()?.insert(record.id, record);
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<JobId, JobRecord>>> {
        self.jobs
            .lock()
            .map_err(|_| TubeWikiError::Storage("job store lock poisoned".into()))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, id: JobId) -> Result<Option<JobRecord>> {
        Ok(self.lock()?.get(&id).cloned())
    }

    async fn save(&self, record: &JobRecord) -> Result<()> {
        self.lock()?.insert(record.id, record.clone());
        Ok(())
    }

    async fn claim(&self, id: JobId, stale_before: DateTime<Utc>) -> Result<bool> {
        let mut jobs = self.lock()?;
        let Some(record) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        let claimable = match record.status {
            JobStatus::Pending => true,
            JobStatus::Processing => record.updated_at < stale_before,
            JobStatus::Completed | JobStatus::Failed => false,
        };
        if claimable {
            record.status = JobStatus::Processing;
            record.updated_at = Utc::now();
        }
        Ok(claimable)
    }

    async fn touch(&self, id: JobId) -> Result<bool> {
        let mut jobs = self.lock()?;
        match jobs.get_mut(&id) {
            Some(record) if record.status == JobStatus::Processing => {
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn memory_claim_is_exclusive() {
        let store = MemoryJobStore::new();
        store
            .insert(JobRecord::pending(JobId(1), "u", "src"))
            .unwrap();
        let stale_before = Utc::now() - Duration::minutes(15);

        assert!(store.claim(JobId(1), stale_before).await.unwrap());
        assert!(!store.claim(JobId(1), stale_before).await.unwrap());
        assert!(!store.claim(JobId(2), stale_before).await.unwrap());

        let record = store.get(JobId(1)).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn memory_reclaims_stale_processing() {
        let store = MemoryJobStore::new();
        let mut record = JobRecord::pending(JobId(1), "u", "src");
        record.status = JobStatus::Processing;
        record.updated_at = Utc::now() - Duration::hours(2);
        store.insert(record).unwrap();

        assert!(store.claim(JobId(1), Utc::now() - Duration::minutes(15)).await.unwrap());
    }

    #[tokio::test]
    async fn memory_touch_only_refreshes_processing() {
        let store = MemoryJobStore::new();
        let mut record = JobRecord::pending(JobId(1), "u", "src");
        store.insert(record.clone()).unwrap();
        assert!(!store.touch(JobId(1)).await.unwrap());

        record.status = JobStatus::Processing;
        record.updated_at = Utc::now() - Duration::hours(2);
        store.insert(record).unwrap();

        assert!(store.touch(JobId(1)).await.unwrap());
        assert!(!store.claim(JobId(1), Utc::now() - Duration::minutes(15)).await.unwrap());
    }
}
