use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use super::{parse_job_time, Job};
use crate::cache::CacheStore;
use crate::error::Result;
use crate::media::sanitize;

const UPDATE_CAPACITY: usize = 256;

/// Job snapshots on disk plus an in-memory subject -> job ids index
#[derive(Debug, Clone)]
pub struct JobStore {
    cache: CacheStore,
    index: Arc<RwLock<HashMap<String, Vec<String>>>>,
    updates: broadcast::Sender<Job>,
}

impl JobStore {
    /// Open the store and index the snapshots already on disk
    pub async fn open(cache: CacheStore) -> Result<Self> {
        cache.initialize().await?;
        let store = Self {
            cache,
            index: Arc::new(RwLock::new(HashMap::new())),
            updates: broadcast::channel(UPDATE_CAPACITY).0,
        };

        let indexed = store.rebuild_index().await?;
        info!("📊 Job store initialized with {} snapshots", indexed);
        Ok(store)
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Persist a snapshot, replacing the previous one
    pub async fn save(&self, job: &Job) -> Result<()> {
        self.cache.put_job(&job.job_id, job).await?;
        self.remember(&job.subject_id, &job.job_id).await;
        debug!("Saved job {} ({}, {:.0}%)", job.job_id, job.status, job.progress * 100.0);
        // no receivers is fine
        let _ = self.updates.send(job.clone());
        Ok(())
    }

    /// Every snapshot saved from now on, in write order
    pub fn subscribe(&self) -> broadcast::Receiver<Job> {
        self.updates.subscribe()
    }

    pub async fn load(&self, job_id: &str) -> Option<Job> {
        self.cache.get_job(job_id).await
    }

    pub async fn remove(&self, job_id: &str) -> Result<bool> {
        let removed = self.cache.remove_job(job_id).await?;
        let mut index = self.index.write().await;
        for ids in index.values_mut() {
            ids.retain(|id| id != job_id);
        }
        Ok(removed)
    }

    /// Most recently created job for a subject.
    ///
    /// Merges the index with a scan of the snapshot directory, so jobs written
    /// by other processes are seen too. Ids without a parseable timestamp are
    /// skipped.
    pub async fn latest_for_subject(&self, subject_id: &str) -> Result<Option<Job>> {
        let mut job_ids: HashSet<String> = self
            .index
            .read()
            .await
            .get(subject_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        // ids end with the sanitized subject, which narrows the files to read
        let suffix = format!("_{}", sanitize(subject_id));
        let on_disk = self.cache.list_job_ids().await?;
        job_ids.extend(on_disk.into_iter().filter(|id| id.ends_with(&suffix)));

        let mut candidates = Vec::new();
        for job_id in &job_ids {
            match self.load(job_id).await {
                Some(job) if job.subject_id == subject_id => candidates.push(job),
                Some(_) => {}
                None => debug!("Job snapshot {} is gone or unreadable", job_id),
            }
        }

        for job in &candidates {
            self.remember(&job.subject_id, &job.job_id).await;
        }
        Ok(pick_latest(candidates))
    }

    /// Every readable snapshot on disk
    async fn scan(&self) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        for file_id in self.cache.list_job_ids().await? {
            match self.cache.get_job::<Job>(&file_id).await {
                Some(job) => jobs.push(job),
                None => warn!("Skipping unreadable job snapshot {}", file_id),
            }
        }
        Ok(jobs)
    }

    async fn rebuild_index(&self) -> Result<usize> {
        let jobs = self.scan().await?;
        let mut index = self.index.write().await;
        index.clear();
        for job in &jobs {
            index.entry(job.subject_id.clone()).or_default().push(job.job_id.clone());
        }
        Ok(jobs.len())
    }

    async fn remember(&self, subject_id: &str, job_id: &str) {
        let mut index = self.index.write().await;
        let ids = index.entry(subject_id.to_string()).or_default();
        if !ids.iter().any(|id| id == job_id) {
            ids.push(job_id.to_string());
        }
    }
}

fn pick_latest(jobs: Vec<Job>) -> Option<Job> {
    jobs.into_iter()
        .filter_map(|job| match parse_job_time(&job.job_id) {
            Some(created) => Some((created, job)),
            None => {
                warn!("Skipping job with malformed id: {}", job.job_id);
                None
            }
        })
        .max_by_key(|(created, _)| *created)
        .map(|(_, job)| job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{make_job_id, ChapterSource, JobStatus, ProcessingMode};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn job_at(subject_id: &str, hour: u32) -> Job {
        let mut job = Job::new(subject_id, ProcessingMode::Detailed, ChapterSource::Auto);
        job.job_id = make_job_id(subject_id, Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap());
        job
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = JobStore::open(CacheStore::new(temp_dir.path().to_path_buf())).await.unwrap();

        let mut job = job_at("vid", 1);
        store.save(&job).await.unwrap();
        job.status = JobStatus::Processing;
        store.save(&job).await.unwrap();

        assert_eq!(store.load(&job.job_id).await.unwrap().status, JobStatus::Processing);
        assert!(store.load("job_missing").await.is_none());
    }

    #[tokio::test]
    async fn test_latest_by_embedded_time() {
        let temp_dir = TempDir::new().unwrap();
        let store = JobStore::open(CacheStore::new(temp_dir.path().to_path_buf())).await.unwrap();

        for job in [job_at("vid", 9), job_at("vid", 11), job_at("vid", 10), job_at("other", 23)] {
            store.save(&job).await.unwrap();
        }

        let latest = store.latest_for_subject("vid").await.unwrap().unwrap();
        assert_eq!(latest.job_id, job_at("vid", 11).job_id);
        assert!(store.latest_for_subject("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_finds_foreign_snapshots_and_skips_bad_ids() {
        let temp_dir = TempDir::new().unwrap();
        let cache = CacheStore::new(temp_dir.path().to_path_buf());
        let store = JobStore::open(cache.clone()).await.unwrap();

        // written behind the store's back
        let good = job_at("vid", 8);
        cache.put_job(&good.job_id, &good).await.unwrap();
        let mut bad = job_at("vid", 12);
        bad.job_id = "job_garbage".to_string();
        cache.put_job(&bad.job_id, &bad).await.unwrap();
        tokio::fs::write(cache.job_path("job_torn"), "{not json").await.unwrap();

        let latest = store.latest_for_subject("vid").await.unwrap().unwrap();
        assert_eq!(latest.job_id, good.job_id);
    }

    #[tokio::test]
    async fn test_subscribers_see_saved_snapshots() {
        let temp_dir = TempDir::new().unwrap();
        let store = JobStore::open(CacheStore::new(temp_dir.path().to_path_buf())).await.unwrap();
        let mut updates = store.subscribe();

        let mut job = job_at("vid", 9);
        store.save(&job).await.unwrap();
        job.advance(0.5);
        store.save(&job).await.unwrap();

        assert_eq!(updates.try_recv().unwrap().progress, 0.0);
        assert_eq!(updates.try_recv().unwrap().progress, 0.5);
        assert!(updates.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_newer_foreign_snapshot_beats_indexed_job() {
        let temp_dir = TempDir::new().unwrap();
        let cache = CacheStore::new(temp_dir.path().to_path_buf());
        let store = JobStore::open(cache.clone()).await.unwrap();

        let indexed = job_at("vid", 14);
        store.save(&indexed).await.unwrap();
        assert_eq!(store.latest_for_subject("vid").await.unwrap().unwrap().job_id, indexed.job_id);

        // another process writes a newer job for the same subject
        let foreign = job_at("vid", 15);
        cache.put_job(&foreign.job_id, &foreign).await.unwrap();
        assert_eq!(store.latest_for_subject("vid").await.unwrap().unwrap().job_id, foreign.job_id);
    }

    #[tokio::test]
    async fn test_suffix_match_still_checks_subject() {
        let temp_dir = TempDir::new().unwrap();
        let store = JobStore::open(CacheStore::new(temp_dir.path().to_path_buf())).await.unwrap();

        // "a_vid" ids also end in "_vid"
        store.save(&job_at("a_vid", 20)).await.unwrap();
        let own = job_at("vid", 10);
        store.save(&own).await.unwrap();

        assert_eq!(store.latest_for_subject("vid").await.unwrap().unwrap().job_id, own.job_id);
    }

    #[tokio::test]
    async fn test_reopen_rebuilds_index() {
        let temp_dir = TempDir::new().unwrap();
        let cache = CacheStore::new(temp_dir.path().to_path_buf());
        let job = job_at("vid", 3);
        JobStore::open(cache.clone()).await.unwrap().save(&job).await.unwrap();

        let reopened = JobStore::open(cache).await.unwrap();
        assert_eq!(reopened.latest_for_subject("vid").await.unwrap().unwrap().job_id, job.job_id);

        assert!(reopened.remove(&job.job_id).await.unwrap());
        assert!(reopened.latest_for_subject("vid").await.unwrap().is_none());
    }
}
