use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ChapterSource, Job, JobStatus, JobStore, ProcessingMode, CANCELLED_MESSAGE};
use crate::cache::{remove_if_exists, sweep_directory, ArtifactKey, ArtifactKind, CacheStore};
use crate::chapters::{
    structure_chapters, Chapter, ChapterPlanner, ContentResult, DescriptionSource, Paragraph,
    YtDlpDescriptionSource, FALLBACK_TITLE,
};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::llm::refiner::ProgressSink;
use crate::llm::{create_generator, TextGenerator, TextRefiner};
use crate::media::MediaDownloader;
use crate::screenshots::{
    annotate_paragraphs, attach_to_chapters, select_timestamps, FfmpegFrameCapture, FrameCapture,
};
use crate::transcript::{
    acquire_transcript, chunk_segments, truncate_segments, validate_timestamps, ChainedTranscriptSource,
    DocumentTranscriptSource, FileTranscriptSource, TranscriptSegment, TranscriptSource,
    TranscriptionProvider, WhisperTranscriber,
};

/// External collaborators the pipeline calls out to
#[derive(Clone)]
pub struct PipelineComponents {
    pub transcripts: Arc<dyn TranscriptSource>,
    pub transcriber: Arc<dyn TranscriptionProvider>,
    pub generator: Arc<dyn TextGenerator>,
    pub descriptions: Arc<dyn DescriptionSource>,
    pub frames: Arc<dyn FrameCapture>,
}

impl PipelineComponents {
    /// Concrete collaborators built from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let download_timeout = Duration::from_secs(config.screenshots.download_timeout_seconds);
        let generator: Arc<dyn TextGenerator> = Arc::from(create_generator(&config.llm)?);

        let files: Arc<dyn TranscriptSource> =
            Arc::new(FileTranscriptSource::new(config.sources.transcripts_dir.clone()));
        let transcripts: Arc<dyn TranscriptSource> = match &config.sources.documents_dir {
            Some(dir) => Arc::new(ChainedTranscriptSource::new(vec![
                files,
                Arc::new(DocumentTranscriptSource::new(
                    dir.clone(),
                    config.processing.max_transcript_chars,
                    config.processing.chunk_size,
                )),
            ])),
            None => files,
        };

        Ok(Self {
            transcripts,
            transcriber: Arc::new(WhisperTranscriber::new(config.sources.clone(), download_timeout)?),
            generator,
            descriptions: Arc::new(YtDlpDescriptionSource::new(config.sources.clone())),
            frames: Arc::new(FfmpegFrameCapture::new(
                MediaDownloader::new(config.sources.clone(), download_timeout),
                config.screenshots.temp_dir.clone(),
                config.screenshots.output_dir.clone(),
                config.sources.ffmpeg_path.clone(),
            )),
        })
    }
}

/// Cancellation and snapshot-write serialization for one running job
struct JobHandle {
    token: CancellationToken,
    write_lock: Mutex<()>,
}

impl JobHandle {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            token: CancellationToken::new(),
            write_lock: Mutex::new(()),
        })
    }
}

struct Inner {
    config: Config,
    components: PipelineComponents,
    store: JobStore,
    refiner: TextRefiner,
    planner: ChapterPlanner,
    permits: Arc<Semaphore>,
    running: RwLock<HashMap<String, Arc<JobHandle>>>,
}

/// Runs processing jobs through the pipeline and answers status queries
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

impl JobOrchestrator {
    pub async fn new(config: Config, components: PipelineComponents) -> Result<Self> {
        let store = JobStore::open(CacheStore::new(config.cache.cache_dir.clone())).await?;
        let prices = config.llm.price_table();

        let refiner = TextRefiner::new(
            components.generator.clone(),
            prices.clone(),
            &config.processing,
            config.llm.max_tokens,
        );
        let planner = ChapterPlanner::new(components.generator.clone(), components.descriptions.clone(), prices);
        let permits = Arc::new(Semaphore::new(config.jobs.max_concurrent_jobs.max(1)));

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                components,
                store,
                refiner,
                planner,
                permits,
                running: RwLock::new(HashMap::new()),
            }),
        })
    }

    pub fn store(&self) -> &JobStore {
        &self.inner.store
    }

    /// Snapshot updates of every job, as they are persisted
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Job> {
        self.inner.store.subscribe()
    }

    /// Create and persist a pending job
    pub async fn create_job(&self, subject_id: &str, mode: ProcessingMode, chapter_source: ChapterSource) -> Result<Job> {
        let job = Job::new(subject_id, mode, chapter_source);
        self.inner.store.save(&job).await?;
        info!("🆕 Created job {} ({}, {})", job.job_id, mode, chapter_source);
        Ok(job)
    }

    /// Create a job and run it in the background; returns the pending snapshot
    pub async fn submit(&self, subject_id: &str, mode: ProcessingMode, chapter_source: ChapterSource) -> Result<Job> {
        let job = self.create_job(subject_id, mode, chapter_source).await?;
        let handle = self.register(&job.job_id).await;

        let orchestrator = self.clone();
        let background = job.clone();
        tokio::spawn(async move {
            let job_id = background.job_id.clone();
            if let Err(e) = orchestrator.run_with_handle(background, handle).await {
                error!("Job {} failed: {}", job_id, e);
            }
        });
        Ok(job)
    }

    /// Create a job and run it on the current task
    pub async fn process(&self, subject_id: &str, mode: ProcessingMode, chapter_source: ChapterSource) -> Result<Job> {
        let job = self.create_job(subject_id, mode, chapter_source).await?;
        self.run(job).await
    }

    /// Run a pending job to its end state.
    ///
    /// Fatal pipeline errors are recorded on the job and returned. A job that
    /// gets cancelled returns `Ok` with its cancelled snapshot.
    pub async fn run(&self, job: Job) -> Result<Job> {
        let handle = self.register(&job.job_id).await;
        self.run_with_handle(job, handle).await
    }

    async fn register(&self, job_id: &str) -> Arc<JobHandle> {
        let mut running = self.inner.running.write().await;
        running.entry(job_id.to_string()).or_insert_with(JobHandle::new).clone()
    }

    #[tracing::instrument(skip(self, job, handle), fields(job_id = %job.job_id, subject_id = %job.subject_id))]
    async fn run_with_handle(&self, job: Job, handle: Arc<JobHandle>) -> Result<Job> {
        let job_id = job.job_id.clone();

        let outcome = match self.inner.permits.clone().acquire_owned().await {
            Ok(_permit) => self.execute(job, handle).await,
            Err(_) => Err(PipelineError::InvalidState {
                status: JobStatus::Pending,
                message: "job scheduler is shut down".into(),
            }),
        };

        self.inner.running.write().await.remove(&job_id);
        outcome
    }

    async fn execute(&self, job: Job, handle: Arc<JobHandle>) -> Result<Job> {
        let run = JobRun {
            job: Mutex::new(job),
            handle,
            store: self.inner.store.clone(),
        };

        if let Err(e) = run.set_status(JobStatus::Processing).await {
            return run.finish_interrupted(e).await;
        }

        let outcome = self.pipeline(&run).await;

        match outcome {
            Ok(result) => {
                let mut job = run.job.lock().await;
                job.status = JobStatus::Completed;
                job.result = Some(result);
                job.advance(1.0);
                let snapshot = job.clone();
                drop(job);

                match run.persist(&snapshot).await {
                    Ok(()) => {
                        info!("🎉 Job {} completed", snapshot.job_id);
                        Ok(snapshot)
                    }
                    Err(e) => run.finish_interrupted(e).await,
                }
            }
            Err(PipelineError::Cancelled) => run.finish_interrupted(PipelineError::Cancelled).await,
            Err(e) => {
                error!("Job failed: {}", e);
                let mut job = run.job.lock().await;
                job.status = JobStatus::Failed;
                job.error = Some(e.to_string());
                job.result = None;
                job.touch();
                let snapshot = job.clone();
                drop(job);

                match run.persist(&snapshot).await {
                    Ok(()) => Err(e),
                    Err(PipelineError::Cancelled) => run.finish_interrupted(PipelineError::Cancelled).await,
                    Err(persist_err) => {
                        warn!("Could not record failure of {}: {}", snapshot.job_id, persist_err);
                        Err(e)
                    }
                }
            }
        }
    }

    async fn pipeline(&self, run: &JobRun) -> Result<ContentResult> {
        let (subject_id, mode, source) = {
            let job = run.job.lock().await;
            (job.subject_id.clone(), job.mode, job.chapter_source)
        };
        let cache = self.inner.store.cache();

        if let Some(cached) = cache.get_final(&subject_id, mode, source).await {
            info!("📚 Cache hit for {} ({}, {})", subject_id, mode, source);
            return Ok(cached);
        }

        run.checkpoint(0.1, "Starting processing").await?;
        let segments = self.transcript(&subject_id).await?;
        run.ensure_active()?;

        let (paragraphs, mut stats, chapters, screenshots) = match mode {
            ProcessingMode::Simple => {
                let refined = self.inner.refiner.refine_whole(&segments).await?;
                run.checkpoint(0.5, "Simple processing completed").await?;
                let chapters = vec![simple_chapter(&refined.paragraphs)];
                (refined.paragraphs, refined.stats, Some(chapters), Vec::new())
            }
            ProcessingMode::Detailed | ProcessingMode::DetailedWithScreenshots => {
                let chunks = chunk_segments(&segments, self.inner.config.processing.chunk_size);
                debug!("Split transcript into {} chunks", chunks.len());
                let refined = self.inner.refiner.refine(&chunks, run).await?;
                run.checkpoint(0.5, "Detailed processing completed").await?;

                let mut paragraphs = refined.paragraphs;
                let mut screenshots = Vec::new();
                if mode == ProcessingMode::DetailedWithScreenshots {
                    let settings = &self.inner.config.screenshots;
                    let times: Vec<f64> = paragraphs.iter().map(|p| p.start_time).collect();
                    let selected = select_timestamps(&times, settings.interval_seconds, settings.max_per_subject);
                    screenshots = self
                        .inner
                        .components
                        .frames
                        .capture(&subject_id, &selected, &run.handle.token)
                        .await;
                    annotate_paragraphs(&mut paragraphs, &screenshots);
                    run.checkpoint(0.6, "Processing with screenshots completed").await?;
                }
                (paragraphs, refined.stats, None, screenshots)
            }
        };

        let paragraphs_key = ArtifactKey::new(&subject_id, ArtifactKind::Paragraphs(mode));
        if let Err(e) = cache.put(&paragraphs_key, &paragraphs).await {
            warn!("Could not cache paragraphs for {}: {}", subject_id, e);
        }

        let mut chapters = match chapters {
            Some(chapters) => chapters,
            None => {
                run.checkpoint(0.7, "Getting chapters").await?;
                let plan = self.inner.planner.plan(&subject_id, &paragraphs, source).await;
                stats.add(plan.stats);

                run.checkpoint(0.8, "Structuring chapters").await?;
                structure_chapters(&paragraphs, &plan.entries)
            }
        };

        if !screenshots.is_empty() {
            run.checkpoint(0.9, "Adding screenshots to chapters").await?;
            attach_to_chapters(&mut chapters, &screenshots);
        }

        let result = ContentResult {
            subject_id: subject_id.clone(),
            chapters,
            stats,
        };

        run.ensure_active()?;
        cache.put_final(mode, source, &result).await?;
        Ok(result)
    }

    /// Cached transcript, or acquire, truncate and cache a fresh one
    async fn transcript(&self, subject_id: &str) -> Result<Vec<TranscriptSegment>> {
        let cache = self.inner.store.cache();
        let key = ArtifactKey::new(subject_id, ArtifactKind::Transcript);

        let segments = match cache.get::<Vec<TranscriptSegment>>(&key).await {
            Some(segments) => {
                debug!("Using cached transcript for {}", subject_id);
                segments
            }
            None => {
                let segments = acquire_transcript(
                    self.inner.components.transcripts.as_ref(),
                    self.inner.components.transcriber.as_ref(),
                    subject_id,
                )
                .await?;
                let segments = truncate_segments(segments, self.inner.config.processing.max_transcript_chars);
                if let Err(e) = cache.put(&key, &segments).await {
                    warn!("Could not cache transcript for {}: {}", subject_id, e);
                }
                segments
            }
        };

        validate_timestamps(&segments)?;
        Ok(segments)
    }

    pub async fn status(&self, job_id: &str) -> Result<Job> {
        self.inner
            .store
            .load(job_id)
            .await
            .ok_or_else(|| PipelineError::NotFound(format!("Job not found: {}", job_id)))
    }

    pub async fn latest_for_subject(&self, subject_id: &str) -> Result<Job> {
        self.inner
            .store
            .latest_for_subject(subject_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("No processing job found for {}", subject_id)))
    }

    /// Mark a processing job cancelled; `false` for any other status
    pub async fn cancel(&self, job_id: &str) -> Result<bool> {
        let handle = self.inner.running.read().await.get(job_id).cloned();
        let _guard = match &handle {
            Some(handle) => Some(handle.write_lock.lock().await),
            None => None,
        };

        let mut job = self.status(job_id).await?;
        if job.status != JobStatus::Processing {
            debug!("Not cancelling {} in state {}", job_id, job.status);
            return Ok(false);
        }

        if let Some(handle) = &handle {
            handle.token.cancel();
        }
        job.status = JobStatus::Cancelled;
        job.error = Some(CANCELLED_MESSAGE.to_string());
        job.touch();
        self.inner.store.save(&job).await?;
        info!("🛑 Cancelled job {}", job_id);
        Ok(true)
    }

    /// Remove a job's screenshots and snapshot; never fails
    pub async fn cleanup(&self, job_id: &str) -> bool {
        let Some(job) = self.inner.store.load(job_id).await else {
            debug!("Nothing to clean up for {}", job_id);
            return false;
        };

        if let Some(result) = &job.result {
            for path in result.screenshot_paths() {
                if let Err(e) = remove_if_exists(std::path::Path::new(path)).await {
                    warn!("Failed to remove screenshot {}: {}", path, e);
                }
            }
        }

        match self.inner.store.remove(job_id).await {
            Ok(removed) => {
                info!("🧹 Cleaned up job {}", job_id);
                removed
            }
            Err(e) => {
                warn!("Failed to remove snapshot of {}: {}", job_id, e);
                false
            }
        }
    }

    /// Final result for a job key, from the cache or the subject's latest job
    pub async fn completed_result(
        &self,
        subject_id: &str,
        mode: ProcessingMode,
        chapter_source: ChapterSource,
    ) -> Result<ContentResult> {
        if let Some(result) = self.inner.store.cache().get_final(subject_id, mode, chapter_source).await {
            return Ok(result);
        }

        let job = self.latest_for_subject(subject_id).await?;
        let message = match job.status {
            JobStatus::Completed => {
                return job.result.ok_or_else(|| {
                    PipelineError::NotFound(format!("Completed job {} has no result", job.job_id))
                });
            }
            JobStatus::Failed => format!(
                "Video processing failed: {}",
                job.error.as_deref().unwrap_or("unknown error")
            ),
            JobStatus::Pending => "Video processing has not started".to_string(),
            JobStatus::Processing => format!(
                "Video processing is still in progress ({:.0}% complete)",
                job.progress * 100.0
            ),
            JobStatus::Cancelled => "Video processing was cancelled".to_string(),
        };

        Err(PipelineError::InvalidState {
            status: job.status,
            message,
        })
    }

    /// Remove cached artifacts and downloaded media older than the retention window
    pub async fn sweep_cache(&self) -> Result<usize> {
        let retention = self.inner.config.cache.retention();
        let cached = self.inner.store.cache().sweep_expired(retention).await?;
        let downloads = sweep_directory(self.inner.config.screenshots.temp_dir.clone(), retention).await?;
        Ok(cached + downloads)
    }
}

/// One execution of a job; owns the job record for its duration
struct JobRun {
    job: Mutex<Job>,
    handle: Arc<JobHandle>,
    store: JobStore,
}

impl JobRun {
    fn ensure_active(&self) -> Result<()> {
        if self.handle.token.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn set_status(&self, status: JobStatus) -> Result<()> {
        let snapshot = {
            let mut job = self.job.lock().await;
            job.status = status;
            job.touch();
            job.clone()
        };
        self.persist(&snapshot).await
    }

    async fn checkpoint(&self, progress: f64, stage: &str) -> Result<()> {
        let snapshot = {
            let mut job = self.job.lock().await;
            job.advance(progress);
            job.clone()
        };
        info!("Job {}: {} - {:.0}%", snapshot.job_id, stage, snapshot.progress * 100.0);
        self.persist(&snapshot).await
    }

    /// Write the snapshot unless the job was cancelled, here or on disk
    async fn persist(&self, snapshot: &Job) -> Result<()> {
        let _guard = self.handle.write_lock.lock().await;
        self.ensure_active()?;

        if let Some(on_disk) = self.store.load(&snapshot.job_id).await {
            if on_disk.status == JobStatus::Cancelled {
                self.handle.token.cancel();
                return Err(PipelineError::Cancelled);
            }
        }

        self.store.save(snapshot).await
    }

    /// Resolve a run that stopped because of cancellation or a write failure
    async fn finish_interrupted(&self, reason: PipelineError) -> Result<Job> {
        match reason {
            PipelineError::Cancelled => {
                let job_id = self.job.lock().await.job_id.clone();
                info!("Job {} stopped after cancellation", job_id);
                match self.store.load(&job_id).await {
                    Some(snapshot) => Ok(snapshot),
                    None => {
                        let mut job = self.job.lock().await.clone();
                        job.status = JobStatus::Cancelled;
                        job.error = Some(CANCELLED_MESSAGE.to_string());
                        Ok(job)
                    }
                }
            }
            other => Err(other),
        }
    }
}

#[async_trait]
impl ProgressSink for JobRun {
    async fn report(&self, progress: f64) {
        if let Err(e) = self.checkpoint(progress, "Processing transcript chunks").await {
            debug!("Progress not recorded: {}", e);
        }
    }
}

/// Simple mode: one chapter holding the single refined paragraph
fn simple_chapter(paragraphs: &[Paragraph]) -> Chapter {
    let start_time = paragraphs.first().map(|p| p.start_time).unwrap_or_default();
    Chapter {
        num: 0,
        title: FALLBACK_TITLE.to_string(),
        start_paragraph: 0,
        end_paragraph: paragraphs.len(),
        start_time,
        end_time: start_time + 1.0,
        paragraphs: paragraphs.iter().map(|p| p.text.clone()).collect(),
        paragraph_timestamps: paragraphs.iter().map(|p| p.start_time).collect(),
        screenshots: None,
    }
}
