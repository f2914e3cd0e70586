//! Job orchestration.
//!
//! A job moves `Resolving -> Planning -> Converting` and ends in
//! `Completed`, `PartiallyCompleted` or `Failed`. Clips are encoded
//! concurrently, bounded by the [`ResourceGovernor`], and collected before
//! the terminal state is decided. Delivery always sees clips in index order.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, warn, Instrument};

use shorts_media::{
    AspectConverter, ClipPlanner, ClipRenderer, FfprobeProbe, GeometryTransform, MediaError,
    MediaProbe, RenderRequest, Transcoder, YtDlpFetcher,
};
use shorts_models::{Clip, ClipSpec, JobId, JobReport, JobState, SourceVideo};

use crate::config::WorkerConfig;
use crate::delivery::{Delivery, DirectoryDelivery};
use crate::error::{WorkerError, WorkerResult};
use crate::governor::{JobSlots, ResourceGovernor};
use crate::logging::JobLogger;
use crate::metrics;
use crate::resolver::{SourceLimits, SourceReference, SourceResolver};
use crate::retry::{retry_async, wait_for_cancel, RetryConfig, RetryResult};
use crate::scratch::ScratchDir;

/// Runs jobs. Cloning shares collaborators and the governor.
#[derive(Clone)]
pub struct JobController {
    config: Arc<WorkerConfig>,
    resolver: SourceResolver,
    renderer: Arc<dyn ClipRenderer>,
    delivery: Arc<dyn Delivery>,
    governor: ResourceGovernor,
}

impl JobController {
    pub fn new(
        config: WorkerConfig,
        resolver: SourceResolver,
        renderer: Arc<dyn ClipRenderer>,
        delivery: Arc<dyn Delivery>,
    ) -> Self {
        let governor = ResourceGovernor::from_config(&config);
        Self {
            config: Arc::new(config),
            resolver,
            renderer,
            delivery,
            governor,
        }
    }

    /// Wire up yt-dlp, ffprobe, ffmpeg and directory delivery.
    pub fn from_config(config: WorkerConfig, output_dir: impl Into<PathBuf>) -> WorkerResult<Self> {
        config.validate()?;

        let probe: Arc<dyn MediaProbe> = Arc::new(FfprobeProbe::new());
        let fetcher = YtDlpFetcher::new()
            .with_timeout(config.download_timeout)
            .with_max_filesize(config.max_source_bytes);
        let resolver = SourceResolver::new(Arc::new(fetcher), Arc::clone(&probe))
            .with_limits(SourceLimits::from_config(&config));
        let transcoder = Transcoder::new(config.encoding.clone(), probe)
            .with_timeout_policy(config.encode_timeout)
            .with_tolerance(config.duration_tolerance);

        Ok(Self::new(
            config,
            resolver,
            Arc::new(transcoder),
            Arc::new(DirectoryDelivery::new(output_dir)),
        ))
    }

    /// Share encoder slots with other controllers.
    pub fn with_governor(mut self, governor: ResourceGovernor) -> Self {
        self.governor = governor;
        self
    }

    pub fn governor(&self) -> &ResourceGovernor {
        &self.governor
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Start a job in the background.
    pub fn submit(&self, reference: SourceReference) -> JobHandle {
        let job_id = JobId::new();
        let (state_tx, state_rx) = watch::channel(JobState::Resolving);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let controller = self.clone();
        let task_job_id = job_id.clone();
        let task = tokio::spawn(async move {
            controller
                .execute(task_job_id, reference, state_tx, cancel_rx)
                .await
        });

        JobHandle {
            job_id,
            state_rx,
            canceller: JobCanceller {
                cancel_tx: Arc::new(cancel_tx),
            },
            task,
        }
    }

    /// Run a job to completion on the current task.
    pub async fn run(&self, reference: SourceReference) -> JobReport {
        let (state_tx, _state_rx) = watch::channel(JobState::Resolving);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        self.execute(JobId::new(), reference, state_tx, cancel_rx)
            .await
    }

    async fn execute(
        &self,
        job_id: JobId,
        reference: SourceReference,
        state_tx: watch::Sender<JobState>,
        cancel_rx: watch::Receiver<bool>,
    ) -> JobReport {
        let logger = JobLogger::new(&job_id, "shorts");
        let span = logger.create_span();
        let started = Instant::now();
        let run = JobRun {
            job_id,
            logger,
            state_tx,
            cancel_rx,
            started_at: Utc::now(),
        };

        let report = self.run_job(&run, &reference).instrument(span).await;

        metrics::record_job(report.state, started.elapsed().as_secs_f64());
        run.logger.log_completion(
            report.state,
            &format!(
                "{} ready, {} failed in {:.1}s",
                report.ready.len(),
                report.failed.len(),
                started.elapsed().as_secs_f64()
            ),
        );
        report
    }

    async fn run_job(&self, run: &JobRun, reference: &SourceReference) -> JobReport {
        run.logger.log_start(&reference.to_string());

        let scratch = match ScratchDir::create(&self.config.work_dir, &run.job_id).await {
            Ok(scratch) => scratch,
            Err(e) => {
                let error = WorkerError::job_failed(format!("cannot create scratch directory: {}", e));
                run.logger.log_error(&error.to_string());
                run.advance(JobState::Failed);
                return JobReport::job_failed(run.job_id.clone(), None, error.to_string(), run.started_at);
            }
        };

        let downloads_dir = scratch.downloads_dir();
        let resolved = tokio::select! {
            biased;
            _ = wait_for_cancel(run.cancel_rx.clone()) => Err(WorkerError::Cancelled),
            result = self.resolver.resolve(reference, &downloads_dir) => result,
        };
        let source = match resolved {
            Ok(source) => source,
            Err(e) => return self.abort(run, scratch, None, e).await,
        };

        run.advance(JobState::Planning);
        let (specs, transform) = match self.plan(&run.job_id, &source) {
            Ok(plan) => plan,
            Err(e) => return self.abort(run, scratch, Some(&source), e).await,
        };
        if *run.cancel_rx.borrow() {
            return self.abort(run, scratch, Some(&source), WorkerError::Cancelled).await;
        }
        run.logger.log_progress(&format!(
            "planned {} clip(s) of up to {}s, {} {:?}",
            specs.len(),
            self.config.max_clip_duration,
            transform.policy(),
            transform.output_size()
        ));

        run.advance(JobState::Converting);
        let (clips, job_error) = self.convert(run, &source, &scratch, specs, transform).await;

        let mut report = JobReport::from_clips(
            run.job_id.clone(),
            &source,
            &clips,
            job_error,
            run.started_at,
        );

        let (confirmed, transfers_complete) = if report.is_deliverable() {
            self.deliver(run, &mut report).await
        } else {
            (Vec::new(), true)
        };

        let cleanup = if transfers_complete {
            scratch.cleanup().await
        } else {
            run.logger
                .log_warning("keeping undelivered clips in scratch until the stale sweep");
            match scratch.remove_files(&confirmed).await {
                Ok(()) => scratch.remove_intermediates().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = cleanup {
            run.logger.log_warning(&format!("scratch cleanup failed: {}", e));
        }

        run.advance(report.state);
        report.finished_at = Utc::now();
        report
    }

    /// Clip boundaries and the geometry transform, both derived from the
    /// probed metadata alone.
    fn plan(
        &self,
        job_id: &JobId,
        source: &SourceVideo,
    ) -> WorkerResult<(Vec<ClipSpec>, GeometryTransform)> {
        let specs = ClipPlanner::new(self.config.max_clip_duration)
            .plan(job_id, source.duration)
            .map_err(|e| WorkerError::planning(e.to_string()))?;
        let transform = AspectConverter::new(
            self.config.output_format,
            self.config.fit_policy,
            self.config.pad_background.clone(),
        )
        .plan(source.width, source.height)
        .map_err(|e| WorkerError::planning(e.to_string()))?;
        Ok((specs, transform))
    }

    /// Fan out one encode task per spec and collect every outcome.
    ///
    /// Returns the clips (index-aligned with the specs) and the job-level
    /// error, if one stopped the stage early.
    async fn convert(
        &self,
        run: &JobRun,
        source: &SourceVideo,
        scratch: &ScratchDir,
        specs: Vec<ClipSpec>,
        transform: GeometryTransform,
    ) -> (Vec<Clip>, Option<String>) {
        let stem = source.stem();
        let mut clips: Vec<Clip> = specs
            .into_iter()
            .map(|spec| {
                let path = scratch.clip_path(&spec, &stem);
                Clip::pending(spec, path)
            })
            .collect();

        let slots = self.governor.job_slots();
        let (abort_tx, abort_rx) = watch::channel(false);
        let retry = self.config.clip_retry().with_cancel(abort_rx.clone());

        let mut tasks = JoinSet::new();
        for clip in &clips {
            let request = RenderRequest {
                source: source.path.clone(),
                spec: clip.spec.clone(),
                transform: transform.clone(),
                output: clip.path.clone(),
            };
            let renderer = Arc::clone(&self.renderer);
            let slots = slots.clone();
            let retry = retry.clone();
            let cancel_rx = abort_rx.clone();
            tasks.spawn(
                async move {
                    let index = request.spec.index;
                    let started = Instant::now();
                    let (result, encodes) =
                        render_clip(renderer, slots, retry, request, cancel_rx).await;
                    (index, result, encodes, started.elapsed())
                }
                .in_current_span(),
            );
        }

        let mut job_error: Option<String> = None;
        let mut cancelled = false;
        loop {
            tokio::select! {
                joined = tasks.join_next() => {
                    let Some(joined) = joined else { break };
                    let (index, result, encodes, elapsed) = match joined {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            error!(job_id = %run.job_id, "Encode task ended abnormally: {}", e);
                            continue;
                        }
                    };
                    let Some(clip) = clips.get_mut(index) else {
                        continue;
                    };
                    if let Some(fatal) = record_outcome(clip, result, encodes, elapsed) {
                        if job_error.is_none() {
                            run.logger.log_error(&format!(
                                "part {:02} failed fatally, cancelling remaining clips: {}",
                                index + 1,
                                fatal
                            ));
                            job_error = Some(format!("part {:02}: {}", index + 1, fatal));
                            abort_tx.send_replace(true);
                        }
                    }
                }
                _ = wait_for_cancel(run.cancel_rx.clone()), if !cancelled => {
                    cancelled = true;
                    run.logger.log_warning("cancellation requested, stopping encodes");
                    abort_tx.send_replace(true);
                }
            }
        }

        for clip in clips.iter_mut().filter(|c| !c.status.is_terminal()) {
            let attempts = clip.attempts;
            clip.fail("encode task did not finish", attempts);
        }

        if cancelled && job_error.is_none() {
            job_error = Some(WorkerError::Cancelled.to_string());
        }
        (clips, job_error)
    }

    /// Hand ready clips to the delivery layer. Returns the scratch copies
    /// whose transfer was confirmed, and whether every transfer was.
    async fn deliver(&self, run: &JobRun, report: &mut JobReport) -> (Vec<PathBuf>, bool) {
        let receipt = match self.delivery.deliver(&run.job_id, &report.ready).await {
            Ok(receipt) => receipt,
            Err(e) => {
                run.logger.log_error(&e.to_string());
                report.error = Some(e.to_string());
                return (Vec::new(), false);
            }
        };

        let mut confirmed = Vec::new();
        for (index, dest) in receipt.delivered() {
            if let Some(clip) = report.ready.iter_mut().find(|c| c.index == index) {
                let scratch_copy = std::mem::replace(&mut clip.path, dest.to_path_buf());
                confirmed.push(scratch_copy);
            }
        }

        let failures: Vec<String> = receipt
            .failed()
            .map(|(index, e)| format!("part {:02}: {}", index + 1, e))
            .collect();
        if failures.is_empty() {
            return (confirmed, true);
        }
        let message = format!("{} clip(s) not delivered: {}", failures.len(), failures.join("; "));
        run.logger.log_error(&message);
        report.error = Some(message);
        (confirmed, false)
    }

    async fn abort(
        &self,
        run: &JobRun,
        scratch: ScratchDir,
        source: Option<&SourceVideo>,
        error: WorkerError,
    ) -> JobReport {
        run.logger.log_error(&error.to_string());
        if let Err(e) = scratch.cleanup().await {
            run.logger.log_warning(&format!("scratch cleanup failed: {}", e));
        }
        run.advance(JobState::Failed);
        JobReport::job_failed(run.job_id.clone(), source, error.to_string(), run.started_at)
    }
}

/// Per-job state shared by the stages.
struct JobRun {
    job_id: JobId,
    logger: JobLogger,
    state_tx: watch::Sender<JobState>,
    cancel_rx: watch::Receiver<bool>,
    started_at: DateTime<Utc>,
}

impl JobRun {
    fn advance(&self, next: JobState) {
        let current = *self.state_tx.borrow();
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            warn!(job_id = %self.job_id, from = %current, to = %next, "Ignoring invalid state transition");
            return;
        }
        self.state_tx.send_replace(next);
        self.logger.log_transition(current, next);
    }
}

/// Encode one clip with retries. Each attempt holds an encoder slot only
/// while the encoder runs. Once the encoder rejects a blurred-background
/// graph, later attempts use a solid pad. Also returns how many encodes were
/// started.
async fn render_clip(
    renderer: Arc<dyn ClipRenderer>,
    slots: JobSlots,
    retry: RetryConfig,
    request: RenderRequest,
    cancel_rx: watch::Receiver<bool>,
) -> (RetryResult<Clip, WorkerError>, u32) {
    let encodes = AtomicU32::new(0);
    let encoder_rejected = AtomicBool::new(false);
    let fallback = request.plain_fallback();
    let index = request.spec.index;

    let result = retry_async(&retry, |attempt| {
        let renderer = Arc::clone(&renderer);
        let slots = &slots;
        let request = match &fallback {
            Some(plain) if encoder_rejected.load(Ordering::SeqCst) => {
                debug!(clip_index = index, attempt, "Retrying with a solid pad background");
                plain
            }
            _ => &request,
        };
        let cancel_rx = cancel_rx.clone();
        let encodes = &encodes;
        let encoder_rejected = &encoder_rejected;
        async move {
            let permit = tokio::select! {
                biased;
                _ = wait_for_cancel(cancel_rx.clone()) => return Err(WorkerError::Cancelled),
                permit = slots.acquire() => permit?,
            };
            encodes.fetch_add(1, Ordering::SeqCst);
            debug!(clip_index = index, attempt, "Encoding attempt");

            let result = renderer.render(request, cancel_rx).await;
            permit.release();

            result.map_err(|e| {
                if matches!(e, MediaError::EncodeFailed { .. }) {
                    encoder_rejected.store(true, Ordering::SeqCst);
                }
                let e = WorkerError::from(e);
                if e.is_retryable() {
                    warn!(clip_index = index, attempt, "Encode attempt failed: {}", e);
                }
                e
            })
        }
    })
    .await;

    (result, encodes.into_inner())
}

/// Apply an encode outcome to its clip. Returns the error when it is fatal
/// for the whole job.
fn record_outcome(
    clip: &mut Clip,
    result: RetryResult<Clip, WorkerError>,
    encodes: u32,
    elapsed: Duration,
) -> Option<WorkerError> {
    if encodes > 0 {
        clip.start_encoding();
    }
    match result {
        RetryResult::Success { value, attempts } => {
            let duration = value.duration.unwrap_or_else(|| value.spec.span());
            clip.path = value.path;
            clip.complete(duration, attempts);
            metrics::record_clip("ready", attempts, elapsed.as_secs_f64());
            None
        }
        RetryResult::Failed { error, .. } => {
            if !error.is_cancelled() {
                warn!(
                    clip_index = clip.spec.index,
                    attempts = encodes,
                    "Clip failed: {}",
                    error
                );
            }
            clip.fail(error.to_string(), encodes);
            metrics::record_clip("failed", encodes, elapsed.as_secs_f64());
            error.is_job_fatal().then_some(error)
        }
    }
}

/// Cancels a running job. Can be moved away from its [`JobHandle`].
#[derive(Debug, Clone)]
pub struct JobCanceller {
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl JobCanceller {
    /// Running encoders are killed and the job ends `Failed` without
    /// delivering anything.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }
}

/// A running job.
pub struct JobHandle {
    job_id: JobId,
    state_rx: watch::Receiver<JobState>,
    canceller: JobCanceller,
    task: JoinHandle<JobReport>,
}

impl JobHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Most recently published state.
    pub fn state(&self) -> JobState {
        *self.state_rx.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.state_rx.clone()
    }

    /// Ask the job to stop.
    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    pub fn canceller(&self) -> JobCanceller {
        self.canceller.clone()
    }

    /// Wait for the final report.
    pub async fn wait(self) -> WorkerResult<JobReport> {
        self.task
            .await
            .map_err(|e| WorkerError::job_failed(format!("job task ended abnormally: {}", e)))
    }
}
