use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use anyhow::{Context, Result};
use humansize::{format_size, BINARY};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use crate::config::TranscodeConfig;
use crate::executor::EncoderRunner;
use crate::ffprobe::MediaProber;
use crate::heuristics::{is_already_target_codec, HeuristicDecision, TARGET_CODEC};
use crate::job::{Job, JobStatus};
use crate::pipeline::{run_job, WorkerContext};
use crate::postprocess::{FileOps, RealFileOps};
use crate::scan::{classify_path, scan_library, ScanResult};
use crate::store::{JobStore, SourceHistory};
use crate::watch::{watch_roots, LibraryWatcher, SettleTracker};

/// How often settled watch events are checked
const SETTLE_POLL: Duration = Duration::from_secs(1);
const WATCH_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Scan once, finish every job, return
    Once,
    /// Scan periodically and react to filesystem events until shutdown
    Continuous,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerOptions {
    pub mode: RunMode,
    pub max_concurrent: usize,
    pub scan_interval: Duration,
    /// Log what would be encoded instead of running jobs
    pub dry_run: bool,
}

impl SchedulerOptions {
    pub fn from_config(cfg: &TranscodeConfig, mode: RunMode) -> Self {
        Self {
            mode,
            max_concurrent: cfg.max_concurrent_jobs,
            scan_interval: Duration::from_secs(cfg.scan_interval_secs.max(1)),
            dry_run: false,
        }
    }
}

/// Source paths that currently have a job in flight
#[derive(Debug, Clone, Default)]
pub struct InFlightSet {
    inner: Arc<Mutex<HashSet<PathBuf>>>,
}

impl InFlightSet {
    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim `path`; `None` if another job already holds it
    pub fn try_claim(&self, path: &Path) -> Option<InFlightGuard> {
        if !self.lock().insert(path.to_path_buf()) {
            return None;
        }
        Some(InFlightGuard { set: self.clone(), path: path.to_path_buf() })
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases the claim when the worker holding it ends, however it ends
#[derive(Debug)]
pub struct InFlightGuard {
    set: InFlightSet,
    path: PathBuf,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.path);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched(String),
    AlreadyInFlight,
    RetryLimitReached,
    ShuttingDown,
    /// Dry run: evaluated and logged, no job created
    Previewed,
}

/// Totals for one `run`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub dispatched: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub deduplicated: usize,
    pub retry_limited: usize,
    pub previewed: usize,
}

/// Cooperative stop signal for a running scheduler
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn next_event(rx: &mut Option<mpsc::Receiver<PathBuf>>) -> Option<PathBuf> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Discovers candidates and feeds them into a bounded worker pool
pub struct Scheduler {
    config: Arc<TranscodeConfig>,
    store: JobStore,
    prober: Arc<dyn MediaProber>,
    encoder: Arc<dyn EncoderRunner>,
    file_ops: Arc<dyn FileOps>,
    options: SchedulerOptions,
    in_flight: InFlightSet,
    permits: Arc<Semaphore>,
    workers: JoinSet<Job>,
    history: HashMap<PathBuf, SourceHistory>,
    summary: RunSummary,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        config: TranscodeConfig,
        store: JobStore,
        prober: Arc<dyn MediaProber>,
        encoder: Arc<dyn EncoderRunner>,
        options: SchedulerOptions,
    ) -> Result<Self> {
        let history = store.history().context("Failed to load job history")?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            config: Arc::new(config),
            store,
            prober,
            encoder,
            file_ops: Arc::new(RealFileOps),
            permits: Arc::new(Semaphore::new(options.max_concurrent.max(1))),
            options,
            in_flight: InFlightSet::default(),
            workers: JoinSet::new(),
            history,
            summary: RunSummary::default(),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        })
    }

    /// Swap the filesystem layer used for the final rename sequence
    pub fn with_file_ops(mut self, file_ops: Arc<dyn FileOps>) -> Self {
        self.file_ops = file_ops;
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { tx: self.shutdown_tx.clone() }
    }

    pub fn in_flight(&self) -> &InFlightSet {
        &self.in_flight
    }

    pub fn config(&self) -> &TranscodeConfig {
        &self.config
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            config: self.config.clone(),
            store: self.store.clone(),
            prober: self.prober.clone(),
            encoder: self.encoder.clone(),
            file_ops: self.file_ops.clone(),
        }
    }

    /// Start a job for `path` unless one is already in flight. Waits for a
    /// free worker slot when the pool is saturated.
    pub async fn dispatch(&mut self, path: PathBuf, size: u64) -> Result<DispatchOutcome> {
        let Some(guard) = self.in_flight.try_claim(&path) else {
            debug!("Already in flight: {}", path.display());
            self.summary.deduplicated += 1;
            return Ok(DispatchOutcome::AlreadyInFlight);
        };

        let past = self.history.get(&path).cloned().unwrap_or_default();
        let limit = self.config.max_failed_attempts;
        if limit > 0 && past.failures >= limit {
            debug!("Retry limit ({}) reached for {}", limit, path.display());
            self.summary.retry_limited += 1;
            return Ok(DispatchOutcome::RetryLimitReached);
        }

        if self.options.dry_run {
            self.preview(&path, size).await;
            self.summary.previewed += 1;
            return Ok(DispatchOutcome::Previewed);
        }

        let permit = tokio::select! {
            permit = self.permits.clone().acquire_owned() => permit.context("worker pool closed")?,
            _ = wait_for_shutdown(self.shutdown_rx.clone()) => return Ok(DispatchOutcome::ShuttingDown),
        };

        let job = Job::new(path, past.attempts + 1, size);
        self.store.save_job(&job)?;
        self.history.entry(job.source_path.clone()).or_default().observe(&job);
        info!("Job {}: queued {} (attempt {})", job.short_id(), job.source_path.display(), job.attempt);

        let id = job.id.clone();
        let ctx = self.worker_context();
        self.workers.spawn(async move {
            let _permit = permit;
            let _guard = guard;
            run_job(&ctx, job).await
        });
        self.summary.dispatched += 1;
        Ok(DispatchOutcome::Dispatched(id))
    }

    /// Dry-run report for one candidate: probe and decide, touch nothing
    async fn preview(&self, path: &Path, size: u64) {
        let meta = match self.prober.probe(path).await {
            Ok(meta) => meta,
            Err(e) => {
                info!("DRY RUN: would skip {} (probe failed: {:#})", path.display(), e);
                return;
            }
        };
        if is_already_target_codec(&meta) {
            info!("DRY RUN: would skip {} (already {})", path.display(), TARGET_CODEC);
            return;
        }
        match HeuristicDecision::evaluate(&meta, &self.config.quality) {
            Some(d) => info!(
                "DRY RUN: would transcode {} ({}) at quality {} (tier {}, {}{})",
                path.display(),
                format_size(size, BINARY),
                d.quality,
                d.tier,
                d.surface,
                if d.web_rip_like { ", web rip" } else { "" }
            ),
            None => info!("DRY RUN: would skip {} (no usable video stream)", path.display()),
        }
    }

    fn record(&mut self, joined: Result<Job, JoinError>) {
        match joined {
            Ok(job) => {
                self.history.entry(job.source_path.clone()).or_default().observe(&job);
                match job.status {
                    JobStatus::Success => self.summary.success += 1,
                    JobStatus::Skipped => self.summary.skipped += 1,
                    JobStatus::Failed => self.summary.failed += 1,
                    JobStatus::Pending | JobStatus::Running => {
                        error!("Job {}: worker returned in state {}", job.id, job.status)
                    }
                }
            }
            Err(e) => {
                error!("Worker task panicked: {}", e);
                self.summary.failed += 1;
            }
        }
    }

    /// Reap any workers that already finished
    fn reap_finished(&mut self) {
        while let Some(joined) = self.workers.try_join_next() {
            self.record(joined);
        }
    }

    /// Wait for every in-flight worker
    pub async fn drain(&mut self) {
        while let Some(joined) = self.workers.join_next().await {
            self.record(joined);
        }
    }

    async fn dispatch_candidate(&mut self, result: ScanResult) {
        let ScanResult::Candidate(path, size) = result else {
            return;
        };
        if let Err(e) = self.dispatch(path.clone(), size).await {
            error!("Failed to dispatch {}: {:#}", path.display(), e);
        }
    }

    /// One full scan, every candidate dispatched
    pub async fn scan_and_dispatch(&mut self) -> Result<()> {
        let results = scan_library(&self.config).await?;
        for result in results {
            if self.is_shutting_down() {
                info!("Shutdown requested, not dispatching further files");
                break;
            }
            self.dispatch_candidate(result).await;
            self.reap_finished();
        }
        Ok(())
    }

    /// Scan once and wait for every job
    pub async fn run_once(&mut self) -> Result<RunSummary> {
        self.scan_and_dispatch().await?;
        self.drain().await;
        self.log_summary();
        Ok(self.summary.clone())
    }

    /// Replace the config snapshot for the next cycle. Invalid configs are
    /// ignored. Pool size is fixed for the scheduler's lifetime.
    fn reload_config<F>(&mut self, reload: &mut F)
    where
        F: FnMut() -> Result<TranscodeConfig>,
    {
        let candidate = match reload() {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("Config reload failed, keeping previous config: {:#}", e);
                return;
            }
        };
        if let Err(e) = candidate.validate() {
            warn!("Reloaded config is invalid, keeping previous config: {}", e);
            return;
        }
        if candidate.max_concurrent_jobs != self.options.max_concurrent {
            warn!("max_concurrent_jobs changes take effect after a restart");
        }
        self.config = Arc::new(candidate);
    }

    /// Periodic scans plus filesystem events until shutdown, then wait for
    /// in-flight workers.
    pub async fn run_continuous<F>(&mut self, mut reload: F) -> Result<RunSummary>
    where
        F: FnMut() -> Result<TranscodeConfig>,
    {
        let (_watcher, mut events): (Option<LibraryWatcher>, _) = if self.config.watch_enabled {
            match watch_roots(&self.config.library_roots, WATCH_CHANNEL_CAPACITY) {
                Ok((w, rx)) => (Some(w), Some(rx)),
                Err(e) => {
                    warn!("File watching unavailable, relying on periodic scans: {:#}", e);
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        let mut settle = SettleTracker::new(Duration::from_secs(self.config.stability_wait_secs));
        let mut scan_tick = tokio::time::interval(self.options.scan_interval);
        let mut settle_tick = tokio::time::interval(SETTLE_POLL);
        let mut first_cycle = true;

        info!("Continuous mode: scanning every {:?}", self.options.scan_interval);
        loop {
            tokio::select! {
                _ = wait_for_shutdown(self.shutdown_rx.clone()) => {
                    info!("Shutdown requested, waiting for {} in-flight jobs", self.in_flight.len());
                    break;
                }
                _ = scan_tick.tick() => {
                    if !first_cycle {
                        self.reload_config(&mut reload);
                    }
                    first_cycle = false;
                    if let Err(e) = self.scan_and_dispatch().await {
                        warn!("Scan failed: {:#}", e);
                    }
                }
                Some(path) = next_event(&mut events) => {
                    settle.file_changed(path);
                }
                _ = settle_tick.tick(), if !settle.is_empty() => {
                    for path in settle.take_settled(Instant::now()) {
                        match classify_path(&self.config, &path) {
                            Ok(Some(result)) => self.dispatch_candidate(result).await,
                            Ok(None) => {}
                            Err(e) => debug!("Ignoring event for {}: {:#}", path.display(), e),
                        }
                    }
                }
                Some(joined) = self.workers.join_next(), if !self.workers.is_empty() => {
                    self.record(joined);
                }
            }
        }

        self.drain().await;
        self.log_summary();
        Ok(self.summary.clone())
    }

    /// Run in the mode given at construction
    pub async fn run<F>(&mut self, reload: F) -> Result<RunSummary>
    where
        F: FnMut() -> Result<TranscodeConfig>,
    {
        match self.options.mode {
            RunMode::Once => self.run_once().await,
            RunMode::Continuous => self.run_continuous(reload).await,
        }
    }

    fn log_summary(&self) {
        let s = &self.summary;
        if self.options.dry_run {
            info!("Dry run summary: {} files evaluated, nothing encoded", s.previewed);
            return;
        }
        info!(
            "Processing summary: {} dispatched, {} success, {} skipped, {} failed",
            s.dispatched, s.success, s.skipped, s.failed
        );
    }
}
