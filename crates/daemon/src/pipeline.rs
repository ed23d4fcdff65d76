use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::Utc;
use humansize::{format_size, BINARY};
use log::{debug, error, info, warn};
use crate::command::{build_encode_args, temp_output_path, EncodeParams};
use crate::config::TranscodeConfig;
use crate::error::JobError;
use crate::executor::{EncoderRunner, ExecuteOptions, ExecutionState};
use crate::ffprobe::MediaProber;
use crate::heuristics::{is_already_target_codec, should_skip_for_size, HeuristicDecision, TARGET_CODEC};
use crate::job::{Job, JobProgress, JobStatus};
use crate::postprocess::{check_size_gate, cleanup_temp, replace_file_atomic, FileOps, GatePass};
use crate::progress::Progress;
use crate::sidecar::{self, size_gate_explanation};
use crate::store::JobStore;

/// Minimum spacing between progress writes to the job record
pub const PROGRESS_SAVE_INTERVAL: Duration = Duration::from_secs(5);

/// Diagnostic lines copied into a failed job's reason
const REASON_TAIL_LINES: usize = 20;

/// Everything a worker needs. Cloned per job; the config is the snapshot
/// taken when the job was dispatched.
#[derive(Clone)]
pub struct WorkerContext {
    pub config: Arc<TranscodeConfig>,
    pub store: JobStore,
    pub prober: Arc<dyn MediaProber>,
    pub encoder: Arc<dyn EncoderRunner>,
    pub file_ops: Arc<dyn FileOps>,
}

fn persist(store: &JobStore, job: &Job) {
    if let Err(e) = store.save_job(job) {
        error!("Job {}: failed to save record: {:#}", job.id, e);
    }
}

/// Text written to `.why.txt` for a permanent skip
fn marker_text(err: &JobError) -> String {
    match err {
        JobError::SizeGateRejected { ratio, threshold, original_bytes, new_bytes } => {
            size_gate_explanation(*original_bytes, *new_bytes, *ratio, *threshold)
        }
        other => other.to_string(),
    }
}

/// Run one pending job to a terminal state. Never panics on per-file
/// problems; every outcome ends up in the returned (and persisted) record.
pub async fn run_job(ctx: &WorkerContext, mut job: Job) -> Job {
    if let Err(e) = job.start() {
        error!("{}", e);
        return job;
    }
    persist(&ctx.store, &job);
    info!("Job {}: 🎯 Starting {}", job.short_id(), job.source_path.display());

    let temp = temp_output_path(&job.source_path, job.short_id());
    let outcome = encode_and_replace(ctx, &mut job, &temp).await;

    let transition = match outcome {
        Ok(pass) => {
            info!(
                "Job {}: ✅ {} -> {} ({:.1}% of original)",
                job.short_id(),
                format_size(job.original_bytes, BINARY),
                format_size(pass.new_bytes, BINARY),
                pass.ratio * 100.0
            );
            let source = job.source_path.clone();
            job.succeed(source, pass.new_bytes)
        }
        Err(err) => {
            cleanup_temp(ctx.file_ops.as_ref(), &temp);
            if err.writes_skip_marker() {
                if let Err(e) = sidecar::write_skip_marker(&job.source_path, &marker_text(&err)) {
                    warn!("Job {}: {:#}", job.short_id(), e);
                }
            }
            let status = err.terminal_status();
            match status {
                JobStatus::Skipped => info!("Job {}: ⏭️ Skipped: {}", job.short_id(), err),
                _ => warn!("Job {}: ❌ Failed: {}", job.short_id(), err),
            }
            job.finish_with_reason(status, err.to_string())
        }
    };
    if let Err(e) = transition {
        error!("{}", e);
    }

    persist(&ctx.store, &job);
    job
}

async fn encode_and_replace(ctx: &WorkerContext, job: &mut Job, temp: &Path) -> Result<GatePass, JobError> {
    let cfg = ctx.config.as_ref();

    if should_skip_for_size(job.original_bytes, cfg.min_bytes) {
        return Err(JobError::TooSmall { size: job.original_bytes, min: cfg.min_bytes });
    }

    let meta = ctx
        .prober
        .probe(&job.source_path)
        .await
        .map_err(|e| JobError::Probe(format!("{:#}", e)))?;

    if meta.selected_video().is_none() {
        return Err(JobError::UnsupportedMedia("no usable video stream".to_string()));
    }
    if is_already_target_codec(&meta) {
        return Err(JobError::AlreadyTargetCodec(TARGET_CODEC.to_string()));
    }

    let decision = HeuristicDecision::evaluate(&meta, &cfg.quality)
        .ok_or_else(|| JobError::UnsupportedMedia("no usable video stream".to_string()))?;
    job.is_web_rip_like = decision.web_rip_like;
    job.quality = Some(decision.quality);
    job.surface = Some(decision.surface.to_string());
    persist(&ctx.store, job);
    info!(
        "Job {}: tier {} quality {} surface {}{}",
        job.short_id(),
        decision.tier,
        decision.quality,
        decision.surface,
        if decision.web_rip_like { " (web rip)" } else { "" }
    );

    let args = build_encode_args(&job.source_path, temp, &decision, &EncodeParams::from_config(cfg))?;
    let opts = ExecuteOptions::from_config(cfg);

    let store = &ctx.store;
    let tracked = &mut *job;
    let mut last_flush: Option<Instant> = None;
    let mut on_progress = |p: Progress| {
        tracked.progress = Some(JobProgress {
            frame: p.frame,
            fps: p.fps,
            speed: p.speed,
            output_bytes: p.size_bytes,
            updated_at: Some(Utc::now()),
        });
        if last_flush.map_or(true, |t| t.elapsed() >= PROGRESS_SAVE_INTERVAL) {
            last_flush = Some(Instant::now());
            persist(store, tracked);
        }
    };
    let report = ctx.encoder.run(&args, &opts, &mut on_progress).await?;
    debug!("Job {}: encoder finished in {:?}", job.short_id(), report.elapsed);

    match report.state {
        ExecutionState::Completed => {}
        ExecutionState::TimedOut => return Err(JobError::EncodeTimeout(opts.timeout)),
        _ => {
            return Err(JobError::EncodeProcess {
                code: report.exit_code,
                tail: report.tail_text(REASON_TAIL_LINES),
            })
        }
    }

    let new_bytes = match tokio::fs::metadata(temp).await {
        Ok(m) if m.len() > 0 => m.len(),
        Ok(_) => return Err(JobError::MissingOutput(format!("{} is empty", temp.display()))),
        Err(e) => return Err(JobError::MissingOutput(format!("{}: {}", temp.display(), e))),
    };

    // The source must still be the file that was probed
    let current = tokio::fs::metadata(&job.source_path)
        .await
        .map_err(|e| JobError::Io(format!("source vanished during encode: {}", e)))?
        .len();
    if current != job.original_bytes {
        return Err(JobError::Io(format!(
            "source changed during encode ({} -> {} bytes)",
            job.original_bytes, current
        )));
    }

    let pass = check_size_gate(job.original_bytes, new_bytes, cfg.max_size_ratio)?;
    replace_file_atomic(ctx.file_ops.as_ref(), &job.source_path, temp)?;
    Ok(pass)
}
