use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, Result};
use av1janitor::{
    recovery, FFProbe, FfmpegEncoder, JobStore, RunMode, Scheduler, SchedulerOptions, Toolchain,
    TranscodeConfig,
};
use clap::Parser;
use log::{error, info, warn};

/// AV1 re-encode daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scan once, finish all jobs and exit
    #[arg(long)]
    once: bool,

    /// Log what would be encoded without touching any file
    #[arg(long)]
    dry_run: bool,

    /// Maximum concurrent encodes (overrides the config file)
    #[arg(long)]
    concurrent: Option<usize>,

    /// Library directory to process (repeatable, replaces configured roots)
    #[arg(short, long)]
    directory: Vec<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    /// Load the config file and apply command-line overrides
    fn load_config(&self) -> Result<TranscodeConfig> {
        let mut cfg = TranscodeConfig::load_config(self.config.as_deref())
            .context("Failed to load configuration")?;
        if !self.directory.is_empty() {
            cfg.library_roots = self.directory.clone();
        }
        if let Some(n) = self.concurrent {
            cfg.max_concurrent_jobs = n;
        }
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; -v raises the default
    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    let cfg = args.load_config()?;
    cfg.validate().context("Invalid configuration")?;

    info!("AV1 Daemon starting");
    info!("  Library roots: {:?}", cfg.library_roots);
    info!("  Min bytes: {}", cfg.min_bytes);
    info!("  Max size ratio: {}", cfg.max_size_ratio);
    info!("  Job state dir: {}", cfg.job_state_dir.display());
    info!("  Concurrent jobs: {}", cfg.max_concurrent_jobs);
    info!("  Dry run: {}", args.dry_run);

    let toolchain = Toolchain::detect(&cfg)
        .await
        .context("Encoder toolchain check failed")?;

    let store = JobStore::open(&cfg.job_state_dir)?;

    if args.dry_run {
        warn!("DRY RUN MODE - No actual transcoding will occur, recovery skipped");
    } else {
        info!("🔄 Starting recovery checks...");
        recovery::recover(&store, &cfg).context("Startup recovery failed")?;
    }

    let mode = if args.once { RunMode::Once } else { RunMode::Continuous };
    let options = SchedulerOptions {
        dry_run: args.dry_run,
        ..SchedulerOptions::from_config(&cfg, mode)
    };
    let mut scheduler = Scheduler::new(
        cfg,
        store,
        Arc::new(FFProbe::new(&toolchain.ffprobe_bin)),
        Arc::new(FfmpegEncoder::new(&toolchain.ffmpeg_bin)),
        options,
    )?;

    let shutdown = scheduler.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Ctrl+C received, finishing in-flight jobs before exit");
                shutdown.trigger();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    let summary = scheduler.run(|| args.load_config()).await?;
    info!(
        "Daemon stopped: {} success, {} skipped, {} failed",
        summary.success, summary.skipped, summary.failed
    );
    Ok(())
}
