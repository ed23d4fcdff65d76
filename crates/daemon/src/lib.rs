pub mod config;
pub mod error;
pub mod job;
pub mod store;
pub mod metadata;
pub mod ffprobe;
pub mod heuristics;
pub mod command;
pub mod progress;
pub mod executor;
pub mod postprocess;
pub mod sidecar;
pub mod scan;
pub mod watch;
pub mod pipeline;
pub mod scheduler;
pub mod toolchain;
pub mod recovery;

pub use config::{ConfigError, QualityTable, TranscodeConfig};
pub use error::{JobError, TransitionError};
pub use job::{Job, JobStatus};
pub use store::JobStore;
pub use metadata::StreamMetadata;
pub use ffprobe::{FFProbe, MediaProber};
pub use executor::{EncoderRunner, ExecuteOptions, ExecutionReport, ExecutionState, FfmpegEncoder};
pub use scheduler::{RunMode, RunSummary, Scheduler, SchedulerOptions, ShutdownHandle};
pub use toolchain::{Toolchain, ToolchainError};
