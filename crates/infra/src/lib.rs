//! Infrastructure layer: durable job state, admission control, orchestration
//! and the lifecycle facade.
//!
//! ## Components
//!
//! - [`kv`]: key-value store seam with in-memory and Redis adapters
//! - [`rate_limiter`]: sliding-window admission controller
//! - [`jobs`]: job state store, executor seam and round-based orchestrator
//! - [`cache`]: file cache of finished results
//! - [`lifecycle`]: submit / progress / cancel / last
//! - [`config`]: `QUIRE_*` environment configuration

pub mod cache;
pub mod config;
pub mod error;
pub mod jobs;
pub mod kv;
pub mod lifecycle;
pub mod rate_limiter;

pub use cache::{CacheError, FileResultCache, ResultCache};
pub use config::{ConfigError, PipelineConfig};
pub use error::{JobError, JobResult};
pub use lifecycle::{JobLifecycle, JobSummary, MetadataExtractor, SubmitOutcome};
pub use rate_limiter::RateLimiter;
