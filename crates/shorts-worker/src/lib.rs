//! Portrait shorts worker.
//!
//! This crate provides:
//! - Job orchestration (`JobController`) with a watchable state machine
//! - Encoder concurrency limits shared across jobs (`ResourceGovernor`)
//! - Source resolution for URLs and uploads
//! - Per-job scratch directories and delivery of finished clips
//! - Retry with backoff, structured job logging and metrics

pub mod config;
pub mod controller;
pub mod delivery;
pub mod error;
pub mod governor;
pub mod logging;
pub mod metrics;
pub mod resolver;
pub mod retry;
pub mod scratch;

pub use config::WorkerConfig;
pub use controller::{JobCanceller, JobController, JobHandle};
pub use delivery::{ClipTransfer, Delivery, DeliveryReceipt, DirectoryDelivery};
pub use error::{WorkerError, WorkerResult};
pub use governor::{EncodePermit, JobSlots, ResourceGovernor};
pub use logging::JobLogger;
pub use resolver::{SourceLimits, SourceReference, SourceResolver};
pub use retry::{retry_async, RetryConfig, RetryResult, Retryable};
pub use scratch::{sweep_stale, ScratchDir};
