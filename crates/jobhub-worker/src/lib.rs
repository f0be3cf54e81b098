//! Background job processing for JobHub.
//!
//! This crate provides:
//! - A job queue with lease-based dispatch, retry/backoff, reclaim of
//!   expired leases, and dead-lettering
//! - A worker pool that polls for and executes leased jobs
//! - A handler registry that dispatches jobs to the correct handler
//! - A producer boundary for submitting jobs
//! - A cron scheduler for the periodic retention sweep
//! - Built-in job handler implementations

pub mod backoff;
pub mod executor;
pub mod jobs;
pub mod producer;
pub mod queue;
pub mod runner;
pub mod scheduler;

pub use executor::{JobExecutionError, JobExecutor, JobHandler};
pub use producer::{JobProducer, SubmitOptions};
pub use queue::JobQueue;
pub use runner::WorkerPool;
pub use scheduler::CronScheduler;
