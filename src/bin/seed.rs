//! One-shot demo producer.
//!
//! Enqueues demo `send_email` jobs and exits; a separately invokable
//! utility, deliberately outside the queue/worker contract. Run the
//! worker daemon to see the jobs execute.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use jobhub_core::config::AppConfig;
use jobhub_database::connection::DatabasePool;
use jobhub_database::{JobStore, PgJobStore};
use jobhub_entity::job::JobPayload;
use jobhub_worker::{JobProducer, JobQueue, SubmitOptions};

#[derive(Debug, Parser)]
#[command(name = "jobhub-seed", about = "Enqueue demo jobs into JobHub")]
struct Args {
    /// Recipient address for the demo email job.
    #[arg(long, default_value = "user@example.com")]
    email: String,

    /// Message subject.
    #[arg(long)]
    subject: Option<String>,

    /// Number of jobs to enqueue.
    #[arg(long, default_value_t = 1)]
    count: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let env = std::env::var("JOBHUB_ENV").unwrap_or_else(|_| "development".to_string());
    let config = AppConfig::load(&env)?;

    let db_pool = DatabasePool::connect(&config.database).await?;
    jobhub_database::migration::run_migrations(db_pool.pool()).await?;

    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(db_pool.pool().clone()));
    let queue = Arc::new(JobQueue::new(store, config.queue.clone()));
    let producer = JobProducer::new(queue);

    for _ in 0..args.count {
        let job_id = producer
            .submit_payload(
                JobPayload::SendEmail {
                    email: args.email.clone(),
                    subject: args.subject.clone(),
                    body: None,
                },
                SubmitOptions::default(),
            )
            .await?;
        println!("Enqueued demo job {job_id}");
    }

    db_pool.close().await;
    Ok(())
}
