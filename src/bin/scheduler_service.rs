use clap::Parser;
use dotenvy::dotenv;
use falcon_scheduler::{init_platform, SchedulerProcessConfig};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Postgres connection string for the task/execution store.
    #[arg(long)]
    database_url: Option<String>,

    /// Redis connection string for the lock service and structure tracker.
    #[arg(long)]
    redis_url: Option<String>,

    /// Number of worker pool threads.
    #[arg(short, long)]
    workers: Option<usize>,

    /// Bounded worker queue capacity.
    #[arg(short, long)]
    queue_size: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    let args = Args::parse();

    let mut config = SchedulerProcessConfig::from_env();
    if let Some(database_url) = args.database_url {
        config.database_url = database_url;
    }
    if let Some(redis_url) = args.redis_url {
        config.redis_url = redis_url;
    }
    if let Some(workers) = args.workers {
        config.worker_count = workers;
    }
    if let Some(queue_size) = args.queue_size {
        config.queue_size = queue_size;
    }

    let platform = init_platform(config).await?;
    platform.start().await?;

    info!("falcon-scheduler running, waiting for shutdown signal");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping");

    Ok(())
}
