use std::collections::HashSet;

use clap::{Parser, Subcommand};
use ingest_core::{Config, CreateSubscription, IngestCore, Kind, SubmitJob};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "ingest-cli")]
#[command(about = "Operator entrypoint for the ingestion core")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the worker pool and webhook dispatcher and block until Ctrl+C.
    Serve,
    /// Store a local file as a blob and submit a job for it.
    Submit {
        #[arg(long)]
        tenant_id: String,
        #[arg(long)]
        file: std::path::PathBuf,
        /// Declared kind; inferred from the file extension if omitted.
        #[arg(long)]
        kind: Option<String>,
        #[arg(long, default_value_t = 0)]
        priority: i32,
    },
    /// Print the current state of a job.
    Status {
        #[arg(long)]
        job_id: Uuid,
    },
    /// Cancel a queued or active job.
    Cancel {
        #[arg(long)]
        job_id: Uuid,
    },
    /// Register a webhook subscription.
    Subscribe {
        #[arg(long)]
        tenant_id: String,
        #[arg(long)]
        target_url: String,
        #[arg(long, value_delimiter = ',')]
        topics: Vec<String>,
    },
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ingest_core=info".parse().unwrap())
                .add_directive("ingest_cli=info".parse().unwrap()),
        )
        .init();
}

fn main() -> anyhow::Result<()> {
    init_logging();

    let args = Args::parse();
    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");

    rt.block_on(run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = Config::load_or_default();
    tracing::info!(
        worker_pool_size = config.worker_pool_size,
        blob_root = ?config.blob_root,
        "starting ingestion core"
    );
    let core = IngestCore::start(config);

    match args.command {
        Command::Serve => {
            tracing::info!("worker pool and webhook dispatcher running, press Ctrl+C to stop");
            tokio::signal::ctrl_c().await?;
            tracing::info!("shutdown signal received, draining workers");
            core.shutdown_workers();
        }
        Command::Submit {
            tenant_id,
            file,
            kind,
            priority,
        } => {
            let ext = kind.unwrap_or_else(|| {
                file.extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or_default()
                    .to_string()
            });
            let kind = Kind::from_extension(&ext)
                .ok_or_else(|| anyhow::anyhow!("unrecognized kind: {ext}"))?;
            let bytes = tokio::fs::read(&file).await?;
            let blob = core.blobs.put(&bytes).await?;
            let id = core
                .submit_job(SubmitJob {
                    tenant_id,
                    blob,
                    kind,
                    priority,
                    max_attempts: 0,
                })
                .await?;
            println!("{id}");
        }
        Command::Status { job_id } => {
            let job = core.job(job_id).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Command::Cancel { job_id } => {
            core.cancel_job(job_id).await?;
            tracing::info!(job_id = %job_id, "cancellation requested");
        }
        Command::Subscribe {
            tenant_id,
            target_url,
            topics,
        } => {
            let topics: HashSet<String> = topics.into_iter().collect();
            let (subscription, secret) = core
                .subscribe(CreateSubscription {
                    tenant_id,
                    target_url,
                    topics,
                })
                .await;
            println!("subscription_id: {}", subscription.id);
            println!("secret: {secret}");
        }
    }

    Ok(())
}
