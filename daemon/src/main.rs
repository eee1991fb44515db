use anyhow::Result;
use clap::Parser;
use reviewd::config::{QueueBackend, ServiceConfig};
use reviewd::forge::github::{GithubClient, GithubConfig};
use reviewd::llm;
use reviewd::queue::{durable::DurableQueue, memory::MemoryQueue, JobHandler, ReviewQueue};
use reviewd::review::workflow::{Orchestrator, OrchestratorConfig};
use reviewd::webhook::{router, IngressState};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "reviewd",
    about = "Automated pull-request review service",
    version
)]
struct Args {
    /// Webhook ingress port
    #[arg(long, default_value_t = 3000, env = "PORT")]
    port: u16,

    /// Bind address
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    host: String,

    /// Log level / env-filter directive (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_json = std::env::var("LOG_JSON")
        .map(|v| v != "false" && v != "0")
        .unwrap_or(true);
    if log_json {
        tracing_subscriber::fmt()
            .with_env_filter(args.log.as_str())
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(args.log.as_str())
            .compact()
            .init();
    }

    let config = ServiceConfig::from_env()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = args.port,
        queue = config.queue_backend.as_str(),
        "reviewd starting"
    );

    let queue: Arc<dyn ReviewQueue> = match config.queue_backend {
        QueueBackend::Memory => Arc::new(MemoryQueue::new()),
        QueueBackend::Durable => Arc::new(DurableQueue::new(&config.queue_db_path).await?),
    };

    let forge = Arc::new(GithubClient::new(&GithubConfig {
        api_url: config.github_api_url.clone(),
        app_id: config.app_id,
        private_key_pem: config.private_key_pem.clone(),
    })?);
    let provider = llm::build_provider(&config.llm)?;
    let orchestrator = Arc::new(Orchestrator::new(
        forge,
        Arc::from(provider),
        OrchestratorConfig {
            filter: config.filter.clone(),
            chunker: config.chunker.clone(),
            aggregate: config.aggregate.clone(),
            risk: config.risk.clone(),
            tools: config.tools.clone(),
            vuln: config.vuln.clone(),
        },
    ));

    let handler: JobHandler = {
        let orchestrator = orchestrator.clone();
        Arc::new(move |job| {
            let orchestrator = orchestrator.clone();
            Box::pin(async move {
                let result = orchestrator.run(&job).await;
                if result.success {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!(result
                        .error
                        .unwrap_or_else(|| "review failed".to_string())))
                }
            })
        })
    };
    let worker = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.process(handler).await })
    };

    let state = Arc::new(IngressState {
        webhook_secret: config.webhook_secret.clone(),
        queue: queue.clone(),
        queue_backend: config.queue_backend.as_str(),
        started_at: std::time::Instant::now(),
    });
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("webhook ingress listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(queue.clone()))
        .await?;

    if let Err(e) = worker.await? {
        warn!(err = %e, "worker loop exited with error");
    }
    info!("reviewd stopped");
    Ok(())
}

/// Close the queue on ctrl-c so the worker loop drains and exits.
async fn shutdown_signal(queue: Arc<dyn ReviewQueue>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received — closing queue");
    if let Err(e) = queue.close().await {
        warn!(err = %e, "queue close failed");
    }
}
