//! Bibliosync Article Worker
//!
//! Consumes article publish tasks from SQS:
//! 1. Receives a batch of tasks
//! 2. Publishes each article to its website, `workers.pool_size` at a time
//! 3. Deletes the message once the outcome is stored on the record
//!
//! A failed publication is stored as ERROR on the record and in the failure
//! ledger, so the message is removed either way; the next publish run picks
//! the record up again. Unreadable messages go to the dead letter queue.

use bibliosync_common::{
    config::AppConfig,
    metrics,
    publication::PublishOutcome,
    queue::{Message, Queue, QueueSettings},
    ArticlePublishTask, ArticlePublisher, Services, VERSION,
};
use futures::stream::{self, StreamExt};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const MAX_FAILURES: u32 = 5;
const CIRCUIT_BREAK_DURATION: Duration = Duration::from_secs(30);
const RECEIVE_ERROR_PAUSE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load_validated().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    init_observability(&config)?;

    info!(service = %config.observability.service_name, "Starting Bibliosync Article Worker v{}", VERSION);

    let Some(settings) = QueueSettings::for_articles(&config.queue) else {
        warn!("queue.article_queue_url not set, waiting for shutdown signal...");
        tokio::signal::ctrl_c().await?;
        info!("Article worker shutting down");
        return Ok(());
    };

    info!("Connecting to database...");
    let (services, _repository) = Services::connect(&config).await?;
    let publisher = Arc::new(services.article_publisher());

    info!(url = %settings.url, "Connecting to article queue...");
    let queue = Queue::new(settings).await?;
    let concurrency = config.workers.pool_size.max(1);

    info!(concurrency, "Article worker ready, starting queue polling...");

    let mut consecutive_failures = 0;
    loop {
        if consecutive_failures >= MAX_FAILURES {
            warn!(failures = consecutive_failures, "Circuit breaker open, pausing...");
            tokio::time::sleep(CIRCUIT_BREAK_DURATION).await;
            consecutive_failures = 0;
            info!("Circuit breaker reset, resuming...");
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            result = queue.receive() => {
                match result {
                    Ok(messages) => {
                        let failed = stream::iter(messages)
                            .map(|message| handle_message(&queue, &publisher, message))
                            .buffer_unordered(concurrency)
                            .filter(|outcome| futures::future::ready(*outcome == PublishOutcome::Failed))
                            .count()
                            .await;
                        consecutive_failures = if failed == 0 {
                            0
                        } else {
                            consecutive_failures + 1
                        };
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        error!(error = %e, "Failed to receive messages from queue");
                        tokio::time::sleep(RECEIVE_ERROR_PAUSE).await;
                    }
                }
            }
        }
    }

    info!("Article worker shutting down");
    Ok(())
}

async fn handle_message(
    queue: &Queue,
    publisher: &ArticlePublisher,
    message: Message,
) -> PublishOutcome {
    let task = match Queue::parse_message::<ArticlePublishTask>(&message) {
        Ok(task) => task,
        Err(e) => {
            error!(error = %e, "Unreadable article task");
            if let Err(e) = queue.dead_letter(&message).await {
                error!(error = %e, "Failed to dead-letter message");
            }
            return PublishOutcome::Skipped;
        }
    };

    info!(
        article_proc_id = %task.article_proc_id,
        website = %task.website_kind,
        "Received article task"
    );
    let outcome = publisher.run(&task).await;

    if let Some(handle) = message.receipt_handle.as_deref() {
        if let Err(e) = queue.delete(handle).await {
            error!(error = %e, "Failed to delete message");
        }
    }
    outcome
}

fn init_observability(config: &AppConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }

    if config.observability.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!(%addr, "Metrics exporter listening");
    }
    metrics::register_metrics();
    Ok(())
}
