//! Bibliosync Controller
//!
//! Operator CLI driving one collection at a time:
//! - `register`: load legacy journal / issue records into processing records
//! - `migrate`: register, then run the journal → issue → article cascade
//! - `publish`: publish to a website, fanning articles out to workers
//! - `status`: processing record counts per status

use anyhow::{anyhow, Context};
use bibliosync_common::{
    config::AppConfig,
    db::models::{EntityKind, WebsiteKind},
    metrics,
    migration::MigrationOptions,
    publication::{ArticleTaskDispatcher, LocalWorkerPool, PublishOptions},
    queue::{Queue, QueueSettings},
    store::ProcFilter,
    Actor, Services, VERSION,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bibliosync", version, about = "Journal / issue / article migration and publication controller")]
struct Cli {
    /// Configuration file (defaults to config/ + APP__ environment)
    #[arg(long, env = "BIBLIOSYNC_CONFIG")]
    config: Option<String>,

    /// Run against in-memory stores; nothing is persisted or published
    #[arg(long)]
    dry_run: bool,

    /// Acting user id stamped on failure records
    #[arg(long)]
    user_id: Option<i64>,

    /// Acting username
    #[arg(long)]
    username: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register legacy records as processing records
    Register {
        #[arg(long)]
        collection: String,
        /// Also register issue records
        #[arg(long)]
        issues: bool,
        #[arg(long)]
        force: bool,
    },
    /// Migrate a collection
    Migrate(MigrateArgs),
    /// Publish a collection to a website
    Publish(PublishArgs),
    /// Show processing record counts
    Status {
        #[arg(long)]
        collection: String,
    },
}

#[derive(Args, Debug)]
struct ScopeArgs {
    /// Only the journal record with this PID
    #[arg(long)]
    journal_pid: Option<String>,
    /// Only journals with this acronym
    #[arg(long)]
    journal_acron: Option<String>,
    /// Only issues of this publication year
    #[arg(long)]
    year: Option<String>,
}

impl ScopeArgs {
    fn journal_filter(&self) -> ProcFilter {
        ProcFilter {
            pid: self.journal_pid.clone(),
            journal_acron: self.journal_acron.clone(),
            ..Default::default()
        }
    }
}

#[derive(Args, Debug)]
struct MigrateArgs {
    #[arg(long)]
    collection: String,
    #[arg(long)]
    force: bool,
    /// Cascade into issues
    #[arg(long)]
    issues: bool,
    /// Cascade into articles (implies --issues)
    #[arg(long)]
    articles: bool,
    #[arg(long)]
    force_import_acron_id_file: bool,
    #[arg(long)]
    force_migrate_document_records: bool,
    #[arg(long)]
    force_import_issue_files: bool,
    #[command(flatten)]
    scope: ScopeArgs,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Dispatch {
    /// In-process worker pool
    Local,
    /// SQS queue consumed by article-worker
    Queue,
}

#[derive(Args, Debug)]
struct PublishArgs {
    #[arg(long)]
    collection: String,
    /// QA or PUBLIC
    #[arg(long)]
    website: WebsiteKind,
    #[arg(long)]
    force: bool,
    /// Cascade into issues
    #[arg(long)]
    issues: bool,
    /// Cascade into articles (implies --issues)
    #[arg(long)]
    articles: bool,
    #[arg(long, value_enum, default_value = "local")]
    dispatch: Dispatch,
    #[command(flatten)]
    scope: ScopeArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => AppConfig::from_file(path).with_context(|| format!("loading {}", path))?,
        None => AppConfig::load_validated()?,
    };
    init_observability(&config)?;
    info!(service = %config.observability.service_name, "Starting Bibliosync controller v{}", VERSION);

    let mut actor = Actor::from(&config.actor);
    if let Some(user_id) = cli.user_id {
        actor.user_id = user_id;
    }
    if let Some(ref username) = cli.username {
        actor.username.clone_from(username);
    }

    let services = if cli.dry_run {
        info!("Dry run: using in-memory stores");
        Services::dry_run(&config)?
    } else {
        Services::connect(&config).await?.0
    };

    let output = match cli.command {
        Command::Register {
            collection,
            issues,
            force,
        } => {
            let migration = services.migration();
            let journals = migration.register_journals(&actor, &collection, force).await;
            let issues = if issues {
                Some(migration.register_issues(&actor, &collection, force).await)
            } else {
                None
            };
            json!({ "journals": journals, "issues": issues })
        }
        Command::Migrate(args) => {
            let options = MigrationOptions {
                force_update: args.force,
                force_import_acron_id_file: args.force_import_acron_id_file,
                force_migrate_document_records: args.force_migrate_document_records,
                force_import_issue_files: args.force_import_issue_files,
                migrate_issues: args.issues || args.articles,
                migrate_articles: args.articles,
                journal_filter: args.scope.journal_filter(),
                publication_year: args.scope.year.clone(),
            };
            let report = services.migration().run(&actor, &args.collection, &options).await;
            serde_json::to_value(report)?
        }
        Command::Publish(args) => publish(&services, &config, &actor, args).await?,
        Command::Status { collection } => {
            let mut counts = serde_json::Map::new();
            for kind in [EntityKind::Journal, EntityKind::Issue, EntityKind::Article] {
                let kind_counts = services.procs.status_counts(&collection, kind).await?;
                counts.insert(kind.to_string(), serde_json::to_value(kind_counts)?);
            }
            serde_json::Value::Object(counts)
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn publish(
    services: &Services,
    config: &AppConfig,
    actor: &Actor,
    args: PublishArgs,
) -> anyhow::Result<serde_json::Value> {
    let options = PublishOptions {
        force_update: args.force,
        journal_filter: args.scope.journal_filter(),
        issue_filter: ProcFilter {
            publication_year: args.scope.year.clone(),
            ..Default::default()
        },
        cascade_issues: args.issues || args.articles,
        cascade_articles: args.articles,
    };

    let report = match args.dispatch {
        Dispatch::Local => {
            let pool = Arc::new(LocalWorkerPool::start(
                Arc::new(services.article_publisher()),
                config.workers.pool_size,
                config.workers.capacity,
            ));
            let dispatcher: Arc<dyn ArticleTaskDispatcher> = pool.clone();
            let report = services
                .publication(dispatcher)
                .publish_journals(actor, &args.collection, args.website, &options)
                .await;
            pool.shutdown().await;
            report
        }
        Dispatch::Queue => {
            let settings = QueueSettings::for_articles(&config.queue)
                .ok_or_else(|| anyhow!("queue.article_queue_url is not configured"))?;
            let queue = Arc::new(Queue::new(settings).await?);
            services
                .publication(queue)
                .publish_journals(actor, &args.collection, args.website, &options)
                .await
        }
    };
    Ok(serde_json::to_value(report)?)
}

fn init_observability(config: &AppConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }

    if config.observability.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing Prometheus exporter")?;
        info!(%addr, "Metrics exporter listening");
    }
    metrics::register_metrics();
    Ok(())
}
