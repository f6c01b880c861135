use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use translation_publisher::partition::group_by_partition_key;
use translation_publisher::sink::{Connector, KafkaConnector, MemoryConnector};
use translation_publisher::{Config, Error, PublisherSession, Result, TranslationEvent};

#[derive(Parser, Debug)]
#[command(name = "translation-publisher")]
#[command(about = "Publishes translation events to a batch-ingestion sink", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[arg(short, long, value_name = "FILE", help = "JSON-lines input; stdin if omitted")]
    input: Option<PathBuf>,

    #[arg(long, help = "Publish to an in-memory sink instead of Kafka")]
    dry_run: bool,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting translation-publisher");
    info!("Loading configuration from {:?}", args.config);

    let config = match Config::from_file(&args.config) {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            cfg
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(Error::Config(e.to_string()).into());
        }
    };

    info!(
        sink_connection = %config.sink.connection,
        sink_name = %config.sink.name,
        max_batch_bytes = config.sink.max_batch_bytes,
        max_attempts = config.retry.max_attempts,
        dry_run = args.dry_run,
        "Configuration summary"
    );

    let events = read_events(args.input.as_deref()).await?;
    info!("Read {} translation events", events.len());

    let failed_groups = if args.dry_run {
        publish_all(&config, MemoryConnector::new(), events).await?
    } else {
        publish_all(&config, KafkaConnector::new(), events).await?
    };

    if failed_groups > 0 {
        anyhow::bail!("{} partition groups were not fully delivered", failed_groups);
    }
    Ok(())
}

/// Publishes every partition group through one session, returning the number
/// of groups that were not fully delivered.
async fn publish_all<C: Connector>(
    config: &Config,
    connector: C,
    events: Vec<TranslationEvent>,
) -> Result<usize> {
    let mut session = PublisherSession::from_config(config, connector)?;
    let groups = group_by_partition_key(events, session.key_strategy());

    let failed = session
        .scoped(move |session| {
            Box::pin(async move {
                let mut failed = 0;
                for (key, group) in groups {
                    match session.publish(&group).await {
                        Ok(report) => {
                            info!(partition_key = %key, events = report.events_sent, "Group published")
                        }
                        Err(e) => {
                            error!(partition_key = %key, "Group not fully delivered: {}", e);
                            failed += 1;
                        }
                    }
                }
                Ok(failed)
            })
        })
        .await?;

    println!("{}", serde_json::to_string_pretty(&session.stats())?);
    Ok(failed)
}

async fn read_events(input: Option<&Path>) -> anyhow::Result<Vec<TranslationEvent>> {
    let reader: Box<dyn AsyncRead + Unpin + Send> = match input {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open input {:?}", path))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };

    let mut lines = BufReader::new(reader).lines();
    let mut events = Vec::new();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let event: TranslationEvent = serde_json::from_str(&line)
            .with_context(|| format!("invalid translation event on line {}", line_no))?;
        events.push(event);
    }

    Ok(events)
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("translation_publisher=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("translation_publisher=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
