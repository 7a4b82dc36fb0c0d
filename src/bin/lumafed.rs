use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use luma_federation::shard::{key_hash, ShardClient};
use luma_federation::types::format_timestamp;
use luma_federation::{
    CommitOutcome, ContinuationCursor, Document, FederatedIndex, FederationConfig, MemoryShard,
    Predicate, QuerySpec,
};

#[derive(Parser)]
#[command(name = "lumafed")]
#[command(about = "LumaDB search federation tool", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, env = "LUMAFED_CONFIG", default_value = "lumafed.toml")]
    config: PathBuf,

    /// Overrides the configured log level (RUST_LOG wins over both)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a federated query
    Query {
        /// Backend query text; `*:*` matches everything
        #[arg(default_value = "*:*")]
        q: String,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = QuerySpec::DEFAULT_COUNT)]
        count: usize,
        #[arg(long)]
        facet: Vec<String>,
        /// Anchor key from the first page of this walk
        #[arg(long)]
        anchor_key: Option<String>,
        /// Anchor timestamp from the first page of this walk
        #[arg(long)]
        anchor_timestamp: Option<String>,
    },
    /// Load one document by key from its owning partition
    Get { key: String },
    /// Write one document
    Put {
        key: String,
        /// Defaults to now
        #[arg(long)]
        timestamp: Option<String>,
        /// name=value, repeatable
        #[arg(long = "field")]
        fields: Vec<String>,
    },
    /// Commit all partitions
    Commit,
    /// Show hash-space ownership, or the partition owning each key
    Ring { keys: Vec<String> },
    /// Run a query against in-memory partitions
    Demo {
        #[arg(long, default_value_t = 3)]
        partitions: usize,
        #[arg(long, default_value_t = 50)]
        documents: usize,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Demo {
        partitions,
        documents,
    } = cli.command
    {
        init_tracing(cli.log_level.as_deref().unwrap_or("info"));
        return run_demo(partitions, documents).await;
    }

    let config = FederationConfig::load(&cli.config)?;
    init_tracing(cli.log_level.as_deref().unwrap_or(&config.log_level));
    let index = FederatedIndex::connect(&config)?;

    match cli.command {
        Commands::Query {
            q,
            offset,
            count,
            facet,
            anchor_key,
            anchor_timestamp,
        } => {
            let predicate = if q == "*:*" { Predicate::All } else { Predicate::Raw(q) };
            let mut spec = QuerySpec::new(predicate).offset(offset).count(count);
            spec.facet_fields = facet;
            let cursor = ContinuationCursor {
                anchor_key,
                anchor_timestamp,
            };
            let response = index.query(&spec, Some(&cursor)).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Get { key } => match index.get_by_key(&key).await? {
            Some(document) => println!("{}", serde_json::to_string_pretty(&document)?),
            None => println!("No document found for key {}", key),
        },
        Commands::Put {
            key,
            timestamp,
            fields,
        } => {
            let mut document = match timestamp {
                Some(ts) => Document::new(key, ts),
                None => Document::stamped_now(key),
            };
            for pair in fields {
                let (name, value) = pair
                    .split_once('=')
                    .ok_or_else(|| anyhow::anyhow!("field '{}' is not name=value", pair))?;
                document.set_field(name, value);
            }
            let ack = index.put(&mut document).await?;
            println!(
                "Stored {} on partition {} (hash {:#010x})",
                document.key, ack.partition, ack.key_hash
            );
        }
        Commands::Commit => match index.commit_all().await {
            CommitOutcome::Skipped { since_last } => {
                println!("Skipped: last commit {:?} ago", since_last)
            }
            CommitOutcome::Dispatched(report) => {
                println!("Committed partitions {:?}", report.committed);
                for (partition, error) in report.failed {
                    println!("Partition {} failed: {}", partition, error);
                }
            }
        },
        Commands::Ring { keys } => {
            if keys.is_empty() {
                for (partition, share) in index.ring().ownership().iter().enumerate() {
                    println!("{:>3} {:>6.2}%  {}", partition, share * 100.0, config.partitions[partition]);
                }
            }
            for key in keys {
                let (hash, partition) = index.router().route_key(&key);
                println!("{} -> hash {:#010x} -> partition {}", key, hash, partition);
            }
        }
        Commands::Demo { .. } => unreachable!("handled before loading config"),
    }
    Ok(())
}

async fn run_demo(partitions: usize, documents: usize) -> anyhow::Result<()> {
    let shards: Vec<Arc<dyn ShardClient>> = (0..partitions)
        .map(|i| Arc::new(MemoryShard::new(format!("memory://shard-{}", i))) as Arc<dyn ShardClient>)
        .collect();
    let config = FederationConfig {
        facet_fields: vec!["meta".to_string()],
        ..Default::default()
    };
    let index = FederatedIndex::from_clients(&config, shards)?;

    let now = Utc::now();
    let mut batch: Vec<Document> = (0..documents)
        .map(|i| {
            let at = now - ChronoDuration::minutes(i as i64);
            Document::new(format!("doc-{}", i), format_timestamp(at))
                .with_field("meta", if i % 3 == 0 { "photo" } else { "status" })
        })
        .collect();
    index.put_batch(&mut batch).await?;
    index.commit_all().await;

    let spec = QuerySpec::new(Predicate::All).count(5);
    let first = index.query(&spec, None).await;
    println!("Page 1: {:?}", first.keys());
    println!("Facets: {:?}", first.facets);

    // Newer documents stay out of later pages pinned to the first one
    let mut late = vec![Document::new(
        "late-arrival",
        format_timestamp(now + ChronoDuration::minutes(1)),
    )];
    index.put_batch(&mut late).await?;
    let cursor = first.continuation();
    let second = index.query(&spec.next_page(), cursor.as_ref()).await;
    println!("Page 2: {:?}", second.keys());

    println!("doc-0 hash {:#010x}", key_hash("doc-0"));
    println!("{}", index.metrics().encode_text()?);
    Ok(())
}
