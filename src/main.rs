//! Disclosure Index - command line entry point

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use disclosure_index::{
    config::{Args, Command},
    db::{MongoClient, MongoRecordStore, RecordStore},
    services::{load_candidates, IngestionService, QueryEngine},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("disclosure_index={},info", args.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("Local offset: {:+} hours", args.local_offset_hours);
    info!("Page size: {}", args.page_size);
    info!("Query timeout: {} ms", args.query_timeout_ms);
    info!("Retry: {:?}", args.retry.policy());

    info!("MongoDB: {} (db '{}')", args.mongodb_uri, args.mongodb_db);
    let client = MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await?;
    let store: Arc<dyn RecordStore> = Arc::new(MongoRecordStore::open(&client, args.page_size).await?);

    let deriver = args.deriver()?;

    match &args.command {
        Command::Ingest { path } => {
            let candidates = load_candidates(path).await?;
            info!("Loaded {} candidate(s) from {}", candidates.len(), path.display());

            let ingestion = IngestionService::new(store, deriver, args.retry.policy());
            let report = ingestion.ingest_batch(candidates).await;
            println!("{}", serde_json::to_string_pretty(&report)?);

            if !report.failed.is_empty() {
                std::process::exit(2);
            }
        }
        Command::Query { .. } => {
            let engine = QueryEngine::new(store, deriver, args.query_config());
            let params = args
                .command
                .query_params()
                .ok_or_else(|| anyhow::anyhow!("query subcommand carries no parameters"))?;
            let result = engine.query_params(params).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Get { id } => {
            let engine = QueryEngine::new(store, deriver, args.query_config());
            match engine.get(id).await? {
                Some(doc) => println!("{}", serde_json::to_string_pretty(&doc)?),
                None => {
                    warn!("Disclosure {} not found", id);
                    std::process::exit(3);
                }
            }
        }
    }

    Ok(())
}
