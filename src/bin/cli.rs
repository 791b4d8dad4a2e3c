use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use tracing_subscriber::EnvFilter;

use fedquery::catalog::{Catalog, EndpointCatalog};
use fedquery::config::FederationConfig;
use fedquery::logical::Query;
use fedquery::query::executor::context::install_termination_handler;
use fedquery::query::executor::engine::ExecutionEngine;
use fedquery::source::{HttpContactor, SourceContactor, StreamingContactor};

#[derive(Parser)]
#[command(author, version, about = "fedq - run decomposed SPARQL queries over federated endpoints")]
struct Cli {
    /// Decomposed query, as JSON
    query: PathBuf,

    /// Use blocking operators only
    #[arg(long)]
    blocking: bool,

    /// Read buffer handed to the sources (bytes)
    #[arg(short, long)]
    buffer_size: Option<usize>,

    /// Endpoint description file
    #[arg(short, long)]
    catalog: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Decode answers incrementally from package-streaming endpoints
    #[arg(long)]
    streaming: bool,

    /// Print the physical plan instead of running it
    #[arg(long)]
    explain: bool,
}

impl Cli {
    /// Configuration file values, overridden by the flags given
    fn federation_config(&self) -> Result<FederationConfig> {
        let mut config = match &self.config {
            Some(path) => FederationConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => FederationConfig::default(),
        };
        if self.blocking {
            config.adaptive = false;
        }
        if let Some(size) = self.buffer_size {
            config.buffer_size = size;
        }
        if self.streaming {
            config.streaming_sources = true;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    install_termination_handler().context("Failed to install the termination handler")?;

    let config = cli.federation_config()?;

    let text = fs::read_to_string(&cli.query)
        .with_context(|| format!("Failed to read query from {}", cli.query.display()))?;
    let query: Query = serde_json::from_str(&text).context("Malformed query")?;

    if let Some(path) = &cli.catalog {
        let catalog = Catalog::from_file(path)
            .with_context(|| format!("Failed to load catalog from {}", path.display()))?;
        info!("Loaded {} endpoint descriptions", catalog.len());
        for endpoint in query.endpoints() {
            if catalog.endpoint_prefixes(&endpoint).is_empty() {
                warn!("Endpoint {} is not described in the catalog", endpoint);
            }
        }
    }

    let contactor: Arc<dyn SourceContactor> = if config.streaming_sources {
        Arc::new(StreamingContactor::from_config(&config))
    } else {
        Arc::new(HttpContactor::from_config(&config))
    };
    let engine = ExecutionEngine::new(config, contactor);

    let start = Instant::now();
    let Some(plan) = engine.compile(&query)? else {
        println!("Query has no join blocks, nothing to do");
        return Ok(());
    };

    if cli.explain {
        print!("{}", plan);
        return Ok(());
    }

    let results = engine.execute(plan)?.collect()?;
    if results.row_count() == 0 {
        println!("No answers");
    } else {
        print!("{}", results.to_string_table());
    }
    println!("{} answers in {:.2?}", results.row_count(), start.elapsed());

    Ok(())
}
