//! Command-line shell over the Luna memory tiers.
//!
//! Uses the offline hashing embedder, so similarity reflects shared words
//! rather than meaning.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use luna_memory::{
    Embedder, HashingEmbedder, MemoryConfig, MemoryMetadata, MemoryTierManager, Remembered,
    SharedEmbedder,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Store and recall memories from the command line.
#[derive(Parser, Debug)]
#[command(name = "memory-shell", version, about, long_about = None)]
struct Cli {
    /// JSON configuration file; defaults apply when omitted.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Overrides the configured data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a memory, routed to a tier by its source.
    Remember {
        /// Text to remember.
        text: String,
        /// Provenance tag, e.g. `fact`, `conversation` or `sensor`.
        #[arg(long, default_value = "conversation")]
        source: String,
        /// Importance in 0.0..=1.0.
        #[arg(long, default_value_t = 0.5)]
        importance: f32,
    },
    /// Search every tier.
    Recall {
        /// Query text.
        query: String,
        /// Maximum number of hits.
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Store a memory for a named entity.
    Note {
        /// Entity the memory belongs to.
        entity: String,
        /// Text to remember.
        text: String,
    },
    /// Search the memories of a named entity.
    Ask {
        /// Entity whose memories are searched.
        entity: String,
        /// Query text.
        query: String,
        /// Maximum number of hits.
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Remove aged medium-term memories.
    Decay,
    /// Print tier statistics as JSON.
    Stats,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => MemoryConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => MemoryConfig::default(),
    };
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    let dimension = config.dimension()?;
    let embedder = Arc::new(SharedEmbedder::new(dimension, move || {
        Ok(Arc::new(HashingEmbedder::new(dimension)) as Arc<dyn Embedder>)
    }));
    embedder.initialize()?;

    match cli.command {
        Command::Remember {
            text,
            source,
            importance,
        } => {
            let tiers = config.open_tiers(&embedder)?;
            let remembered = tiers.remember(&text, &source, importance)?;
            report_remembered(&tiers, &remembered);
            tiers.stop();
        }
        Command::Recall { query, limit } => {
            let tiers = config.open_tiers(&embedder)?;
            for hit in tiers.recall(&query, limit) {
                println!("{:.3}  [{}]  {}  ({})", hit.similarity, hit.tier, hit.text, hit.source);
            }
            tiers.stop();
        }
        Command::Note { entity, text } => {
            let registry = config.registry(Arc::clone(&embedder));
            let outcome = registry
                .store_for(&entity)?
                .add_text(&text, "note", MemoryMetadata::default())?;
            info!(entity = %entity, id = %outcome.id(), merged = outcome.is_merged(), "noted");
            registry.shutdown();
        }
        Command::Ask {
            entity,
            query,
            limit,
        } => {
            let registry = config.registry(Arc::clone(&embedder));
            let memory = registry.store_for(&entity)?;
            for hit in memory.search_text(&query, limit, config.tiers.recall_min_similarity) {
                println!("{:.3}  {}", hit.similarity, hit.text);
            }
            registry.shutdown();
        }
        Command::Decay => {
            let tiers = config.open_tiers(&embedder)?;
            let report = tiers.decay();
            println!("{}", serde_json::to_string_pretty(&report)?);
            tiers.stop();
        }
        Command::Stats => {
            let tiers = config.open_tiers(&embedder)?;
            println!("{}", serde_json::to_string_pretty(&tiers.stats())?);
            tiers.stop();
        }
    }

    Ok(())
}

fn report_remembered(tiers: &MemoryTierManager, remembered: &Remembered) {
    match remembered {
        Remembered::ShortTerm(id) => {
            // The buffer does not outlive this process; promote what qualifies now.
            let report = tiers.promote_batch();
            info!(
                entry = %id,
                promoted = report.promoted,
                "buffered in short-term memory"
            );
        }
        Remembered::Stored { tier, outcome } => {
            info!(
                %tier,
                id = %outcome.id(),
                merged = outcome.is_merged(),
                "stored"
            );
        }
    }
}
