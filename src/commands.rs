// Command-line commands

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::catalog::CacheKeyStrategy;
use crate::config::{self, Config};
use crate::engine::{SearchEngine, SearchHit};
use crate::similarity::{self, Feature, FeatureVector};

#[derive(Debug, Parser)]
#[command(name = "tunematch", version, about = "Find MIDI files similar to a reference MIDI file")]
pub struct Cli {
    /// Config file (default: <config dir>/tunematch/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Dataset directory to search
    #[arg(long, global = true, env = "TUNEMATCH_DATASET")]
    pub dataset: Option<PathBuf>,

    /// Directory for corpus snapshots
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Name the dataset's cache explicitly
    #[arg(long, global = true, conflicts_with = "fingerprint")]
    pub cache_key: Option<String>,

    /// Key the cache by a fingerprint of the dataset's file listing
    #[arg(long, global = true)]
    pub fingerprint: bool,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Rank the dataset by similarity to QUERY
    Search {
        query: PathBuf,

        /// Number of results (default: max_results from config)
        #[arg(short = 'n', long)]
        top: Option<usize>,

        /// Override one weight, e.g. --weight tempo=2.0 (repeatable)
        #[arg(short, long = "weight", value_parser = parse_weight)]
        weights: Vec<(String, f64)>,
    },
    /// Rescan the dataset and rewrite its cache
    Scan,
    /// Show corpus status and the weight table
    Info,
    /// Print the raw feature vector of one file
    Features { file: PathBuf },
}

fn parse_weight(s: &str) -> Result<(String, f64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", s))?;
    let name = name.trim();
    if Feature::from_name(name).is_none() {
        return Err(format!(
            "unknown feature '{}' (expected one of: {})",
            name,
            Feature::names().join(", ")
        ));
    }
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid weight '{}': {}", value, e))?;
    Ok((name.to_string(), value))
}

/// Resolve the configuration from file and command-line overrides.
pub fn resolve_config(cli: &Cli) -> anyhow::Result<Config> {
    let flag_key = if cli.fingerprint {
        Some(CacheKeyStrategy::Fingerprint)
    } else {
        cli.cache_key
            .as_ref()
            .map(|key| CacheKeyStrategy::Explicit { key: key.clone() })
    };

    let mut config = match (&cli.config, &flag_key) {
        (Some(path), _) => Config::load(path)?,
        (None, Some(key)) => Config::load_or_default(&config::default_config_path(), key.clone()),
        (None, None) => Config::load(&config::default_config_path()).map_err(|e| {
            anyhow::anyhow!(
                "no cache key configured: pass --cache-key <NAME> or --fingerprint, \
                 or set cache_key in the config file ({})",
                e
            )
        })?,
    };

    if let Some(key) = flag_key {
        config.cache_key = key;
    }
    if let Some(dataset) = &cli.dataset {
        config.dataset_dir = dataset.clone();
    }
    if let Some(cache_dir) = &cli.cache_dir {
        config.cache_dir = cache_dir.clone();
    }
    config.validate()?;
    Ok(config)
}

pub fn execute(cli: Cli) -> anyhow::Result<()> {
    if let Command::Features { file } = &cli.command {
        let settings = resolve_config(&cli)
            .map(|c| c.extraction_settings())
            .unwrap_or_default();
        return print_features(file, &similarity::extract_features(file, &settings)?, cli.json);
    }

    let config = resolve_config(&cli)?;
    let engine = match cli.command {
        Command::Scan => SearchEngine::open_rescanned(config)?,
        _ => SearchEngine::open(config)?,
    };

    match &cli.command {
        Command::Search { query, top, weights } => {
            let overrides: HashMap<&str, f64> = weights.iter().map(|(k, v)| (k.as_str(), *v)).collect();
            let k = top.unwrap_or(engine.config().max_results);
            let hits = engine.search_by_weights_map(query, &overrides, k)?;
            print_hits(query, &hits, cli.json)
        }
        Command::Scan => {
            let status = engine.status();
            print_json_or(cli.json, &status, || {
                println!(
                    "Scanned {}: {} files indexed, cache {}",
                    status.dataset_root.display(),
                    status.files,
                    status.cache_path.display()
                );
            })
        }
        Command::Info => {
            let status = engine.status();
            let weights = engine.default_weights();
            let info = InfoOutput {
                status: status.clone(),
                weights: Feature::ALL.iter().map(|f| (f.name(), weights.get(*f))).collect(),
            };
            print_json_or(cli.json, &info, || {
                println!("Dataset:  {}", status.dataset_root.display());
                println!("Files:    {}", status.files);
                println!("Source:   {:?}", status.source);
                println!("Cache:    {}", status.cache_path.display());
                println!();
                println!("{:<20} {:>8}", "dimension", "weight");
                for (name, w) in &info.weights {
                    println!("{:<20} {:>8.3}", name, w);
                }
            })
        }
        Command::Features { .. } => Ok(()),
    }
}

#[derive(Serialize)]
struct InfoOutput {
    status: crate::engine::EngineStatus,
    weights: Vec<(&'static str, f64)>,
}

#[derive(Serialize)]
struct FeaturesOutput<'a> {
    file: &'a Path,
    features: Vec<(&'static str, f64)>,
}

fn print_features(file: &Path, vector: &FeatureVector, json: bool) -> anyhow::Result<()> {
    let out = FeaturesOutput { file, features: vector.named() };
    print_json_or(json, &out, || {
        println!("{}", file.display());
        for (name, value) in &out.features {
            println!("  {:<20} {:>12.4}", name, value);
        }
    })
}

fn print_hits(query: &Path, hits: &[SearchHit], json: bool) -> anyhow::Result<()> {
    print_json_or(json, &hits, || {
        if hits.is_empty() {
            println!("No results for {}", query.display());
            return;
        }
        for (rank, hit) in hits.iter().enumerate() {
            println!("{:>4}  {:.4}  {}", rank + 1, hit.similarity, hit.path.display());
        }
    })
}

fn print_json_or<T: Serialize>(json: bool, value: &T, text: impl FnOnce()) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text();
    }
    Ok(())
}
