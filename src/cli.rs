use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use vibecheck::config::Config;
use vibecheck::engine::Engine;
use vibecheck::vector::{
    persist, Compression, ExternalId, IndexBuilder, Metric, SearchOutcome, VectorStore,
};

#[derive(Parser, Debug)]
#[command(
    name = "vibecheck",
    version,
    about = "Build and query IVF indexes of song embeddings"
)]
pub struct Cli {
    /// Log level (info|warning|error|critical); overrides RUST_LOG
    #[arg(long, global = true)]
    pub logs: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Cluster a JSONL file of embeddings and write an index file
    Build(BuildArgs),
    /// Search an index file
    Query(QueryArgs),
    /// Print index metadata and list-size statistics as JSON
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// JSONL input, one {"id": .., "vector": [..]} per line
    #[arg(long)]
    pub input: PathBuf,
    /// Index file to write (defaults to VIBECHECK_INDEX_PATH)
    #[arg(long)]
    pub output: Option<PathBuf>,
    #[arg(long)]
    pub clusters: Option<usize>,
    #[arg(long)]
    pub iterations: Option<usize>,
    #[arg(long)]
    pub seed: Option<u64>,
    /// l2 | inner-product | cosine
    #[arg(long)]
    pub metric: Option<String>,
    /// none | residual-q8
    #[arg(long)]
    pub compression: Option<String>,
}

#[derive(Args, Debug)]
#[command(group(
    clap::ArgGroup::new("source")
        .required(true)
        .args(["vector", "queries"])
))]
pub struct QueryArgs {
    /// Index file (defaults to VIBECHECK_INDEX_PATH)
    #[arg(long)]
    pub index: Option<PathBuf>,
    /// Comma-separated query vector, e.g. "0.1,0.2,0.3"
    #[arg(long, allow_hyphen_values = true)]
    pub vector: Option<String>,
    /// JSONL file of {"vector": [..]} queries, optionally with an "id"
    #[arg(long)]
    pub queries: Option<PathBuf>,
    #[arg(long)]
    pub k: Option<usize>,
    #[arg(long)]
    pub nprobe: Option<usize>,
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// Emit one JSON object per query instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    #[arg(long)]
    pub index: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct QueryRecord {
    #[serde(default)]
    id: Option<ExternalId>,
    vector: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct HitView<'a> {
    rank: usize,
    id: &'a ExternalId,
    row: usize,
    distance: f32,
    score: f32,
}

pub fn run_build(mut config: Config, args: BuildArgs) -> anyhow::Result<()> {
    if let Some(clusters) = args.clusters {
        config.clusters = clusters;
    }
    if let Some(iterations) = args.iterations {
        config.max_iterations = iterations;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(raw) = args.metric.as_deref() {
        config.metric = Metric::parse(raw)
            .with_context(|| format!("unknown metric `{raw}` (l2|inner-product|cosine)"))?;
    }
    if let Some(raw) = args.compression.as_deref() {
        config.compression = Compression::parse(raw)
            .with_context(|| format!("unknown compression `{raw}` (none|residual-q8)"))?;
    }
    let output = args
        .output
        .or_else(|| config.index_path.clone())
        .context("--output or VIBECHECK_INDEX_PATH is required")?;

    let file = File::open(&args.input)
        .with_context(|| format!("open {}", args.input.display()))?;
    let store = VectorStore::from_jsonl(BufReader::new(file))
        .with_context(|| format!("load {}", args.input.display()))?;
    tracing::info!(
        vectors = store.size(),
        dim = store.dimension(),
        input = %args.input.display(),
        "input loaded"
    );

    let index = IndexBuilder::new(config.build_params())
        .run(&store)
        .context("build index")?;
    let bytes = persist::save(&index, &output)
        .with_context(|| format!("write {}", output.display()))?;
    println!(
        "Index written to {}: vectors={} clusters={} dim={} metric={:?} compression={:?} bytes={}",
        output.display(),
        index.len(),
        index.cluster_count(),
        index.dimension(),
        index.metric(),
        index.compression(),
        bytes
    );
    Ok(())
}

pub fn run_query(mut config: Config, args: QueryArgs) -> anyhow::Result<()> {
    if let Some(path) = args.index {
        config.index_path = Some(path);
    }
    if let Some(k) = args.k {
        config.top_k = k;
    }
    if let Some(nprobe) = args.nprobe {
        config.nprobe = nprobe;
    }
    if let Some(ms) = args.timeout_ms {
        config.search_timeout_ms = ms;
    }
    let queries = match (&args.vector, &args.queries) {
        (Some(raw), _) => vec![(None, parse_vector(raw)?)],
        (None, Some(path)) => read_queries(path)?,
        (None, None) => anyhow::bail!("--vector or --queries is required"),
    };

    let engine = Engine::open(config).context("open index")?;
    let metric = engine.snapshot().metric();
    let vectors: Vec<Vec<f32>> = queries.iter().map(|(_, v)| v.clone()).collect();
    let results = engine.search_batch(&vectors)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for (qno, ((label, _), result)) in queries.iter().zip(results).enumerate() {
        let label = label
            .as_ref()
            .map(ExternalId::to_string)
            .unwrap_or_else(|| qno.to_string());
        let outcome = result.with_context(|| format!("query {label}"))?;
        if args.json {
            print_json(&mut out, &label, metric, &outcome)?;
        } else {
            print_text(&mut out, &label, metric, &outcome)?;
        }
    }
    engine.shutdown();
    Ok(())
}

pub fn run_inspect(config: Config, args: InspectArgs) -> anyhow::Result<()> {
    let path = args
        .index
        .or(config.index_path)
        .context("--index or VIBECHECK_INDEX_PATH is required")?;
    let file_bytes = std::fs::metadata(&path)
        .with_context(|| format!("stat {}", path.display()))?
        .len();
    let index = persist::load(&path).with_context(|| format!("load {}", path.display()))?;
    let report = json!({
        "path": path.display().to_string(),
        "file_bytes": file_bytes,
        "meta": index.meta(),
        "lists": index.list_stats(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_text<W: Write>(
    out: &mut W,
    label: &str,
    metric: Metric,
    outcome: &SearchOutcome,
) -> anyhow::Result<()> {
    writeln!(
        out,
        "query {label}: probed={} scanned={}{}",
        outcome.probed,
        outcome.scanned,
        if outcome.timed_out { " (timed out)" } else { "" }
    )?;
    for (rank, hit) in outcome.neighbors.iter().enumerate() {
        writeln!(
            out,
            "  {:>2}. {}  score={:.6}",
            rank + 1,
            hit.id,
            metric.score(hit.distance)
        )?;
    }
    Ok(())
}

fn print_json<W: Write>(
    out: &mut W,
    label: &str,
    metric: Metric,
    outcome: &SearchOutcome,
) -> anyhow::Result<()> {
    let hits: Vec<HitView<'_>> = outcome
        .neighbors
        .iter()
        .enumerate()
        .map(|(rank, hit)| HitView {
            rank: rank + 1,
            id: &hit.id,
            row: hit.row,
            distance: hit.distance,
            score: metric.score(hit.distance),
        })
        .collect();
    let line = json!({
        "query": label,
        "neighbors": hits,
        "probed": outcome.probed,
        "scanned": outcome.scanned,
        "timed_out": outcome.timed_out,
    });
    writeln!(out, "{line}")?;
    Ok(())
}

fn parse_vector(raw: &str) -> anyhow::Result<Vec<f32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<f32>()
                .with_context(|| format!("`{part}` is not a number"))
        })
        .collect()
}

fn read_queries(path: &Path) -> anyhow::Result<Vec<(Option<ExternalId>, Vec<f32>)>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut queries = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("read line {}", lineno + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record: QueryRecord = serde_json::from_str(trimmed)
            .with_context(|| format!("parse query line {}", lineno + 1))?;
        queries.push((record.id, record.vector));
    }
    if queries.is_empty() {
        anyhow::bail!("{} holds no queries", path.display());
    }
    Ok(queries)
}

pub fn map_log_level(raw: &str) -> Option<&'static str> {
    match raw.to_ascii_lowercase().as_str() {
        "info" => Some("info"),
        "warning" | "warn" => Some("warn"),
        "error" => Some("error"),
        "critical" => Some("error"),
        _ => None,
    }
}
