use anyhow::Context;
use clap::Parser;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vibecheck::vector::{
    BuildParams, Compression, ExternalId, IndexBuilder, Metric, SearchEngine, SearchParams,
    VectorStore,
};

#[derive(Parser, Debug)]
#[command(
    name = "vibecheck bench",
    version,
    about = "Recall/latency sweep over probe counts on synthetic clustered embeddings"
)]
struct BenchCli {
    /// Vector dimension
    #[arg(long, default_value_t = 384)]
    dim: usize,
    /// Number of vectors to index
    #[arg(long, default_value_t = 50_000)]
    rows: usize,
    /// Number of latent topics the synthetic data is drawn around
    #[arg(long, default_value_t = 200)]
    topics: usize,
    /// IVF cluster count
    #[arg(long, default_value_t = 256)]
    clusters: usize,
    /// k-means iteration cap
    #[arg(long, default_value_t = 25)]
    iterations: usize,
    /// Number of search queries
    #[arg(long, default_value_t = 1_000)]
    queries: usize,
    /// Top-k for search
    #[arg(long, default_value_t = 10)]
    k: usize,
    /// Probe counts to sweep, comma-separated
    #[arg(long, value_delimiter = ',', default_values_t = [1usize, 2, 4, 8, 16, 32, 64])]
    nprobe: Vec<usize>,
    /// l2 | inner-product | cosine
    #[arg(long, default_value = "cosine")]
    metric: String,
    /// none | residual-q8
    #[arg(long, default_value = "none")]
    compression: String,
    /// Random seed used for reproducible vectors and clustering
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct SweepRow {
    nprobe: usize,
    recall: Option<f32>,
    mean_scanned: f64,
    p50_us: u128,
    p95_us: u128,
    p99_us: u128,
    qps: f64,
}

#[derive(Serialize)]
struct Report {
    dim: usize,
    rows: usize,
    clusters: usize,
    k: usize,
    metric: Metric,
    compression: Compression,
    build_ms: u128,
    sweep: Vec<SweepRow>,
}

fn main() -> anyhow::Result<()> {
    let cli = BenchCli::parse();
    let metric = Metric::parse(&cli.metric)
        .with_context(|| format!("unknown metric `{}`", cli.metric))?;
    let compression = Compression::parse(&cli.compression)
        .with_context(|| format!("unknown compression `{}`", cli.compression))?;
    if cli.dim == 0 || cli.rows == 0 || cli.topics == 0 {
        anyhow::bail!("--dim, --rows and --topics must be positive");
    }

    let mut rng = StdRng::seed_from_u64(cli.seed);
    let centers: Vec<Vec<f32>> = (0..cli.topics)
        .map(|_| random_vector(cli.dim, &mut rng))
        .collect();
    let mut store = VectorStore::with_dimension(cli.dim);
    for row in 0..cli.rows {
        let center = &centers[rng.gen_range(0..centers.len())];
        let v = jitter(center, 0.15, &mut rng);
        store.add(&v, row as u64)?;
    }
    let queries = generate_queries(&centers, cli.queries, cli.seed ^ 0x9E37_79B9);
    println!(
        "[dataset] dim={} rows={} topics={} queries={}",
        cli.dim, cli.rows, cli.topics, cli.queries
    );

    let params = BuildParams {
        clusters: cli.clusters,
        max_iterations: cli.iterations,
        seed: cli.seed,
        metric,
        compression,
    };
    let started = Instant::now();
    let index = IndexBuilder::new(params).run(&store).context("build index")?;
    let build_ms = started.elapsed().as_millis();
    println!(
        "[build] clusters={} metric={:?} compression={:?} took={}ms",
        index.cluster_count(),
        metric,
        compression,
        build_ms
    );

    let truth = brute_force(&store, metric, &queries, cli.k);
    let engine = SearchEngine::new(Arc::new(index));
    let mut sweep = Vec::with_capacity(cli.nprobe.len());
    for &nprobe in &cli.nprobe {
        let mut samples = Vec::with_capacity(queries.len());
        let mut found: Vec<Vec<ExternalId>> = Vec::with_capacity(queries.len());
        let mut scanned = 0usize;
        let search = SearchParams {
            k: cli.k,
            num_probes: nprobe,
            timeout: None,
        };
        for q in &queries {
            let t = Instant::now();
            let outcome = engine.search_with(q, &search)?;
            samples.push(t.elapsed());
            scanned += outcome.scanned;
            found.push(outcome.neighbors.into_iter().map(|n| n.id).collect());
        }
        let stats = LatencyStats::from_samples(&samples);
        let row = SweepRow {
            nprobe,
            recall: recall_against(&truth, &found),
            mean_scanned: scanned as f64 / queries.len().max(1) as f64,
            p50_us: stats.p50,
            p95_us: stats.p95,
            p99_us: stats.p99,
            qps: stats.throughput,
        };
        if !cli.json {
            println!(
                "[search] nprobe={:<4} recall@{}={:.4} scanned={:.0} p50={}us p95={}us p99={}us qps={:.0}",
                row.nprobe,
                cli.k,
                row.recall.unwrap_or(0.0),
                row.mean_scanned,
                row.p50_us,
                row.p95_us,
                row.p99_us,
                row.qps
            );
        }
        sweep.push(row);
    }

    if cli.json {
        let report = Report {
            dim: cli.dim,
            rows: cli.rows,
            clusters: cli.clusters,
            k: cli.k,
            metric,
            compression,
            build_ms,
            sweep,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

/// Exact top-k ids per query over the raw store.
fn brute_force(
    store: &VectorStore,
    metric: Metric,
    queries: &[Vec<f32>],
    k: usize,
) -> Vec<Vec<ExternalId>> {
    let rows: Vec<Vec<f32>> = store
        .iter()
        .map(|(_, _, v)| metric.prepare(v).into_owned())
        .collect();
    queries
        .par_iter()
        .map(|q| {
            let q = metric.prepare(q);
            let mut scored: Vec<(f32, usize)> = rows
                .iter()
                .enumerate()
                .map(|(row, v)| (metric.distance(&q, v), row))
                .collect();
            scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            scored
                .into_iter()
                .take(k)
                .filter_map(|(_, row)| store.id(row).cloned())
                .collect()
        })
        .collect()
}

fn recall_against(baseline: &[Vec<ExternalId>], current: &[Vec<ExternalId>]) -> Option<f32> {
    if baseline.is_empty() || baseline.len() != current.len() {
        return None;
    }
    let mut hits = 0f32;
    let mut total = 0f32;
    for (base, candidate) in baseline.iter().zip(current.iter()) {
        if base.is_empty() {
            continue;
        }
        let set: HashSet<&ExternalId> = base.iter().collect();
        total += base.len() as f32;
        hits += candidate.iter().filter(|id| set.contains(id)).count() as f32;
    }
    if total <= f32::EPSILON {
        None
    } else {
        Some(hits / total)
    }
}

#[derive(Clone, Copy)]
struct LatencyStats {
    p50: u128,
    p95: u128,
    p99: u128,
    throughput: f64,
}

impl LatencyStats {
    fn from_samples(samples: &[Duration]) -> Self {
        if samples.is_empty() {
            return Self {
                p50: 0,
                p95: 0,
                p99: 0,
                throughput: 0.0,
            };
        }
        let mut micros: Vec<u128> = samples.iter().map(|d| d.as_micros()).collect();
        micros.sort_unstable();
        let total = samples.iter().fold(Duration::ZERO, |acc, v| acc + *v);
        let throughput = if total.as_secs_f64() > 0.0 {
            samples.len() as f64 / total.as_secs_f64()
        } else {
            0.0
        };
        Self {
            p50: percentile(&micros, 50.0),
            p95: percentile(&micros, 95.0),
            p99: percentile(&micros, 99.0),
            throughput,
        }
    }
}

fn percentile(sorted_micros: &[u128], p: f64) -> u128 {
    if sorted_micros.is_empty() {
        return 0;
    }
    let idx = ((p / 100.0) * (sorted_micros.len() as f64 - 1.0)).round() as usize;
    sorted_micros[idx.min(sorted_micros.len() - 1)]
}

fn generate_queries(centers: &[Vec<f32>], count: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let center = &centers[rng.gen_range(0..centers.len())];
            jitter(center, 0.2, &mut rng)
        })
        .collect()
}

fn random_vector(dim: usize, rng: &mut StdRng) -> Vec<f32> {
    (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

fn jitter(center: &[f32], spread: f32, rng: &mut StdRng) -> Vec<f32> {
    center
        .iter()
        .map(|c| c + rng.gen_range(-spread..spread))
        .collect()
}
