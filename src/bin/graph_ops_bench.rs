//! Randomized graph workload for profiling value numbering, deletion,
//! compaction and duplication.
//!
//! ```bash
//! cargo run --release --bin graph_ops_bench -- --nodes 200000 --json
//! RUST_LOG=nodegraph=debug cargo run --bin graph_ops_bench -- --nodes 2000
//! ```

use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use nodegraph::testkit::SampleTypes;
use nodegraph::{CounterMetrics, Graph, GraphOptions, GraphStats, NodeRef};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "graph_ops_bench", about = "Randomized graph IR workload")]
struct Args {
    /// Number of node constructions to attempt.
    #[arg(long, default_value_t = 50_000)]
    nodes: usize,

    /// Distinct constant values; fewer values mean more value-numbering hits.
    #[arg(long, default_value_t = 256)]
    constants: i32,

    /// Percentage of unused nodes deleted during the churn phase.
    #[arg(long, default_value_t = 60)]
    delete_percent: u32,

    /// Optional TOML file with a `[graph]` table of options.
    #[arg(long)]
    config: Option<PathBuf>,

    /// RNG seed for repeatable runs.
    #[arg(long, env = "NODEGRAPH_BENCH_SEED", default_value_t = 42)]
    seed: u64,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct PhaseTiming {
    phase: &'static str,
    micros: u128,
}

#[derive(Debug, Serialize)]
struct Report {
    attempted: usize,
    gvn_hits: usize,
    deleted: usize,
    compressed: bool,
    duplicated: usize,
    nodes_added: u64,
    nodes_removed: u64,
    slots_reclaimed: u64,
    phases: Vec<PhaseTiming>,
    stats: GraphStats,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nodegraph=info")),
        )
        .with_writer(std::io::stderr)
        .init();
    if let Err(err) = try_main() {
        eprintln!("graph_ops_bench failed: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let metrics = Arc::new(CounterMetrics::default());
    let base = match &args.config {
        Some(path) => GraphOptions::from_path(path)?,
        None => GraphOptions::new().verify_graphs(false),
    };
    let options = base
        .from_env()?
        .name("graph_ops_bench")
        .metrics(metrics.clone());

    let types = SampleTypes::new()?;
    let mut graph = types.graph(options);
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut phases = Vec::new();

    let (built, elapsed) = timed(|| build(&types, &mut graph, &mut rng, &args))?;
    phases.push(PhaseTiming::new("build", elapsed));
    info!(live = graph.node_count(), hits = built.1, "bench.build");

    let (deleted, elapsed) = timed(|| churn(&mut graph, &mut rng, args.delete_percent))?;
    phases.push(PhaseTiming::new("churn", elapsed));

    let (compressed, elapsed) = timed(|| graph.maybe_compress())?;
    phases.push(PhaseTiming::new("compress", elapsed));

    let (duplicated, elapsed) = timed(|| graph.copy().map(|(_, map)| map.len()))?;
    phases.push(PhaseTiming::new("copy", elapsed));

    graph.verify()?;

    let report = Report {
        attempted: built.0,
        gvn_hits: built.1,
        deleted,
        compressed,
        duplicated,
        nodes_added: metrics.nodes_added.load(Ordering::Relaxed),
        nodes_removed: metrics.nodes_removed.load(Ordering::Relaxed),
        slots_reclaimed: metrics.slots_reclaimed.load(Ordering::Relaxed),
        phases,
        stats: graph.stats(),
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

impl PhaseTiming {
    fn new(phase: &'static str, elapsed: Duration) -> Self {
        Self {
            phase,
            micros: elapsed.as_micros(),
        }
    }
}

fn timed<T>(
    f: impl FnOnce() -> nodegraph::Result<T>,
) -> Result<(T, Duration), Box<dyn Error>> {
    let start = Instant::now();
    let value = f()?;
    Ok((value, start.elapsed()))
}

/// Builds a random expression soup and returns (attempted, gvn hits).
fn build(
    types: &SampleTypes,
    graph: &mut Graph,
    rng: &mut StdRng,
    args: &Args,
) -> nodegraph::Result<(usize, usize)> {
    let mut values: Vec<NodeRef> = Vec::with_capacity(args.nodes);
    let mut hits = 0;
    for _ in 0..args.nodes {
        let before = graph.node_count();
        let node = match rng.gen_range(0..10) {
            0..=3 => types.constant(graph, rng.gen_range(0..args.constants.max(1)))?,
            _ if values.len() < 2 => types.constant(graph, 0)?,
            4..=5 => {
                let (x, y) = pick_pair(&values, rng);
                types.add(graph, x, y)?
            }
            6..=7 => {
                let (x, y) = pick_pair(&values, rng);
                types.sub(graph, x, y)?
            }
            8 => {
                let x = values[rng.gen_range(0..values.len())];
                graph.build(&types.neg).input("value", x).add_or_unique()?
            }
            _ => {
                let len = rng.gen_range(1..=4);
                let inputs: Vec<NodeRef> = values.choose_multiple(rng, len).copied().collect();
                types.phi(graph, &inputs)?
            }
        };
        if graph.node_count() == before {
            hits += 1;
        }
        values.push(node);
    }
    Ok((args.nodes, hits))
}

fn pick_pair(values: &[NodeRef], rng: &mut StdRng) -> (NodeRef, NodeRef) {
    let x = values[rng.gen_range(0..values.len())];
    let y = values[rng.gen_range(0..values.len())];
    (x, y)
}

/// Deletes a share of the unused nodes, cascading through inputs that lose
/// their last usage.
fn churn(graph: &mut Graph, rng: &mut StdRng, percent: u32) -> nodegraph::Result<usize> {
    let mut stack: Vec<NodeRef> = graph
        .nodes()
        .filter(|&node| !graph.has_usages(node) && rng.gen_ratio(percent.min(100), 100))
        .collect();
    let mut deleted = 0;
    let mut inputs = Vec::new();
    while let Some(node) = stack.pop() {
        if !graph.is_alive(node) || graph.has_usages(node) {
            continue;
        }
        inputs.clear();
        graph.push_inputs(node, &mut inputs);
        graph.safe_delete(node)?;
        deleted += 1;
        stack.extend(inputs.iter().copied().filter(|&input| !graph.has_usages(input)));
    }
    Ok(deleted)
}

fn print_report(report: &Report) {
    println!("GRAPH OPS BENCH");
    println!(
        "{:<12} {:>10} {:>10} {:>10} {:>10}",
        "ATTEMPTED", "GVN HITS", "DELETED", "LIVE", "COPIED"
    );
    println!(
        "{:<12} {:>10} {:>10} {:>10} {:>10}",
        report.attempted,
        report.gvn_hits,
        report.deleted,
        report.stats.live_nodes,
        report.duplicated
    );
    println!();
    for phase in &report.phases {
        println!("{:<12} {:>12} µs", phase.phase, phase.micros);
    }
    println!(
        "compressed={} compressions={} reclaimed={}",
        report.compressed, report.stats.compressions, report.slots_reclaimed
    );
}
