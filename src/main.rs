use minimod::graph::{ArrayGraph, Graph};
use minimod::louvain::LouvainOptions;
use minimod::modularity::modularity;
use std::env;
use std::process::ExitCode;
use std::time::Instant;

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().skip(1).collect();
    let cfg = minimod::cli::parse_args(&args)?;

    let start_system = std::time::SystemTime::now();
    let start = Instant::now();

    let parsed = minimod::parser::parse_network_file(&cfg.network_file)?;
    let graph = ArrayGraph::from_parsed(&parsed)?;
    log::info!(
        "read network: {} vertices, {} directed edges",
        graph.order(),
        graph.size()
    );

    let seed = match &cfg.seed_file {
        Some(path) => Some(minimod::parser::parse_seed_file(path, graph.span())?),
        None => None,
    };

    let options = LouvainOptions {
        repeat: cfg.repeat,
        resolution: cfg.resolution,
        tolerance: cfg.tolerance,
        aggregation_tolerance: cfg.aggregation_tolerance,
        tolerance_decline: cfg.tolerance_decline,
        max_iterations: cfg.max_iterations,
        max_passes: cfg.max_passes,
        threads: cfg.threads,
    };

    let result = minimod::louvain::detect(&graph, seed.as_deref(), &options);

    let elapsed = start.elapsed();
    let written = minimod::output::write_outputs(&cfg, &graph, &result, start_system, elapsed)?;
    for path in &written {
        log::info!("wrote {}", path.display());
    }

    if !cfg.silent {
        println!(
            "Partitioned in {} passes ({} iterations), modularity {:.6}",
            result.passes,
            result.iterations,
            modularity(&graph, &result.membership, cfg.resolution)
        );
    }

    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(1)
        }
    }
}
