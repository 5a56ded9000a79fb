use crate::config::Config;
use crate::graph::{ArrayGraph, Graph};
use crate::louvain::LouvainResult;
use crate::modularity::modularity;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn fmt_sig(v: f64, sig: usize) -> String {
    if !v.is_finite() || v == 0.0 {
        return v.to_string();
    }
    let digits_before = v.abs().log10().floor() as i32 + 1;
    let decimals = (sig as i32 - digits_before).max(0) as usize;
    let mut s = format!("{:.*}", decimals, v);
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    if s == "-0" {
        s = "0".to_string();
    }
    s
}

fn format_started_at(start_time: SystemTime) -> String {
    let dt: chrono::DateTime<chrono::Local> = start_time.into();
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Dense 1-based community ids ordered by first occurrence over present
/// vertices, so output files are stable for a given membership.
fn ordered_communities(graph: &ArrayGraph, membership: &[u32]) -> (Vec<u32>, usize) {
    let span = graph.span();
    let mut relabel = vec![0u32; span];
    let mut next = 0u32;
    let mut out = vec![0u32; span];
    for u in 0..span as u32 {
        if !graph.has_vertex(u) {
            continue;
        }
        let c = membership[u as usize] as usize;
        if relabel[c] == 0 {
            next += 1;
            relabel[c] = next;
        }
        out[u as usize] = relabel[c];
    }
    (out, next as usize)
}

fn write_header(
    w: &mut BufWriter<File>,
    cfg: &Config,
    started: &str,
    elapsed: Duration,
    communities: usize,
    q: f64,
) -> Result<(), String> {
    writeln!(w, "# v{}", VERSION).map_err(|e| e.to_string())?;
    writeln!(w, "# minimod {}", cfg.raw_args).map_err(|e| e.to_string())?;
    writeln!(w, "# started at {}", started).map_err(|e| e.to_string())?;
    writeln!(w, "# completed in {} s", elapsed.as_secs_f64()).map_err(|e| e.to_string())?;
    writeln!(w, "# partitioned into {} communities", communities).map_err(|e| e.to_string())?;
    writeln!(w, "# modularity {}", fmt_sig(q, 6)).map_err(|e| e.to_string())?;
    writeln!(w, "# resolution {}", fmt_sig(cfg.resolution, 6)).map_err(|e| e.to_string())?;
    Ok(())
}

fn write_clu_file(
    path: &Path,
    cfg: &Config,
    graph: &ArrayGraph,
    relabeled: &[u32],
    communities: usize,
    q: f64,
    started: &str,
    elapsed: Duration,
) -> Result<(), String> {
    let file = File::create(path)
        .map_err(|e| format!("Error opening file '{}': {}", path.display(), e))?;
    let mut w = BufWriter::new(file);

    write_header(&mut w, cfg, started, elapsed, communities, q)?;
    writeln!(w, "# node_id community").map_err(|e| e.to_string())?;

    for u in 0..graph.span() as u32 {
        if !graph.has_vertex(u) {
            continue;
        }
        writeln!(w, "{} {}", u, relabeled[u as usize]).map_err(|e| e.to_string())?;
    }

    w.flush().map_err(|e| e.to_string())
}

fn write_stats_file(
    path: &Path,
    cfg: &Config,
    result: &LouvainResult,
    communities: usize,
    q: f64,
    started: &str,
    elapsed: Duration,
) -> Result<(), String> {
    let file = File::create(path)
        .map_err(|e| format!("Error opening file '{}': {}", path.display(), e))?;
    let mut w = BufWriter::new(file);

    write_header(&mut w, cfg, started, elapsed, communities, q)?;
    writeln!(w, "passes {}", result.passes).map_err(|e| e.to_string())?;
    writeln!(w, "iterations {}", result.iterations).map_err(|e| e.to_string())?;
    writeln!(w, "affected_initially {}", result.affected_vertices).map_err(|e| e.to_string())?;
    writeln!(w, "time_total_ms {}", fmt_sig(result.time.as_secs_f64() * 1e3, 6))
        .map_err(|e| e.to_string())?;
    writeln!(
        w,
        "time_preprocessing_ms {}",
        fmt_sig(result.preprocessing_time.as_secs_f64() * 1e3, 6)
    )
    .map_err(|e| e.to_string())?;
    writeln!(
        w,
        "time_first_pass_ms {}",
        fmt_sig(result.first_pass_time.as_secs_f64() * 1e3, 6)
    )
    .map_err(|e| e.to_string())?;
    writeln!(
        w,
        "time_local_move_ms {}",
        fmt_sig(result.local_move_time.as_secs_f64() * 1e3, 6)
    )
    .map_err(|e| e.to_string())?;
    writeln!(
        w,
        "time_aggregation_ms {}",
        fmt_sig(result.aggregation_time.as_secs_f64() * 1e3, 6)
    )
    .map_err(|e| e.to_string())?;

    w.flush().map_err(|e| e.to_string())
}

pub fn write_outputs(
    cfg: &Config,
    graph: &ArrayGraph,
    result: &LouvainResult,
    start_time: SystemTime,
    elapsed: Duration,
) -> Result<Vec<PathBuf>, String> {
    if !cfg.any_output_enabled() {
        return Ok(Vec::new());
    }

    fs::create_dir_all(&cfg.out_dir).map_err(|e| {
        format!(
            "Can't write to directory '{}': {}",
            cfg.out_dir.display(),
            e
        )
    })?;

    let (relabeled, communities) = ordered_communities(graph, &result.membership);
    let q = modularity(graph, &result.membership, cfg.resolution);
    let started = format_started_at(start_time);

    let mut base = cfg.out_dir.clone();
    base.push(&cfg.out_name);
    let mut written = Vec::new();

    if cfg.print_clu {
        let p = base.with_extension("clu");
        write_clu_file(
            &p, cfg, graph, &relabeled, communities, q, &started, elapsed,
        )?;
        written.push(p);
    }
    if cfg.print_stats {
        let p = base.with_extension("stats");
        write_stats_file(&p, cfg, result, communities, q, &started, elapsed)?;
        written.push(p);
    }

    Ok(written)
}
