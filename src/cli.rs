use crate::config::Config;
use std::path::PathBuf;

fn parse_usize(s: &str) -> Option<usize> {
    s.parse::<usize>().ok()
}

fn parse_f64(s: &str) -> Option<f64> {
    s.parse::<f64>().ok()
}

fn parse_output_list(list: &str, clu: &mut bool, stats: &mut bool) {
    for token in list.split(',') {
        match token.trim() {
            "clu" => *clu = true,
            "stats" => *stats = true,
            _ => {}
        }
    }
}

pub fn parse_args(args: &[String]) -> Result<Config, String> {
    let raw_args = args.join(" ");

    let mut network_file: Option<PathBuf> = None;
    let mut out_dir: Option<PathBuf> = None;
    let mut out_name: Option<String> = None;
    let mut seed_file: Option<PathBuf> = None;

    let mut repeat = 1usize;
    let mut resolution = 1.0f64;
    let mut tolerance = 1e-2f64;
    let mut aggregation_tolerance = 0.8f64;
    let mut tolerance_decline = 100.0f64;
    let mut max_iterations = 20usize;
    let mut max_passes = 10usize;
    let mut threads: Option<usize> = None;
    let mut silent = false;
    let mut print_clu = false;
    let mut print_stats = false;

    let mut i = 0usize;
    while i < args.len() {
        let tok = &args[i];

        if let Some(rest) = tok.strip_prefix("--repeat=") {
            if let Some(v) = parse_usize(rest) {
                repeat = v.max(1);
            }
            i += 1;
            continue;
        }
        if let Some(rest) = tok.strip_prefix("--resolution=") {
            if let Some(v) = parse_f64(rest) {
                if v > 0.0 {
                    resolution = v;
                }
            }
            i += 1;
            continue;
        }
        if let Some(rest) = tok.strip_prefix("--tolerance=") {
            if let Some(v) = parse_f64(rest) {
                if v >= 0.0 {
                    tolerance = v;
                }
            }
            i += 1;
            continue;
        }
        if let Some(rest) = tok.strip_prefix("--aggregation-tolerance=") {
            if let Some(v) = parse_f64(rest) {
                if v > 0.0 {
                    aggregation_tolerance = v;
                }
            }
            i += 1;
            continue;
        }
        if let Some(rest) = tok.strip_prefix("--tolerance-decline=") {
            if let Some(v) = parse_f64(rest) {
                if v >= 1.0 {
                    tolerance_decline = v;
                }
            }
            i += 1;
            continue;
        }
        if let Some(rest) = tok.strip_prefix("--max-iterations=") {
            if let Some(v) = parse_usize(rest) {
                if v > 0 {
                    max_iterations = v;
                }
            }
            i += 1;
            continue;
        }
        if let Some(rest) = tok.strip_prefix("--max-passes=") {
            if let Some(v) = parse_usize(rest) {
                if v > 0 {
                    max_passes = v;
                }
            }
            i += 1;
            continue;
        }
        if let Some(rest) = tok.strip_prefix("--threads=") {
            if let Some(v) = parse_usize(rest) {
                if v > 0 {
                    threads = Some(v);
                }
            }
            i += 1;
            continue;
        }
        if let Some(rest) = tok.strip_prefix("--seed-file=") {
            seed_file = Some(PathBuf::from(rest));
            i += 1;
            continue;
        }
        if let Some(rest) = tok.strip_prefix("--out-name=") {
            out_name = Some(rest.to_string());
            i += 1;
            continue;
        }
        if let Some(rest) = tok.strip_prefix("--output=") {
            parse_output_list(rest, &mut print_clu, &mut print_stats);
            i += 1;
            continue;
        }

        match tok.as_str() {
            "--threads" => {
                if let Some(next) = args.get(i + 1) {
                    if let Some(v) = parse_usize(next) {
                        if v > 0 {
                            threads = Some(v);
                        }
                    }
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--repeat" => {
                if let Some(next) = args.get(i + 1) {
                    if let Some(v) = parse_usize(next) {
                        repeat = v.max(1);
                    }
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--resolution" => {
                if let Some(next) = args.get(i + 1) {
                    if let Some(v) = parse_f64(next) {
                        if v > 0.0 {
                            resolution = v;
                        }
                    }
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--seed-file" => {
                if let Some(next) = args.get(i + 1) {
                    seed_file = Some(PathBuf::from(next));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--out-name" => {
                if let Some(next) = args.get(i + 1) {
                    out_name = Some(next.clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--output" | "-o" => {
                if let Some(next) = args.get(i + 1) {
                    parse_output_list(next, &mut print_clu, &mut print_stats);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--clu" => {
                print_clu = true;
                i += 1;
            }
            "--stats" => {
                print_stats = true;
                i += 1;
            }
            "--silent" => {
                silent = true;
                i += 1;
            }
            _ if tok.starts_with('-') => {
                i += 1;
            }
            _ => {
                if network_file.is_none() {
                    network_file = Some(PathBuf::from(tok));
                } else if out_dir.is_none() {
                    out_dir = Some(PathBuf::from(tok));
                }
                i += 1;
            }
        }
    }

    let network_file = network_file
        .ok_or_else(|| "Usage: minimod network_file out_directory [options]".to_string())?;
    let out_dir =
        out_dir.ok_or_else(|| "Usage: minimod network_file out_directory [options]".to_string())?;

    let out_name = match out_name {
        Some(v) => v,
        None => network_file
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("no-name")
            .to_string(),
    };

    if !print_clu && !print_stats {
        print_clu = true;
    }

    Ok(Config {
        raw_args,
        network_file,
        out_dir,
        out_name,
        seed_file,
        repeat,
        resolution,
        tolerance,
        aggregation_tolerance,
        tolerance_decline,
        max_iterations,
        max_passes,
        threads,
        silent,
        print_clu,
        print_stats,
    })
}
