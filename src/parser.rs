use rustc_hash::{FxHashMap, FxHashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Undirected network read from disk: declared vertex ids plus links
/// keyed by their ordered endpoint pair, multi-links pre-summed.
#[derive(Debug, Clone, Default)]
pub struct ParsedNetwork {
    pub vertices: FxHashSet<u32>,
    pub links: FxHashMap<(u32, u32), f64>,
}

enum Section {
    Links,
    Vertices,
    Ignore,
}

fn first_word_lower(line: &str) -> String {
    line.split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn parse_link_line(line: &str) -> Result<(u32, u32, f64), String> {
    let mut parts = line.split_whitespace();
    let s = parts
        .next()
        .ok_or_else(|| format!("Can't parse link data from line '{}'", line))?
        .parse::<u32>()
        .map_err(|_| format!("Can't parse link data from line '{}'", line))?;
    let t = parts
        .next()
        .ok_or_else(|| format!("Can't parse link data from line '{}'", line))?
        .parse::<u32>()
        .map_err(|_| format!("Can't parse link data from line '{}'", line))?;
    let w = match parts.next() {
        Some(v) => v
            .parse::<f64>()
            .map_err(|_| format!("Can't parse link weight from line '{}'", line))?,
        None => 1.0,
    };
    Ok((s, t, w))
}

fn parse_vertex_line(line: &str) -> Result<u32, String> {
    line.split_whitespace()
        .next()
        .ok_or_else(|| format!("Can't parse vertex id from line '{}'", line))?
        .parse::<u32>()
        .map_err(|_| format!("Can't parse vertex id from line '{}'", line))
}

/// Parse a network file: bare `s t [w]` link lines, optionally organized
/// into `*Vertices` / `*Edges` / `*Links` sections. Links with
/// non-positive weight are dropped; repeated links sum their weights.
pub fn parse_network_file(path: &Path) -> Result<ParsedNetwork, String> {
    let file =
        File::open(path).map_err(|e| format!("Error opening file '{}': {}", path.display(), e))?;
    let reader = BufReader::new(file);

    let mut parsed = ParsedNetwork::default();
    let mut section = Section::Links;

    for line_res in reader.lines() {
        let line =
            line_res.map_err(|e| format!("Error reading file '{}': {}", path.display(), e))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with('*') {
            let heading = first_word_lower(line);
            section = match heading.as_str() {
                "*vertices" => Section::Vertices,
                "*edges" | "*links" => Section::Links,
                _ => Section::Ignore,
            };
            continue;
        }

        match section {
            Section::Ignore => {}
            Section::Vertices => {
                let id = parse_vertex_line(line)?;
                parsed.vertices.insert(id);
            }
            Section::Links => {
                let (s, t, w) = parse_link_line(line)?;
                if w <= 0.0 {
                    continue;
                }
                let key = if s <= t { (s, t) } else { (t, s) };
                *parsed.links.entry(key).or_insert(0.0) += w;
                parsed.vertices.insert(s);
                parsed.vertices.insert(t);
            }
        }
    }

    if parsed.vertices.is_empty() {
        return Err("Network is empty".to_string());
    }

    Ok(parsed)
}

/// Parse a seed partition: one `vertex community` pair per line, comments
/// and blank lines ignored. Unlisted vertices stay in their own community.
pub fn parse_seed_file(path: &Path, span: usize) -> Result<Vec<u32>, String> {
    let file =
        File::open(path).map_err(|e| format!("Error opening file '{}': {}", path.display(), e))?;
    let reader = BufReader::new(file);

    let mut q: Vec<u32> = (0..span as u32).collect();
    for line_res in reader.lines() {
        let line =
            line_res.map_err(|e| format!("Error reading file '{}': {}", path.display(), e))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('*') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let u = parts
            .next()
            .ok_or_else(|| format!("Can't parse seed data from line '{}'", line))?
            .parse::<usize>()
            .map_err(|_| format!("Can't parse seed data from line '{}'", line))?;
        let c = parts
            .next()
            .ok_or_else(|| format!("Can't parse seed data from line '{}'", line))?
            .parse::<usize>()
            .map_err(|_| format!("Can't parse seed data from line '{}'", line))?;
        if u >= span || c >= span {
            return Err(format!(
                "Seed entry '{}' is out of range for a network of span {}",
                line, span
            ));
        }
        q[u] = c as u32;
    }

    Ok(q)
}
