//! Multi-level Louvain modularity optimization.
//!
//! The algorithm alternates a local-moving phase (each affected vertex is
//! relocated to the neighboring community with the best modularity gain)
//! with an aggregation phase (each community collapses into one vertex of
//! a coarser graph). Both phases run either serially or data-parallel over
//! the vertex-id space; the parallel kernels carry the `_par` suffix.

use crate::atomics;
use crate::csr::DiCsr;
use crate::graph::Graph;
use crate::modularity::delta_modularity;
use crossbeam::queue::ArrayQueue;
use log::debug;
use rayon::prelude::*;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// Vertices (or communities) handed to one worker at a time.
const CHUNK: usize = 2048;

#[derive(Debug, Clone)]
pub struct LouvainOptions {
    /// Run the whole algorithm this many times; timings are averaged.
    pub repeat: usize,
    /// Modularity resolution in (0, 1].
    pub resolution: f64,
    /// Initial per-pass gain threshold below which local-moving halts.
    pub tolerance: f64,
    /// Stop when surviving-communities / graph-order reaches this ratio.
    pub aggregation_tolerance: f64,
    /// The tolerance is divided by this after each non-terminal pass.
    pub tolerance_decline: f64,
    /// Local-moving iteration cap per pass.
    pub max_iterations: usize,
    /// Cap on local-moving + aggregation alternations.
    pub max_passes: usize,
    /// Worker threads; `None` resolves from the environment, 1 is serial.
    pub threads: Option<usize>,
}

impl Default for LouvainOptions {
    fn default() -> Self {
        Self {
            repeat: 1,
            resolution: 1.0,
            tolerance: 1e-2,
            aggregation_tolerance: 0.8,
            tolerance_decline: 100.0,
            max_iterations: 20,
            max_passes: 10,
            threads: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LouvainResult {
    /// Community of each original vertex, indexed by vertex id.
    pub membership: Vec<u32>,
    /// Local-moving iterations summed over all passes.
    pub iterations: usize,
    /// Passes performed.
    pub passes: usize,
    pub time: Duration,
    pub preprocessing_time: Duration,
    pub first_pass_time: Duration,
    pub local_move_time: Duration,
    pub aggregation_time: Duration,
    /// Vertices flagged affected before the first pass.
    pub affected_vertices: usize,
}

/// Sparse accumulator of edge weight per community, reset in O(touched).
///
/// A dense weight array indexed by community id plus the list of ids
/// touched since the last clear. First touch is detected by a zero weight,
/// which relies on edge weights being strictly positive.
#[derive(Debug)]
pub struct ScanBuffer {
    touched: Vec<u32>,
    weights: Vec<f64>,
}

impl ScanBuffer {
    pub fn new(span: usize) -> Self {
        Self {
            touched: Vec::new(),
            weights: vec![0.0; span],
        }
    }

    /// Add `w` to community `c`, recording `c` on first touch.
    #[inline]
    pub fn touch(&mut self, c: u32, w: f64) {
        if self.weights[c as usize] == 0.0 {
            self.touched.push(c);
        }
        self.weights[c as usize] += w;
    }

    #[inline]
    pub fn weight(&self, c: u32) -> f64 {
        self.weights[c as usize]
    }

    /// Touched community ids in insertion order.
    #[inline]
    pub fn touched(&self) -> &[u32] {
        &self.touched
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.touched.iter().map(|&c| (c, self.weights[c as usize]))
    }

    pub fn clear(&mut self) {
        for &c in &self.touched {
            self.weights[c as usize] = 0.0;
        }
        self.touched.clear();
    }
}

// ---------------------------------------------------------------------------
// Weight tables

/// Total edge weight of each vertex; self-loops are summed once.
pub fn vertex_weights<G: Graph>(vtot: &mut [f64], g: &G) {
    for u in 0..g.span() as u32 {
        if !g.has_vertex(u) {
            continue;
        }
        let mut sum = 0.0;
        g.for_each_edge(u, |_, w| sum += w);
        vtot[u as usize] = sum;
    }
}

pub fn vertex_weights_par<G: Graph>(vtot: &mut [f64], g: &G) {
    let vtot = atomics::f64_slice(vtot);
    par_vertex_chunks(g.span(), |u| {
        if !g.has_vertex(u) {
            return;
        }
        let mut sum = 0.0;
        g.for_each_edge(u, |_, w| sum += w);
        vtot[u as usize].store(sum, Ordering::Relaxed);
    });
}

/// Total vertex weight of each community under `vcom`.
pub fn community_weights<G: Graph>(ctot: &mut [f64], g: &G, vcom: &[u32], vtot: &[f64]) {
    for u in 0..g.span() as u32 {
        if !g.has_vertex(u) {
            continue;
        }
        ctot[vcom[u as usize] as usize] += vtot[u as usize];
    }
}

pub fn community_weights_par<G: Graph>(ctot: &mut [f64], g: &G, vcom: &[u32], vtot: &[f64]) {
    let ctot = atomics::f64_slice(ctot);
    par_vertex_chunks(g.span(), |u| {
        if !g.has_vertex(u) {
            return;
        }
        ctot[vcom[u as usize] as usize].fetch_add(vtot[u as usize], Ordering::Relaxed);
    });
}

/// Singleton partition: each vertex alone in the community named after it.
pub fn initialize<G: Graph>(vcom: &mut [u32], ctot: &mut [f64], g: &G, vtot: &[f64]) {
    for u in 0..g.span() as u32 {
        if !g.has_vertex(u) {
            continue;
        }
        vcom[u as usize] = u;
        ctot[u as usize] = vtot[u as usize];
    }
}

pub fn initialize_par<G: Graph>(vcom: &mut [u32], ctot: &mut [f64], g: &G, vtot: &[f64]) {
    let vcom = atomics::u32_slice(vcom);
    let ctot = atomics::f64_slice(ctot);
    par_vertex_chunks(g.span(), |u| {
        if !g.has_vertex(u) {
            return;
        }
        vcom[u as usize].store(u, Ordering::Relaxed);
        ctot[u as usize].store(vtot[u as usize], Ordering::Relaxed);
    });
}

/// Partition seeded from `q`.
pub fn initialize_from<G: Graph>(
    vcom: &mut [u32],
    ctot: &mut [f64],
    g: &G,
    vtot: &[f64],
    q: &[u32],
) {
    for u in 0..g.span() as u32 {
        if !g.has_vertex(u) {
            continue;
        }
        let c = q[u as usize];
        vcom[u as usize] = c;
        ctot[c as usize] += vtot[u as usize];
    }
}

pub fn initialize_from_par<G: Graph>(
    vcom: &mut [u32],
    ctot: &mut [f64],
    g: &G,
    vtot: &[f64],
    q: &[u32],
) {
    let vcom = atomics::u32_slice(vcom);
    let ctot = atomics::f64_slice(ctot);
    par_vertex_chunks(g.span(), |u| {
        if !g.has_vertex(u) {
            return;
        }
        let c = q[u as usize];
        vcom[u as usize].store(c, Ordering::Relaxed);
        ctot[c as usize].fetch_add(vtot[u as usize], Ordering::Relaxed);
    });
}

// ---------------------------------------------------------------------------
// Local-moving phase

/// Accumulate the communities adjacent to `u` into the scan buffer.
pub fn scan_communities<G: Graph>(
    buf: &mut ScanBuffer,
    g: &G,
    u: u32,
    vcom: &[u32],
    include_self: bool,
) {
    g.for_each_edge(u, |v, w| {
        if !include_self && v == u {
            return;
        }
        buf.touch(vcom[v as usize], w);
    });
}

/// Best target community for a vertex of weight `vtot_u` currently in `d`,
/// with the gain of moving there. `None` when no strictly positive gain
/// exists. Ties keep the community seen first.
pub fn choose_community(
    buf: &ScanBuffer,
    d: u32,
    vtot_u: f64,
    ctot: impl Fn(u32) -> f64,
    m: f64,
    r: f64,
) -> Option<(u32, f64)> {
    let e_ud = buf.weight(d);
    let ctot_d = ctot(d);
    let mut best: Option<(u32, f64)> = None;
    for &c in buf.touched() {
        if c == d {
            continue;
        }
        let e = delta_modularity(buf.weight(c), e_ud, vtot_u, ctot(c), ctot_d, m, r);
        if e > best.map_or(0.0, |(_, be)| be) {
            best = Some((c, e));
        }
    }
    best
}

/// Local-moving phase: sweep affected vertices until `converged` accepts
/// an iteration's summed gain or `max_iterations` is reached.
///
/// `converged` is called once per completed iteration with the gain of
/// that iteration and its 0-based index. Returns the iterations performed,
/// or 0 when the very first iteration produced no gain.
pub fn local_move<G, FC>(
    g: &G,
    vcom: &mut [u32],
    ctot: &mut [f64],
    vaff: &mut [u8],
    buf: &mut ScanBuffer,
    vtot: &[f64],
    m: f64,
    r: f64,
    max_iterations: usize,
    mut converged: FC,
) -> usize
where
    G: Graph,
    FC: FnMut(f64, usize) -> bool,
{
    let mut l = 0;
    let mut el = 0.0;
    while l < max_iterations {
        el = 0.0;
        for u in 0..g.span() as u32 {
            if !g.has_vertex(u) || vaff[u as usize] == 0 {
                continue;
            }
            buf.clear();
            scan_communities(buf, g, u, vcom, false);
            let d = vcom[u as usize];
            let pick = choose_community(buf, d, vtot[u as usize], |c| ctot[c as usize], m, r);
            if let Some((c, e)) = pick {
                ctot[d as usize] -= vtot[u as usize];
                ctot[c as usize] += vtot[u as usize];
                vcom[u as usize] = c;
                g.for_each_edge_key(u, |v| vaff[v as usize] = 1);
                el += e;
            }
            vaff[u as usize] = 0;
        }
        l += 1;
        if converged(el, l - 1) {
            break;
        }
    }
    if l > 1 || el > 0.0 {
        l
    } else {
        0
    }
}

/// Parallel local-moving phase over dynamic vertex-id chunks.
///
/// Community totals are updated with atomic adds and the affected flags
/// with idempotent stores; a vertex's membership is written only by the
/// worker processing it, and concurrent readers may observe either side
/// of a move.
pub fn local_move_par<G, FC>(
    g: &G,
    vcom: &mut [u32],
    ctot: &mut [f64],
    vaff: &mut [u8],
    bufs: &ArrayQueue<ScanBuffer>,
    vtot: &[f64],
    m: f64,
    r: f64,
    max_iterations: usize,
    mut converged: FC,
) -> usize
where
    G: Graph,
    FC: FnMut(f64, usize) -> bool,
{
    let span = g.span();
    let vcom = atomics::u32_slice(vcom);
    let ctot = atomics::f64_slice(ctot);
    let vaff = atomics::u8_slice(vaff);
    let chunks = span.div_ceil(CHUNK);

    let mut l = 0;
    let mut el = 0.0;
    while l < max_iterations {
        el = (0..chunks)
            .into_par_iter()
            .map(|ci| {
                let lo = (ci * CHUNK) as u32;
                let hi = (span.min((ci + 1) * CHUNK)) as u32;
                let mut buf = bufs.pop().unwrap_or_else(|| ScanBuffer::new(span));
                let mut gained = 0.0;
                for u in lo..hi {
                    if !g.has_vertex(u) || vaff[u as usize].load(Ordering::Relaxed) == 0 {
                        continue;
                    }
                    buf.clear();
                    g.for_each_edge(u, |v, w| {
                        if v == u {
                            return;
                        }
                        buf.touch(vcom[v as usize].load(Ordering::Relaxed), w);
                    });
                    let d = vcom[u as usize].load(Ordering::Relaxed);
                    let pick = choose_community(
                        &buf,
                        d,
                        vtot[u as usize],
                        |c| ctot[c as usize].load(Ordering::Relaxed),
                        m,
                        r,
                    );
                    if let Some((c, e)) = pick {
                        ctot[d as usize].fetch_sub(vtot[u as usize], Ordering::Relaxed);
                        ctot[c as usize].fetch_add(vtot[u as usize], Ordering::Relaxed);
                        vcom[u as usize].store(c, Ordering::Relaxed);
                        g.for_each_edge_key(u, |v| {
                            vaff[v as usize].store(1, Ordering::Relaxed);
                        });
                        gained += e;
                    }
                    vaff[u as usize].store(0, Ordering::Relaxed);
                }
                let _ = bufs.push(buf);
                gained
            })
            .sum();
        l += 1;
        if converged(el, l - 1) {
            break;
        }
    }
    if l > 1 || el > 0.0 {
        l
    } else {
        0
    }
}

// ---------------------------------------------------------------------------
// Community indexing

/// Mark the communities that still have members; returns their count.
pub fn community_exists<G: Graph>(marks: &mut [u32], g: &G, vcom: &[u32]) -> usize {
    marks.fill(0);
    let mut count = 0;
    for u in 0..g.span() as u32 {
        if !g.has_vertex(u) {
            continue;
        }
        let c = vcom[u as usize] as usize;
        if marks[c] == 0 {
            marks[c] = 1;
            count += 1;
        }
    }
    count
}

pub fn community_exists_par<G: Graph>(marks: &mut [u32], g: &G, vcom: &[u32]) -> usize {
    marks.fill(0);
    let marks = atomics::u32_slice(marks);
    let span = g.span();
    (0..span.div_ceil(CHUNK))
        .into_par_iter()
        .map(|ci| {
            let lo = (ci * CHUNK) as u32;
            let hi = (span.min((ci + 1) * CHUNK)) as u32;
            let mut local = 0usize;
            for u in lo..hi {
                if !g.has_vertex(u) {
                    continue;
                }
                let c = vcom[u as usize] as usize;
                if marks[c].swap(1, Ordering::Relaxed) == 0 {
                    local += 1;
                }
            }
            local
        })
        .sum()
}

/// Rewrite `marks` (0/1 existence) into dense new ids by exclusive prefix
/// sum, then map `vcom` through it. Returns the community count; every
/// membership lies in `[0, count)` on return.
pub fn renumber_communities(vcom: &mut [u32], marks: &mut [u32]) -> usize {
    let count = exclusive_scan(marks);
    for v in vcom.iter_mut() {
        *v = marks[*v as usize];
    }
    count as usize
}

pub fn renumber_communities_par(vcom: &mut [u32], marks: &mut [u32]) -> usize {
    let count = exclusive_scan(marks);
    vcom.par_iter_mut().for_each(|v| *v = marks[*v as usize]);
    count as usize
}

/// Fold one pass's membership into the stable per-original-vertex map.
pub fn lookup_communities(a: &mut [u32], vcom: &[u32]) {
    for v in a.iter_mut() {
        *v = vcom[*v as usize];
    }
}

pub fn lookup_communities_par(a: &mut [u32], vcom: &[u32]) {
    a.par_iter_mut().for_each(|v| *v = vcom[*v as usize]);
}

/// Group vertices by community into `cv` (offsets + concatenated vertex
/// lists); `cv` must already be respanned to the community count.
pub fn community_vertices<G: Graph>(cv: &mut DiCsr, g: &G, vcom: &[u32]) {
    let c_count = cv.span();
    cv.offsets[..=c_count].fill(0);
    for u in 0..g.span() as u32 {
        if !g.has_vertex(u) {
            continue;
        }
        cv.offsets[vcom[u as usize] as usize] += 1;
    }
    exclusive_scan(&mut cv.offsets[..=c_count]);
    cv.degrees[..c_count].fill(0);
    for u in 0..g.span() as u32 {
        if !g.has_vertex(u) {
            continue;
        }
        cv.add_key(vcom[u as usize], u);
    }
}

pub fn community_vertices_par<G: Graph>(cv: &mut DiCsr, g: &G, vcom: &[u32]) {
    let c_count = cv.span();
    cv.offsets[..=c_count].fill(0);
    {
        let offsets = atomics::u32_slice(&mut cv.offsets[..=c_count]);
        par_vertex_chunks(g.span(), |u| {
            if !g.has_vertex(u) {
                return;
            }
            offsets[vcom[u as usize] as usize].fetch_add(1, Ordering::Relaxed);
        });
    }
    exclusive_scan(&mut cv.offsets[..=c_count]);
    cv.degrees[..c_count].fill(0);
    let offsets = &cv.offsets;
    let degrees = atomics::u32_slice(&mut cv.degrees);
    let edge_keys = atomics::u32_slice(&mut cv.edge_keys);
    par_vertex_chunks(g.span(), |u| {
        if !g.has_vertex(u) {
            return;
        }
        let c = vcom[u as usize] as usize;
        let k = degrees[c].fetch_add(1, Ordering::Relaxed);
        edge_keys[(offsets[c] + k) as usize].store(u, Ordering::Relaxed);
    });
}

// ---------------------------------------------------------------------------
// Aggregation phase

/// Collapse each community of `g` into one vertex of `z`.
///
/// `z.offsets` bound each community's super-edges by its summed member
/// degree; the written degree may fall short of that bound and the slack
/// stays. Intra-community weight becomes the super-vertex's self-loop.
pub fn aggregate<G: Graph>(z: &mut DiCsr, buf: &mut ScanBuffer, g: &G, vcom: &[u32], cv: &DiCsr) {
    let c_count = cv.span();
    z.offsets[..=c_count].fill(0);
    for u in 0..g.span() as u32 {
        if !g.has_vertex(u) {
            continue;
        }
        z.offsets[vcom[u as usize] as usize] += g.degree(u) as u32;
    }
    exclusive_scan(&mut z.offsets[..=c_count]);
    z.degrees[..c_count].fill(0);
    for c in 0..c_count as u32 {
        if cv.degree(c) == 0 {
            continue;
        }
        buf.clear();
        cv.for_each_edge_key(c, |u| scan_communities(buf, g, u, vcom, true));
        for (d, w) in buf.iter() {
            z.add_edge(c, d, w);
        }
    }
}

pub fn aggregate_par<G: Graph>(
    z: &mut DiCsr,
    bufs: &ArrayQueue<ScanBuffer>,
    g: &G,
    vcom: &[u32],
    cv: &DiCsr,
) {
    let c_count = cv.span();
    z.offsets[..=c_count].fill(0);
    {
        let offsets = atomics::u32_slice(&mut z.offsets[..=c_count]);
        par_vertex_chunks(g.span(), |u| {
            if !g.has_vertex(u) {
                return;
            }
            offsets[vcom[u as usize] as usize].fetch_add(g.degree(u) as u32, Ordering::Relaxed);
        });
    }
    exclusive_scan(&mut z.offsets[..=c_count]);
    z.degrees[..c_count].fill(0);

    let offsets = &z.offsets;
    let degrees = atomics::u32_slice(&mut z.degrees);
    let edge_keys = atomics::u32_slice(&mut z.edge_keys);
    let edge_values = atomics::f64_slice(&mut z.edge_values);
    (0..c_count.div_ceil(CHUNK)).into_par_iter().for_each(|ci| {
        let lo = (ci * CHUNK) as u32;
        let hi = (c_count.min((ci + 1) * CHUNK)) as u32;
        let mut buf = bufs.pop().unwrap_or_else(|| ScanBuffer::new(g.span()));
        for c in lo..hi {
            if cv.degree(c) == 0 {
                continue;
            }
            buf.clear();
            cv.for_each_edge_key(c, |u| scan_communities(&mut buf, g, u, vcom, true));
            let base = offsets[c as usize];
            let mut k = 0u32;
            for (d, w) in buf.iter() {
                edge_keys[(base + k) as usize].store(d, Ordering::Relaxed);
                edge_values[(base + k) as usize].store(w, Ordering::Relaxed);
                k += 1;
            }
            degrees[c as usize].store(k, Ordering::Relaxed);
        }
        let _ = bufs.push(buf);
    });
}

// ---------------------------------------------------------------------------
// Pass controller

/// Current graph of a pass: the borrowed input on pass 0, the owned
/// coarser graph afterwards.
enum Level<'a, G> {
    Input(&'a G),
    Coarse(&'a DiCsr),
}

impl<G: Graph> Graph for Level<'_, G> {
    fn span(&self) -> usize {
        match self {
            Level::Input(g) => g.span(),
            Level::Coarse(g) => g.span(),
        }
    }

    fn order(&self) -> usize {
        match self {
            Level::Input(g) => g.order(),
            Level::Coarse(g) => g.order(),
        }
    }

    fn size(&self) -> usize {
        match self {
            Level::Input(g) => g.size(),
            Level::Coarse(g) => g.size(),
        }
    }

    fn has_vertex(&self, u: u32) -> bool {
        match self {
            Level::Input(g) => g.has_vertex(u),
            Level::Coarse(g) => g.has_vertex(u),
        }
    }

    fn degree(&self, u: u32) -> usize {
        match self {
            Level::Input(g) => g.degree(u),
            Level::Coarse(g) => g.degree(u),
        }
    }

    fn edge_weight_total(&self) -> f64 {
        match self {
            Level::Input(g) => g.edge_weight_total(),
            Level::Coarse(g) => g.edge_weight_total(),
        }
    }

    fn for_each_edge<F: FnMut(u32, f64)>(&self, u: u32, f: F) {
        match self {
            Level::Input(g) => g.for_each_edge(u, f),
            Level::Coarse(g) => g.for_each_edge(u, f),
        }
    }

    fn for_each_edge_key<F: FnMut(u32)>(&self, u: u32, f: F) {
        match self {
            Level::Input(g) => g.for_each_edge_key(u, f),
            Level::Coarse(g) => g.for_each_edge_key(u, f),
        }
    }
}

fn louvain_seq<G, FM>(x: &G, q: Option<&[u32]>, o: &LouvainOptions, fm: &FM) -> LouvainResult
where
    G: Graph,
    FM: Fn(&mut [u8]),
{
    let s = x.span();
    let r = o.resolution;
    let m = x.edge_weight_total() / 2.0;
    let repeat = o.repeat.max(1);

    let mut vaff = vec![0u8; s];
    let mut vcom = vec![0u32; s];
    let mut a = vec![0u32; s];
    let mut vtot = vec![0.0f64; s];
    let mut ctot = vec![0.0f64; s];
    let mut buf = ScanBuffer::new(s);
    let mut cv = DiCsr::new(s, s);
    let mut y = DiCsr::new(s, x.size());
    let mut z = DiCsr::new(s, x.size());

    let mut iterations = 0;
    let mut passes = 0;
    let mut affected = 0;
    let mut time = Duration::ZERO;
    let mut tm = Duration::ZERO;
    let mut tp = Duration::ZERO;
    let mut tl = Duration::ZERO;
    let mut ta = Duration::ZERO;

    for _ in 0..repeat {
        let run_start = Instant::now();
        vcom.fill(0);
        a.fill(0);
        vtot.fill(0.0);
        ctot.fill(0.0);
        vaff.fill(0);
        cv.respan(s);
        y.respan(s);
        z.respan(s);

        let fm_start = Instant::now();
        fm(&mut vaff);
        tm += fm_start.elapsed();
        affected = vaff.iter().filter(|&&b| b != 0).count();

        let t0 = Instant::now();
        let mut first_pass = None;

        vertex_weights(&mut vtot, x);
        match q {
            Some(q) => initialize_from(&mut vcom, &mut ctot, x, &vtot, q),
            None => initialize(&mut vcom, &mut ctot, x, &vtot),
        }

        let mut e_tol = o.tolerance;
        iterations = 0;
        passes = 0;

        while m > 0.0 && passes < o.max_passes {
            if passes == 1 {
                first_pass = Some(t0.elapsed());
            }
            {
                let g = if passes == 0 {
                    Level::Input(x)
                } else {
                    Level::Coarse(&y)
                };
                let span_cur = g.span();

                let mv_start = Instant::now();
                let moved = local_move(
                    &g,
                    &mut vcom[..span_cur],
                    &mut ctot[..span_cur],
                    &mut vaff[..span_cur],
                    &mut buf,
                    &vtot[..span_cur],
                    m,
                    r,
                    o.max_iterations,
                    |el, _| el <= e_tol,
                );
                tl += mv_start.elapsed();

                iterations += moved.max(1);
                passes += 1;
                if moved <= 1 || passes >= o.max_passes {
                    break;
                }

                let cn = community_exists(&mut cv.degrees[..span_cur], &g, &vcom[..span_cur]);
                debug!(
                    "pass {}: {} iterations, {} of {} communities survive",
                    passes,
                    moved,
                    cn,
                    g.order()
                );
                if cn as f64 / g.order() as f64 >= o.aggregation_tolerance {
                    break;
                }

                renumber_communities(&mut vcom[..span_cur], &mut cv.degrees[..span_cur]);
                if passes == 1 {
                    a.copy_from_slice(&vcom);
                } else {
                    lookup_communities(&mut a, &vcom);
                }

                cv.respan(cn);
                z.respan(cn);
                community_vertices(&mut cv, &g, &vcom[..span_cur]);
                let ag_start = Instant::now();
                aggregate(&mut z, &mut buf, &g, &vcom[..span_cur], &cv);
                ta += ag_start.elapsed();
            }
            std::mem::swap(&mut y, &mut z);

            vcom.fill(0);
            vtot.fill(0.0);
            ctot.fill(0.0);
            vaff.fill(1);
            vertex_weights(&mut vtot, &y);
            initialize(&mut vcom, &mut ctot, &y, &vtot);
            e_tol /= o.tolerance_decline;
        }

        if passes <= 1 {
            a.copy_from_slice(&vcom);
        } else {
            lookup_communities(&mut a, &vcom);
        }

        tp += first_pass.unwrap_or_else(|| t0.elapsed());
        time += run_start.elapsed();
    }

    let n = repeat as u32;
    LouvainResult {
        membership: a,
        iterations,
        passes,
        time: time / n,
        preprocessing_time: tm / n,
        first_pass_time: tp / n,
        local_move_time: tl / n,
        aggregation_time: ta / n,
        affected_vertices: affected,
    }
}

fn louvain_par<G, FM>(
    x: &G,
    q: Option<&[u32]>,
    o: &LouvainOptions,
    fm: &FM,
    threads: usize,
) -> LouvainResult
where
    G: Graph,
    FM: Fn(&mut [u8]) + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .expect("failed to build worker thread pool");

    if trace_threads_enabled() {
        eprintln!(
            "[louvain-par] requested_threads={} pool_threads={}",
            threads,
            pool.current_num_threads()
        );
    }

    let s = x.span();
    let r = o.resolution;
    let m = x.edge_weight_total() / 2.0;
    let repeat = o.repeat.max(1);

    let bufs = ArrayQueue::new(threads);
    for _ in 0..threads {
        let _ = bufs.push(ScanBuffer::new(s));
    }

    let mut vaff = vec![0u8; s];
    let mut vcom = vec![0u32; s];
    let mut a = vec![0u32; s];
    let mut vtot = vec![0.0f64; s];
    let mut ctot = vec![0.0f64; s];
    let mut cv = DiCsr::new(s, s);
    let mut y = DiCsr::new(s, x.size());
    let mut z = DiCsr::new(s, x.size());

    let mut iterations = 0;
    let mut passes = 0;
    let mut affected = 0;
    let mut time = Duration::ZERO;
    let mut tm = Duration::ZERO;
    let mut tp = Duration::ZERO;
    let mut tl = Duration::ZERO;
    let mut ta = Duration::ZERO;

    pool.install(|| {
        for _ in 0..repeat {
            let run_start = Instant::now();
            vcom.fill(0);
            a.fill(0);
            vtot.fill(0.0);
            ctot.fill(0.0);
            vaff.fill(0);
            cv.respan(s);
            y.respan(s);
            z.respan(s);

            let fm_start = Instant::now();
            fm(&mut vaff);
            tm += fm_start.elapsed();
            affected = vaff.iter().filter(|&&b| b != 0).count();

            let t0 = Instant::now();
            let mut first_pass = None;

            vertex_weights_par(&mut vtot, x);
            match q {
                Some(q) => initialize_from_par(&mut vcom, &mut ctot, x, &vtot, q),
                None => initialize_par(&mut vcom, &mut ctot, x, &vtot),
            }

            let mut e_tol = o.tolerance;
            iterations = 0;
            passes = 0;

            while m > 0.0 && passes < o.max_passes {
                if passes == 1 {
                    first_pass = Some(t0.elapsed());
                }
                {
                    let g = if passes == 0 {
                        Level::Input(x)
                    } else {
                        Level::Coarse(&y)
                    };
                    let span_cur = g.span();

                    let mv_start = Instant::now();
                    let moved = local_move_par(
                        &g,
                        &mut vcom[..span_cur],
                        &mut ctot[..span_cur],
                        &mut vaff[..span_cur],
                        &bufs,
                        &vtot[..span_cur],
                        m,
                        r,
                        o.max_iterations,
                        |el, _| el <= e_tol,
                    );
                    tl += mv_start.elapsed();

                    iterations += moved.max(1);
                    passes += 1;
                    if moved <= 1 || passes >= o.max_passes {
                        break;
                    }

                    let cn =
                        community_exists_par(&mut cv.degrees[..span_cur], &g, &vcom[..span_cur]);
                    debug!(
                        "pass {}: {} iterations, {} of {} communities survive",
                        passes,
                        moved,
                        cn,
                        g.order()
                    );
                    if cn as f64 / g.order() as f64 >= o.aggregation_tolerance {
                        break;
                    }

                    renumber_communities_par(&mut vcom[..span_cur], &mut cv.degrees[..span_cur]);
                    if passes == 1 {
                        a.copy_from_slice(&vcom);
                    } else {
                        lookup_communities_par(&mut a, &vcom);
                    }

                    cv.respan(cn);
                    z.respan(cn);
                    community_vertices_par(&mut cv, &g, &vcom[..span_cur]);
                    let ag_start = Instant::now();
                    aggregate_par(&mut z, &bufs, &g, &vcom[..span_cur], &cv);
                    ta += ag_start.elapsed();
                }
                std::mem::swap(&mut y, &mut z);

                vcom.fill(0);
                vtot.fill(0.0);
                ctot.fill(0.0);
                vaff.fill(1);
                vertex_weights_par(&mut vtot, &y);
                initialize_par(&mut vcom, &mut ctot, &y, &vtot);
                e_tol /= o.tolerance_decline;
            }

            if passes <= 1 {
                a.copy_from_slice(&vcom);
            } else {
                lookup_communities_par(&mut a, &vcom);
            }

            tp += first_pass.unwrap_or_else(|| t0.elapsed());
            time += run_start.elapsed();
        }
    });

    let n = repeat as u32;
    LouvainResult {
        membership: a,
        iterations,
        passes,
        time: time / n,
        preprocessing_time: tm / n,
        first_pass_time: tp / n,
        local_move_time: tl / n,
        aggregation_time: ta / n,
        affected_vertices: affected,
    }
}

// ---------------------------------------------------------------------------
// Entry points

/// Detect communities with every vertex initially affected.
pub fn detect<G: Graph>(x: &G, q: Option<&[u32]>, o: &LouvainOptions) -> LouvainResult {
    detect_with(x, q, o, |vaff: &mut [u8]| vaff.fill(1))
}

/// Detect communities with a caller-supplied affected-vertex seeding.
pub fn detect_with<G, FM>(x: &G, q: Option<&[u32]>, o: &LouvainOptions, fm: FM) -> LouvainResult
where
    G: Graph,
    FM: Fn(&mut [u8]) + Sync,
{
    let threads = resolve_threads(o.threads);
    if threads <= 1 {
        louvain_seq(x, q, o, &fm)
    } else {
        louvain_par(x, q, o, &fm, threads)
    }
}

#[inline]
fn trace_threads_enabled() -> bool {
    std::env::var_os("MINIMOD_TRACE_THREADS").is_some()
}

#[inline]
fn env_threads() -> Option<usize> {
    for key in ["MINIMOD_THREADS", "RAYON_NUM_THREADS"] {
        if let Some(v) = std::env::var_os(key) {
            if let Ok(s) = v.into_string() {
                if let Ok(n) = s.parse::<usize>() {
                    if n > 0 {
                        return Some(n);
                    }
                }
            }
        }
    }
    None
}

#[inline]
fn resolve_threads(requested: Option<usize>) -> usize {
    let default_threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    requested
        .or_else(env_threads)
        .unwrap_or(default_threads)
        .max(1)
}

/// Run `f` for every vertex id, dynamically scheduled in chunks.
fn par_vertex_chunks(span: usize, f: impl Fn(u32) + Sync) {
    (0..span.div_ceil(CHUNK)).into_par_iter().for_each(|ci| {
        let lo = (ci * CHUNK) as u32;
        let hi = (span.min((ci + 1) * CHUNK)) as u32;
        for u in lo..hi {
            f(u);
        }
    });
}

/// Exclusive prefix sum in place; returns the total.
fn exclusive_scan(xs: &mut [u32]) -> u32 {
    let mut sum = 0;
    for x in xs.iter_mut() {
        let t = *x;
        *x = sum;
        sum += t;
    }
    sum
}
