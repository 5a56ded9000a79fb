use crate::parser::ParsedNetwork;

/// Read-only view the detection core needs from a graph.
///
/// Vertex ids are dense in `[0, span)`; the span may contain holes
/// (`has_vertex` is false there). The graph is stored as a symmetric
/// directed graph: every undirected edge appears in both directions, a
/// self-loop appears once. Edge weights must be strictly positive and
/// multi-edges must be pre-summed.
pub trait Graph: Sync {
    /// One past the largest possible vertex id.
    fn span(&self) -> usize;

    /// Number of vertices actually present.
    fn order(&self) -> usize;

    /// Number of directed edge slots (capacity bound for aggregation).
    fn size(&self) -> usize;

    fn has_vertex(&self, u: u32) -> bool;

    fn degree(&self, u: u32) -> usize;

    /// Sum of all directed edge weights, i.e. twice the undirected total.
    fn edge_weight_total(&self) -> f64;

    fn for_each_edge<F: FnMut(u32, f64)>(&self, u: u32, f: F);

    fn for_each_edge_key<F: FnMut(u32)>(&self, u: u32, f: F);
}

/// Input graph in compressed sparse row form, built once from a parsed
/// network and immutable afterwards.
#[derive(Debug, Clone)]
pub struct ArrayGraph {
    offsets: Vec<u32>,
    edge_keys: Vec<u32>,
    edge_values: Vec<f64>,
    present: Vec<bool>,
    order: usize,
    total_weight: f64,
}

impl ArrayGraph {
    /// Build from undirected links and explicitly declared vertices.
    ///
    /// Links are symmetrized; a self-link is stored once. Ids absent from
    /// both lists become holes in the span. Non-positive weights are
    /// dropped here so the positive-weight precondition holds downstream.
    pub fn from_links(vertices: &[u32], links: &[(u32, u32, f64)]) -> Self {
        let mut span = 0usize;
        for &v in vertices {
            span = span.max(v as usize + 1);
        }
        for &(s, t, _) in links {
            span = span.max(s as usize + 1).max(t as usize + 1);
        }

        let mut present = vec![false; span];
        for &v in vertices {
            present[v as usize] = true;
        }

        let mut counts = vec![0u32; span];
        let mut total_weight = 0.0;
        for &(s, t, w) in links {
            if w <= 0.0 {
                continue;
            }
            present[s as usize] = true;
            present[t as usize] = true;
            counts[s as usize] += 1;
            total_weight += w;
            if s != t {
                counts[t as usize] += 1;
                total_weight += w;
            }
        }

        let mut offsets = vec![0u32; span + 1];
        for u in 0..span {
            offsets[u + 1] = offsets[u] + counts[u];
        }

        let m = offsets[span] as usize;
        let mut fill = vec![0u32; span];
        let mut edge_keys = vec![0u32; m];
        let mut edge_values = vec![0.0f64; m];
        for &(s, t, w) in links {
            if w <= 0.0 {
                continue;
            }
            let ps = (offsets[s as usize] + fill[s as usize]) as usize;
            edge_keys[ps] = t;
            edge_values[ps] = w;
            fill[s as usize] += 1;
            if s != t {
                let pt = (offsets[t as usize] + fill[t as usize]) as usize;
                edge_keys[pt] = s;
                edge_values[pt] = w;
                fill[t as usize] += 1;
            }
        }

        let order = present.iter().filter(|&&p| p).count();

        Self {
            offsets,
            edge_keys,
            edge_values,
            present,
            order,
            total_weight,
        }
    }

    pub fn from_parsed(parsed: &ParsedNetwork) -> Result<Self, String> {
        let vertices: Vec<u32> = parsed.vertices.iter().copied().collect();
        let links: Vec<(u32, u32, f64)> = parsed
            .links
            .iter()
            .map(|(&(s, t), &w)| (s, t, w))
            .collect();
        if vertices.is_empty() && links.is_empty() {
            return Err("Network is empty".to_string());
        }
        Ok(Self::from_links(&vertices, &links))
    }

    #[inline]
    fn edge_range(&self, u: u32) -> std::ops::Range<usize> {
        self.offsets[u as usize] as usize..self.offsets[u as usize + 1] as usize
    }
}

impl Graph for ArrayGraph {
    #[inline]
    fn span(&self) -> usize {
        self.present.len()
    }

    #[inline]
    fn order(&self) -> usize {
        self.order
    }

    #[inline]
    fn size(&self) -> usize {
        self.edge_keys.len()
    }

    #[inline]
    fn has_vertex(&self, u: u32) -> bool {
        self.present[u as usize]
    }

    #[inline]
    fn degree(&self, u: u32) -> usize {
        (self.offsets[u as usize + 1] - self.offsets[u as usize]) as usize
    }

    #[inline]
    fn edge_weight_total(&self) -> f64 {
        self.total_weight
    }

    #[inline]
    fn for_each_edge<F: FnMut(u32, f64)>(&self, u: u32, mut f: F) {
        for e in self.edge_range(u) {
            f(self.edge_keys[e], self.edge_values[e]);
        }
    }

    #[inline]
    fn for_each_edge_key<F: FnMut(u32)>(&self, u: u32, mut f: F) {
        for e in self.edge_range(u) {
            f(self.edge_keys[e]);
        }
    }
}
