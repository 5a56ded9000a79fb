use crate::graph::Graph;

/// Change in modularity when vertex `u` moves from community `d` to `c`.
///
/// `e_uc` / `e_ud` are the edge weights from `u` into `c` and into `d`
/// (self-edges excluded), `vtot_u` the total weight of `u`, `ctot_c` /
/// `ctot_d` the community totals, `m` half the directed edge weight, and
/// `r` the resolution.
#[inline]
pub fn delta_modularity(
    e_uc: f64,
    e_ud: f64,
    vtot_u: f64,
    ctot_c: f64,
    ctot_d: f64,
    m: f64,
    r: f64,
) -> f64 {
    (e_uc - e_ud) / m - r * vtot_u * (ctot_c - ctot_d + vtot_u) / (2.0 * m * m)
}

/// Modularity of a partition, measured on the symmetric directed form.
///
/// `Q = W_in / 2M − R · Σ_c (deg_c / 2M)²` with `W_in` the directed weight
/// inside communities and `deg_c` the summed vertex weights of community
/// `c`. Returns 0 for a graph with no edge weight.
pub fn modularity<G: Graph>(g: &G, membership: &[u32], resolution: f64) -> f64 {
    let m2 = g.edge_weight_total();
    if m2 <= 0.0 {
        return 0.0;
    }

    let mut internal = 0.0;
    let mut community_degree = vec![0.0f64; g.span()];
    for u in 0..g.span() as u32 {
        if !g.has_vertex(u) {
            continue;
        }
        let c = membership[u as usize];
        g.for_each_edge(u, |v, w| {
            community_degree[c as usize] += w;
            if membership[v as usize] == c {
                internal += w;
            }
        });
    }

    let mut expected = 0.0;
    for &d in &community_degree {
        expected += (d / m2) * (d / m2);
    }
    internal / m2 - resolution * expected
}
