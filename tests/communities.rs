use minimod::graph::ArrayGraph;
use minimod::louvain::{detect, LouvainOptions};
use minimod::modularity::modularity;

fn serial() -> LouvainOptions {
    LouvainOptions {
        threads: Some(1),
        ..LouvainOptions::default()
    }
}

fn parallel(threads: usize) -> LouvainOptions {
    LouvainOptions {
        threads: Some(threads),
        ..LouvainOptions::default()
    }
}

fn unit_links(edges: &[(u32, u32)]) -> Vec<(u32, u32, f64)> {
    edges.iter().map(|&(s, t)| (s, t, 1.0)).collect()
}

/// Assert that `membership` groups vertices exactly as `groups` does:
/// same id within a group, different ids across groups.
fn assert_groups(membership: &[u32], groups: &[&[u32]]) {
    for group in groups {
        let c = membership[group[0] as usize];
        for &u in group.iter() {
            assert_eq!(
                membership[u as usize], c,
                "vertex {} split from its group in {:?}",
                u, membership
            );
        }
    }
    for (i, ga) in groups.iter().enumerate() {
        for gb in groups.iter().skip(i + 1) {
            assert_ne!(
                membership[ga[0] as usize], membership[gb[0] as usize],
                "groups merged in {:?}",
                membership
            );
        }
    }
}

#[test]
fn empty_graph_yields_empty_result() {
    let g = ArrayGraph::from_links(&[], &[]);
    let result = detect(&g, None, &serial());
    assert!(result.membership.is_empty());
    assert_eq!(result.iterations, 0);
    assert_eq!(result.passes, 0);
}

#[test]
fn isolated_vertices_stay_singletons() {
    let g = ArrayGraph::from_links(&[0, 1, 2, 3, 4], &[]);
    let result = detect(&g, None, &serial());
    assert_eq!(result.membership, vec![0, 1, 2, 3, 4]);
    assert_eq!(result.passes, 0);
    assert_eq!(result.iterations, 0);
}

#[test]
fn triangle_collapses_to_one_community() {
    let g = ArrayGraph::from_links(&[], &unit_links(&[(0, 1), (1, 2), (0, 2)]));
    let result = detect(&g, None, &serial());
    assert_groups(&result.membership, &[&[0, 1, 2]]);
    let q = modularity(&g, &result.membership, 1.0);
    assert!(q.abs() < 1e-12, "expected zero modularity, got {}", q);
}

#[test]
fn bridged_triangles_split_in_two() {
    let edges = [(0, 1), (1, 2), (0, 2), (3, 4), (4, 5), (3, 5), (2, 3)];
    let g = ArrayGraph::from_links(&[], &unit_links(&edges));
    let result = detect(&g, None, &serial());
    assert_groups(&result.membership, &[&[0, 1, 2], &[3, 4, 5]]);
}

#[test]
fn barbell_splits_per_clique() {
    let mut edges = Vec::new();
    for clique in [[0u32, 1, 2, 3], [4, 5, 6, 7]] {
        for i in 0..4 {
            for j in (i + 1)..4 {
                edges.push((clique[i], clique[j]));
            }
        }
    }
    edges.push((3, 4));
    let g = ArrayGraph::from_links(&[], &unit_links(&edges));
    let result = detect(&g, None, &serial());
    assert_groups(&result.membership, &[&[0, 1, 2, 3], &[4, 5, 6, 7]]);
}

#[test]
fn star_joins_center_within_iteration_cap() {
    let edges: Vec<(u32, u32)> = (1..=6).map(|leaf| (0, leaf)).collect();
    let g = ArrayGraph::from_links(&[], &unit_links(&edges));
    let o = serial();
    let result = detect(&g, None, &o);
    assert_groups(&result.membership, &[&[0, 1, 2, 3, 4, 5, 6]]);
    assert!(result.iterations <= o.max_iterations * result.passes.max(1));
}

#[test]
fn vertex_id_holes_are_preserved() {
    // Ids 3 and 4 are absent from the span.
    let g = ArrayGraph::from_links(&[], &unit_links(&[(0, 1), (1, 2), (0, 2), (5, 6)]));
    let result = detect(&g, None, &serial());
    assert_eq!(result.membership.len(), 7);
    assert_groups(&result.membership, &[&[0, 1, 2], &[5, 6]]);
}

#[test]
fn parallel_mode_matches_serial_modularity() {
    let cases: Vec<Vec<(u32, u32)>> = vec![
        vec![],
        vec![(0, 1), (1, 2), (0, 2)],
        vec![(0, 1), (1, 2), (0, 2), (3, 4), (4, 5), (3, 5), (2, 3)],
        (1..=6).map(|leaf| (0, leaf)).collect(),
    ];
    for edges in cases {
        let g = ArrayGraph::from_links(&[0], &unit_links(&edges));
        let serial_result = detect(&g, None, &serial());
        let parallel_result = detect(&g, None, &parallel(4));
        let qs = modularity(&g, &serial_result.membership, 1.0);
        let qp = modularity(&g, &parallel_result.membership, 1.0);
        assert!(
            (qs - qp).abs() < 1e-6,
            "serial modularity {} vs parallel {} on {} edges",
            qs,
            qp,
            edges.len()
        );
    }
}

#[test]
fn repeat_reports_consistent_partition() {
    let edges = [(0, 1), (1, 2), (0, 2), (3, 4), (4, 5), (3, 5), (2, 3)];
    let g = ArrayGraph::from_links(&[], &unit_links(&edges));
    let o = LouvainOptions {
        repeat: 3,
        threads: Some(1),
        ..LouvainOptions::default()
    };
    let result = detect(&g, None, &o);
    assert_groups(&result.membership, &[&[0, 1, 2], &[3, 4, 5]]);
}
