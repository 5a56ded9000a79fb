use minimod::csr::DiCsr;
use minimod::graph::{ArrayGraph, Graph};
use minimod::louvain::{
    aggregate, choose_community, community_exists, community_vertices, community_weights, detect,
    initialize, initialize_from, local_move, renumber_communities, vertex_weights, LouvainOptions,
    ScanBuffer,
};
use minimod::modularity::modularity;

fn unit_links(edges: &[(u32, u32)]) -> Vec<(u32, u32, f64)> {
    edges.iter().map(|&(s, t)| (s, t, 1.0)).collect()
}

fn barbell() -> ArrayGraph {
    let mut edges = Vec::new();
    for clique in [[0u32, 1, 2, 3], [4, 5, 6, 7]] {
        for i in 0..4 {
            for j in (i + 1)..4 {
                edges.push((clique[i], clique[j]));
            }
        }
    }
    edges.push((3, 4));
    ArrayGraph::from_links(&[], &unit_links(&edges))
}

/// Runs one local-moving phase from the singleton partition and returns
/// the state it ends in.
fn moved_state(g: &ArrayGraph) -> (Vec<u32>, Vec<f64>, Vec<f64>, usize) {
    let s = g.span();
    let m = g.edge_weight_total() / 2.0;
    let mut vtot = vec![0.0; s];
    let mut vcom = vec![0u32; s];
    let mut ctot = vec![0.0; s];
    let mut vaff = vec![1u8; s];
    let mut buf = ScanBuffer::new(s);

    vertex_weights(&mut vtot, g);
    initialize(&mut vcom, &mut ctot, g, &vtot);
    let iterations = local_move(
        g,
        &mut vcom,
        &mut ctot,
        &mut vaff,
        &mut buf,
        &vtot,
        m,
        1.0,
        20,
        |el, _| el <= 1e-2,
    );
    (vcom, ctot, vtot, iterations)
}

#[test]
fn scan_buffer_keeps_insertion_order_and_clears_clean() {
    let mut buf = ScanBuffer::new(8);
    buf.touch(3, 1.0);
    buf.touch(5, 2.0);
    buf.touch(3, 0.5);

    let seen: Vec<(u32, f64)> = buf.iter().collect();
    assert_eq!(seen, vec![(3, 1.5), (5, 2.0)]);

    buf.clear();
    assert!(buf.touched().is_empty());
    assert_eq!(buf.weight(3), 0.0);
    assert_eq!(buf.weight(5), 0.0);
}

#[test]
fn choose_community_prefers_first_seen_on_ties() {
    let mut buf = ScanBuffer::new(8);
    buf.touch(2, 1.0);
    buf.touch(4, 1.0);

    let ctot = [1.0f64; 8];
    let pick = choose_community(&buf, 0, 1.0, |c| ctot[c as usize], 10.0, 1.0);
    let (c, e) = pick.expect("positive gain expected");
    assert_eq!(c, 2);
    assert!(e > 0.0);
}

#[test]
fn choose_community_declines_nonpositive_gain() {
    // A vertex whose only neighbor community equals its own never moves.
    let mut buf = ScanBuffer::new(4);
    buf.touch(1, 1.0);
    let ctot = [2.0f64; 4];
    assert!(choose_community(&buf, 1, 2.0, |c| ctot[c as usize], 1.0, 1.0).is_none());
}

#[test]
fn community_totals_are_conserved_and_consistent() {
    let g = barbell();
    let (vcom, ctot, vtot, iterations) = moved_state(&g);
    assert!(iterations >= 1);

    let two_m = g.edge_weight_total();
    let vtot_sum: f64 = vtot.iter().sum();
    let ctot_sum: f64 = ctot.iter().sum();
    assert!((vtot_sum - two_m).abs() < 1e-9);
    assert!((ctot_sum - two_m).abs() < 1e-9);

    let mut expected = vec![0.0f64; g.span()];
    for u in 0..g.span() {
        expected[vcom[u] as usize] += vtot[u];
    }
    for c in 0..g.span() {
        assert!(
            (ctot[c] - expected[c]).abs() < 1e-9,
            "community {} total {} != {}",
            c,
            ctot[c],
            expected[c]
        );
    }
}

#[test]
fn local_move_improves_on_singleton_partition() {
    let g = barbell();
    let singleton: Vec<u32> = (0..g.span() as u32).collect();
    let (vcom, _, _, _) = moved_state(&g);
    assert!(modularity(&g, &vcom, 1.0) >= modularity(&g, &singleton, 1.0));
}

#[test]
fn converged_local_move_is_a_no_op() {
    // Two disjoint edges, seeded with each pair already merged.
    let g = ArrayGraph::from_links(&[], &unit_links(&[(0, 1), (2, 3)]));
    let s = g.span();
    let m = g.edge_weight_total() / 2.0;
    let q = vec![0u32, 0, 2, 2];
    let mut vtot = vec![0.0; s];
    let mut vcom = vec![0u32; s];
    let mut ctot = vec![0.0; s];
    let mut vaff = vec![1u8; s];
    let mut buf = ScanBuffer::new(s);

    vertex_weights(&mut vtot, &g);
    initialize_from(&mut vcom, &mut ctot, &g, &vtot, &q);
    let iterations = local_move(
        &g,
        &mut vcom,
        &mut ctot,
        &mut vaff,
        &mut buf,
        &vtot,
        m,
        1.0,
        20,
        |el, _| el <= 1e-2,
    );
    assert_eq!(iterations, 0);
    assert_eq!(vcom, q);
}

#[test]
fn renumbering_yields_dense_ids() {
    let g = barbell();
    let (mut vcom, _, _, _) = moved_state(&g);

    let mut marks = vec![0u32; g.span()];
    let before = community_exists(&mut marks, &g, &vcom);
    let after = renumber_communities(&mut vcom, &mut marks);
    assert_eq!(before, after);

    let mut seen: Vec<u32> = vcom.clone();
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), after);
    assert!(vcom.iter().all(|&c| (c as usize) < after));
}

#[test]
fn community_vertices_lists_every_vertex_once() {
    let g = barbell();
    let (mut vcom, _, _, _) = moved_state(&g);
    let mut marks = vec![0u32; g.span()];
    community_exists(&mut marks, &g, &vcom);
    let c_count = renumber_communities(&mut vcom, &mut marks);

    let mut cv = DiCsr::new(g.span(), g.span());
    cv.respan(c_count);
    community_vertices(&mut cv, &g, &vcom);

    let total: u32 = cv.degrees[..c_count].iter().sum();
    assert_eq!(total as usize, g.order());

    let mut listed = vec![false; g.span()];
    for c in 0..c_count as u32 {
        cv.for_each_edge_key(c, |u| {
            assert_eq!(vcom[u as usize], c);
            assert!(!listed[u as usize], "vertex {} listed twice", u);
            listed[u as usize] = true;
        });
    }
    assert!(listed.iter().all(|&l| l));
}

#[test]
fn aggregation_preserves_modularity() {
    let g = barbell();
    let (mut vcom, _, _, _) = moved_state(&g);
    let mut marks = vec![0u32; g.span()];
    community_exists(&mut marks, &g, &vcom);
    let c_count = renumber_communities(&mut vcom, &mut marks);

    let mut cv = DiCsr::new(g.span(), g.span());
    cv.respan(c_count);
    community_vertices(&mut cv, &g, &vcom);

    let mut z = DiCsr::new(c_count, g.size());
    let mut buf = ScanBuffer::new(g.span());
    aggregate(&mut z, &mut buf, &g, &vcom, &cv);

    assert!((z.edge_weight_total() - g.edge_weight_total()).abs() < 1e-9);

    let identity: Vec<u32> = (0..c_count as u32).collect();
    let q_coarse = modularity(&z, &identity, 1.0);
    let q_fine = modularity(&g, &vcom, 1.0);
    assert!(
        (q_coarse - q_fine).abs() < 1e-9,
        "coarse modularity {} != fine {}",
        q_coarse,
        q_fine
    );
}

#[test]
fn community_weights_match_membership_sums() {
    let g = barbell();
    let s = g.span();
    let mut vtot = vec![0.0; s];
    vertex_weights(&mut vtot, &g);

    let q: Vec<u32> = vec![0, 0, 0, 0, 4, 4, 4, 4];
    let mut ctot = vec![0.0; s];
    community_weights(&mut ctot, &g, &q, &vtot);
    let expected_0: f64 = vtot[..4].iter().sum();
    let expected_4: f64 = vtot[4..].iter().sum();
    assert!((ctot[0] - expected_0).abs() < 1e-12);
    assert!((ctot[4] - expected_4).abs() < 1e-12);
}

#[test]
fn equal_membership_exactly_on_connected_groups() {
    // Three disjoint triangles; the composed membership must separate them.
    let mut edges = Vec::new();
    for base in [0u32, 3, 6] {
        edges.push((base, base + 1));
        edges.push((base + 1, base + 2));
        edges.push((base, base + 2));
    }
    let g = ArrayGraph::from_links(&[], &unit_links(&edges));
    let o = LouvainOptions {
        threads: Some(1),
        ..LouvainOptions::default()
    };
    let result = detect(&g, None, &o);
    let a = &result.membership;
    for base in [0usize, 3, 6] {
        assert_eq!(a[base], a[base + 1]);
        assert_eq!(a[base], a[base + 2]);
    }
    assert_ne!(a[0], a[3]);
    assert_ne!(a[0], a[6]);
    assert_ne!(a[3], a[6]);
}

#[test]
fn serial_runs_are_bitwise_deterministic() {
    let g = barbell();
    let o = LouvainOptions {
        threads: Some(1),
        ..LouvainOptions::default()
    };
    let first = detect(&g, None, &o);
    let second = detect(&g, None, &o);
    assert_eq!(first.membership, second.membership);
    assert_eq!(first.iterations, second.iterations);
    assert_eq!(first.passes, second.passes);
}

#[test]
fn seeding_with_a_prior_result_does_not_regress() {
    let g = barbell();
    let o = LouvainOptions {
        threads: Some(1),
        ..LouvainOptions::default()
    };
    let first = detect(&g, None, &o);
    let second = detect(&g, Some(&first.membership), &o);
    let q1 = modularity(&g, &first.membership, 1.0);
    let q2 = modularity(&g, &second.membership, 1.0);
    assert!(q2 >= q1 - 1e-12, "seeded rerun lost quality: {} < {}", q2, q1);
}
