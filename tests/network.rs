use std::collections::HashMap;

use ndarray::Array3;

use voxnet::config;
use voxnet::cube::{linear_index, pack_f64, unpack_f64, Cube, Vec3};
use voxnet::kernels::{pool_backward, pool_forward};
use voxnet::{Config, Network};

fn volumes(entries: &[(&str, Vec<Cube>)]) -> HashMap<String, Vec<Cube>> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn iota(dim: (usize, usize, usize), scale: f64, offset: f64) -> Cube {
    let n = dim.0 * dim.1 * dim.2;
    Array3::from_shape_vec(dim, (0..n).map(|i| i as f64 * scale + offset).collect()).unwrap()
}

#[test]
fn identity_chain_forwards_verbatim() {
    let nodes = vec![
        config!(("name", "in"), ("type", "input"), ("size", 1)),
        config!(("name", "mid"), ("type", "sum"), ("size", 1)),
        config!(
            ("name", "out"),
            ("type", "transfer"),
            ("size", 1),
            ("function", "linear"),
            ("eta", 0.0),
        ),
    ];
    let edges = vec![
        config!(("name", "a"), ("type", "dummy"), ("input", "in"), ("output", "mid")),
        config!(("name", "b"), ("type", "dummy"), ("input", "mid"), ("output", "out")),
    ];
    let mut net = Network::new(&nodes, &edges, Vec3::splat(2)).unwrap();
    assert_eq!(net.fov(), Vec3::ONE);

    let x = iota((2, 2, 2), 0.5, -1.0);
    let out = net.forward(volumes(&[("in", vec![x.clone()])])).unwrap();
    assert_eq!(out["out"], vec![x.clone()]);

    let back = net
        .backward(volumes(&[("out", vec![iota((2, 2, 2), 1.0, -3.5)])]))
        .unwrap();
    assert_eq!(back.len(), 1);
    assert!(back["in"].is_empty());

    // zero learning rate leaves the bias untouched
    let (node_cfgs, _) = net.serialize();
    let out_cfg = node_cfgs.iter().find(|c| {
        c.require::<String>("name").unwrap() == "out"
    });
    let bytes: Vec<u8> = out_cfg.unwrap().require("biases").unwrap();
    assert_eq!(unpack_f64(&bytes), vec![0.0]);
}

#[test]
fn single_conv_forward_and_update() {
    let nodes = vec![
        config!(("name", "in"), ("type", "input"), ("size", 1)),
        config!(
            ("name", "out"),
            ("type", "transfer"),
            ("size", 1),
            ("function", "linear"),
        ),
    ];
    let edges = vec![config!(
        ("name", "c1"),
        ("type", "conv"),
        ("input", "in"),
        ("output", "out"),
        ("size", Vec3::splat(3)),
        ("eta", 0.1),
        ("init", "constant"),
        ("init_value", 1.0),
    )];
    let mut net = Network::new(&nodes, &edges, Vec3::ONE).unwrap();
    assert_eq!(net.geometry("in").unwrap().fsize, Vec3::splat(3));

    let x = Array3::from_elem((3, 3, 3), 1.0);
    let out = net.forward(volumes(&[("in", vec![x])])).unwrap();
    assert_eq!(out["out"][0][[0, 0, 0]], 27.0);

    net.backward(volumes(&[("out", vec![Array3::from_elem((1, 1, 1), 1.0)])]))
        .unwrap();

    // dW equals the all-ones input, so every weight steps to 1 - 0.1*1
    let (_, edge_cfgs) = net.serialize();
    let bytes: Vec<u8> = edge_cfgs[0].require("filters").unwrap();
    let weights = unpack_f64(&bytes);
    assert_eq!(weights.len(), 27);
    assert!(weights.iter().all(|w| (w - 0.9).abs() < 1e-12));
}

#[test]
fn fan_in_sums_contributions() {
    let nodes = vec![
        config!(("name", "in1"), ("type", "input"), ("size", 1)),
        config!(("name", "in2"), ("type", "input"), ("size", 1)),
        config!(("name", "out"), ("type", "sum"), ("size", 1)),
    ];
    let edges = vec![
        config!(("name", "a"), ("type", "dummy"), ("input", "in1"), ("output", "out")),
        config!(("name", "b"), ("type", "dummy"), ("input", "in2"), ("output", "out")),
    ];
    let mut net = Network::new(&nodes, &edges, Vec3::ONE).unwrap();

    let a = Array3::from_elem((1, 1, 1), 2.5);
    let b = Array3::from_elem((1, 1, 1), -1.0);
    let out = net
        .forward(volumes(&[("in1", vec![a]), ("in2", vec![b])]))
        .unwrap();
    assert_eq!(out["out"][0][[0, 0, 0]], 1.5);
}

#[test]
fn max_pool_forwards_the_winner_and_routes_its_gradient() {
    let nodes = vec![
        config!(("name", "in"), ("type", "input"), ("size", 1)),
        config!(("name", "out"), ("type", "sum"), ("size", 1)),
    ];
    let edges = vec![config!(
        ("name", "p"),
        ("type", "max_filter"),
        ("input", "in"),
        ("output", "out"),
        ("size", Vec3::splat(2)),
        ("stride", Vec3::ONE),
    )];
    let mut net = Network::new(&nodes, &edges, Vec3::ONE).unwrap();

    let mut x = Array3::from_elem((2, 2, 2), 0.0);
    x[[1, 0, 1]] = 4.0;
    let out = net.forward(volumes(&[("in", vec![x.clone()])])).unwrap();
    assert_eq!(out["out"][0][[0, 0, 0]], 4.0);
    net.backward(volumes(&[("out", vec![Array3::from_elem((1, 1, 1), 1.0)])]))
        .unwrap();

    // the same pooling pair the edge ran: the argmax is the unique maximum
    // and the whole gradient lands on it
    let (y, idx) = pool_forward(&x, Vec3::splat(2), Vec3::ONE);
    assert_eq!(y[[0, 0, 0]], 4.0);
    assert_eq!(
        idx[[0, 0, 0]],
        linear_index(Vec3::splat(2), Vec3::new(1, 0, 1))
    );
    let back = pool_backward(Vec3::splat(2), &Array3::from_elem((1, 1, 1), 1.0), &idx);
    assert_eq!(back[[1, 0, 1]], 1.0);
    assert_eq!(back.sum(), 1.0);
}

#[test]
fn strided_conv_geometry() {
    let nodes = vec![
        config!(("name", "in"), ("type", "input"), ("size", 1)),
        config!(
            ("name", "out"),
            ("type", "transfer"),
            ("size", 1),
            ("function", "linear"),
        ),
    ];
    let edges = vec![config!(
        ("name", "c"),
        ("type", "conv"),
        ("input", "in"),
        ("output", "out"),
        ("size", Vec3::splat(2)),
        ("stride", Vec3::splat(2)),
    )];
    let net = Network::new(&nodes, &edges, Vec3::splat(2)).unwrap();

    let g_in = net.geometry("in").unwrap();
    let g_out = net.geometry("out").unwrap();
    assert_eq!(g_in.stride, Vec3::ONE);
    assert_eq!(g_in.fsize, Vec3::splat(3));
    assert_eq!(g_out.stride, Vec3::splat(2));
    assert_eq!(g_out.fsize, Vec3::splat(2));
    // one sink element sees a 2-wide window at unit tap spacing
    assert_eq!(net.fov(), Vec3::splat(2));
    assert_eq!(g_in.fov, (g_out.fov - Vec3::ONE) * Vec3::splat(2) + Vec3::splat(2));
}

#[test]
fn bipartite_conv_mixes_all_pairs() {
    // k = i*m + j: [w00, w01, w02, w10, w11, w12]
    let weights = [2.0, 3.0, 5.0, 7.0, 11.0, 13.0];
    let nodes = vec![
        config!(("name", "in"), ("type", "input"), ("size", 2)),
        config!(
            ("name", "out"),
            ("type", "transfer"),
            ("size", 3),
            ("function", "linear"),
        ),
    ];
    let edges = vec![config!(
        ("name", "c"),
        ("type", "conv"),
        ("input", "in"),
        ("output", "out"),
        ("size", Vec3::ONE),
        ("filters", pack_f64(&weights)),
    )];
    let mut net = Network::new(&nodes, &edges, Vec3::ONE).unwrap();

    let a = 0.5;
    let b = -2.0;
    let out = net
        .forward(volumes(&[(
            "in",
            vec![
                Array3::from_elem((1, 1, 1), a),
                Array3::from_elem((1, 1, 1), b),
            ],
        )]))
        .unwrap();
    let got: Vec<f64> = out["out"].iter().map(|c| c[[0, 0, 0]]).collect();
    assert_eq!(
        got,
        vec![
            weights[0] * a + weights[3] * b,
            weights[1] * a + weights[4] * b,
            weights[2] * a + weights[5] * b,
        ]
    );
}

#[test]
fn arrival_counting_fires_once_per_sweep() {
    // diamond: both dummy paths must deliver before the sum fires
    let nodes = vec![
        config!(("name", "in"), ("type", "input"), ("size", 1)),
        config!(("name", "out"), ("type", "sum"), ("size", 1)),
    ];
    let edges = vec![
        config!(("name", "left"), ("type", "dummy"), ("input", "in"), ("output", "out")),
        config!(("name", "right"), ("type", "dummy"), ("input", "in"), ("output", "out")),
    ];
    let mut net = Network::new(&nodes, &edges, Vec3::splat(2)).unwrap();

    let x = iota((2, 2, 2), 1.0, 1.0);
    for _ in 0..2 {
        // counters reset after the fire, so repeated sweeps agree
        let out = net.forward(volumes(&[("in", vec![x.clone()])])).unwrap();
        assert_eq!(out["out"][0], &x + &x);
        let back = net
            .backward(volumes(&[("out", vec![x.clone()])]))
            .unwrap();
        assert!(back["in"].is_empty());
    }
}

#[test]
fn serialization_round_trips_bitwise() -> anyhow::Result<()> {
    let nodes = vec![
        config!(("name", "in"), ("type", "input"), ("size", 1)),
        config!(("name", "mid"), ("type", "sum"), ("size", 2)),
        config!(
            ("name", "out"),
            ("type", "transfer"),
            ("size", 1),
            ("init", "gaussian"),
            ("init_std", 0.1),
        ),
    ];
    let edges = vec![
        config!(
            ("name", "c1"),
            ("type", "conv"),
            ("input", "in"),
            ("output", "mid"),
            ("size", Vec3::splat(2)),
            ("init", "gaussian"),
        ),
        config!(
            ("name", "c2"),
            ("type", "conv"),
            ("input", "mid"),
            ("output", "out"),
            ("size", Vec3::splat(2)),
            ("init", "gaussian"),
        ),
    ];
    let mut net = Network::new(&nodes, &edges, Vec3::splat(2))?;
    let (node_cfgs, edge_cfgs) = net.serialize();

    let mut twin = Network::new(&node_cfgs, &edge_cfgs, Vec3::splat(2))?;
    assert_eq!(twin.fov(), net.fov());

    let x = iota((4, 4, 4), 0.02, -0.5);
    let a = net.forward(volumes(&[("in", vec![x.clone()])]))?;
    let b = twin.forward(volumes(&[("in", vec![x])]))?;
    assert_eq!(a["out"], b["out"]);

    // a reserialized twin reproduces the records byte for byte
    let (again_nodes, again_edges) = twin.serialize();
    let packed = |cfgs: &[Config], key: &str| -> Vec<Vec<u8>> {
        cfgs.iter()
            .filter_map(|c| c.require::<Vec<u8>>(key).ok())
            .collect()
    };
    assert_eq!(packed(&again_nodes, "biases"), packed(&node_cfgs, "biases"));
    assert_eq!(packed(&again_edges, "filters"), packed(&edge_cfgs, "filters"));
    Ok(())
}

// finite-difference check of dLoss/dW and dLoss/dbias for
// loss = sum(forward(x)), against the gradients a backward sweep applies
#[test]
fn analytic_gradients_match_finite_difference() -> anyhow::Result<()> {
    let filter_values: Vec<f64> = (0..8).map(|k| 0.1 * k as f64 - 0.35).collect();
    let bias_values = vec![0.3];

    let build_cfgs = |filters: &[f64], biases: &[f64]| -> (Vec<Config>, Vec<Config>) {
        let nodes = vec![
            config!(("name", "in"), ("type", "input"), ("size", 1)),
            config!(
                ("name", "out"),
                ("type", "transfer"),
                ("size", 1),
                ("function", "tanh"),
                ("eta", 1.0),
                ("biases", pack_f64(biases)),
            ),
        ];
        let edges = vec![config!(
            ("name", "c"),
            ("type", "conv"),
            ("input", "in"),
            ("output", "out"),
            ("size", Vec3::splat(2)),
            ("eta", 1.0),
            ("filters", pack_f64(filters)),
        )];
        (nodes, edges)
    };

    let x = iota((3, 3, 3), 0.05, -0.6);
    let loss = |filters: &[f64], biases: &[f64]| -> f64 {
        let (nodes, edges) = build_cfgs(filters, biases);
        let mut net = Network::new(&nodes, &edges, Vec3::splat(2)).unwrap();
        let out = net.forward(volumes(&[("in", vec![x.clone()])])).unwrap();
        out["out"][0].sum()
    };

    // one sweep at eta = 1 makes the applied step equal the raw gradient
    let (nodes, edges) = build_cfgs(&filter_values, &bias_values);
    let mut net = Network::new(&nodes, &edges, Vec3::splat(2))?;
    net.forward(volumes(&[("in", vec![x.clone()])]))?;
    net.backward(volumes(&[("out", vec![Array3::from_elem((2, 2, 2), 1.0)])]))?;
    let (node_cfgs, edge_cfgs) = net.serialize();
    let w_after = unpack_f64(&edge_cfgs[0].require::<Vec<u8>>("filters")?);
    let out_cfg = node_cfgs
        .iter()
        .find(|c| c.require::<String>("name").unwrap() == "out")
        .unwrap();
    let b_after = unpack_f64(&out_cfg.require::<Vec<u8>>("biases")?);

    let eps = 1e-6;
    for k in 0..filter_values.len() {
        let analytic = filter_values[k] - w_after[k];
        let mut hi = filter_values.clone();
        let mut lo = filter_values.clone();
        hi[k] += eps;
        lo[k] -= eps;
        let numeric = (loss(&hi, &bias_values) - loss(&lo, &bias_values)) / (2.0 * eps);
        assert!(
            (analytic - numeric).abs() <= 1e-4 * numeric.abs().max(1e-3),
            "weight {k}: analytic {analytic} vs numeric {numeric}"
        );
    }

    let analytic_db = bias_values[0] - b_after[0];
    let numeric_db = (loss(&filter_values, &[bias_values[0] + eps])
        - loss(&filter_values, &[bias_values[0] - eps]))
        / (2.0 * eps);
    assert!(
        (analytic_db - numeric_db).abs() <= 1e-4 * numeric_db.abs().max(1e-3),
        "bias: analytic {analytic_db} vs numeric {numeric_db}"
    );
    Ok(())
}

#[test]
fn malformed_sweeps_are_rejected() {
    let nodes = vec![
        config!(("name", "in"), ("type", "input"), ("size", 1)),
        config!(("name", "out"), ("type", "sum"), ("size", 1)),
    ];
    let edges = vec![config!(
        ("name", "d"),
        ("type", "dummy"),
        ("input", "in"),
        ("output", "out"),
    )];
    let mut net = Network::new(&nodes, &edges, Vec3::splat(2)).unwrap();

    // wrong extents
    assert!(net
        .forward(volumes(&[("in", vec![Array3::zeros((3, 3, 3))])]))
        .is_err());
    // wrong map count
    assert!(net
        .forward(volumes(&[(
            "in",
            vec![Array3::zeros((2, 2, 2)), Array3::zeros((2, 2, 2))],
        )]))
        .is_err());
    // unknown source name
    assert!(net
        .forward(volumes(&[("elsewhere", vec![Array3::zeros((2, 2, 2))])]))
        .is_err());
    // a well-formed sweep still goes through afterwards
    assert!(net
        .forward(volumes(&[("in", vec![Array3::zeros((2, 2, 2))])]))
        .is_ok());
}
