use crate::cube::{Cube, Vec3};

/// Strided ("sparse") correlation: `y[p] = sum_q w[q]*x[p + s*q]` for every
/// `p` keeping all taps inside `x`. Output extents are
/// `size(x) - (size(w) - 1)*s`; at `s = (1,1,1)` this is plain correlation,
/// larger strides space the taps without skipping output positions.
pub fn conv_sparse(x: &Cube, w: &Cube, s: Vec3) -> Cube {
    let xs = Vec3::of(x);
    let ws = Vec3::of(w);
    let span = (ws - Vec3::ONE) * s;
    assert!(span.fits_in(xs), "filter span {span} does not fit input {xs}");

    let os = xs - span;
    let mut y = Cube::zeros(os.dim());
    for px in 0..os.x {
        for py in 0..os.y {
            for pz in 0..os.z {
                let mut acc = 0.0;
                for qx in 0..ws.x {
                    for qy in 0..ws.y {
                        for qz in 0..ws.z {
                            acc += w[[qx, qy, qz]]
                                * x[[px + s.x * qx, py + s.y * qy, pz + s.z * qz]];
                        }
                    }
                }
                y[[px, py, pz]] = acc;
            }
        }
    }
    y
}

/// Transpose of [`conv_sparse`] in its input argument: scatters an
/// output-shaped gradient back to input shape, `out[p + s*q] += w[q]*g[p]`.
/// Output extents are `size(g) + (size(w) - 1)*s`.
pub fn conv_sparse_inverse(g: &Cube, w: &Cube, s: Vec3) -> Cube {
    let gs = Vec3::of(g);
    let ws = Vec3::of(w);
    let os = gs + (ws - Vec3::ONE) * s;

    let mut out = Cube::zeros(os.dim());
    for px in 0..gs.x {
        for py in 0..gs.y {
            for pz in 0..gs.z {
                let gv = g[[px, py, pz]];
                for qx in 0..ws.x {
                    for qy in 0..ws.y {
                        for qz in 0..ws.z {
                            out[[px + s.x * qx, py + s.y * qy, pz + s.z * qz]] +=
                                w[[qx, qy, qz]] * gv;
                        }
                    }
                }
            }
        }
    }
    out
}

/// Transpose of [`conv_sparse`] in its filter argument: the weight-gradient
/// kernel, `out[q] = sum_p x[p + s*q]*g[p]` with `out` shaped like the filter
/// that produced `g` from `x`.
pub fn conv_sparse_flipped(x: &Cube, g: &Cube, s: Vec3) -> Cube {
    let xs = Vec3::of(x);
    let gs = Vec3::of(g);
    assert!(
        gs.x <= xs.x && gs.y <= xs.y && gs.z <= xs.z,
        "gradient extents {gs} exceed input {xs}"
    );
    let diff = xs - gs;
    assert!(
        diff.x % s.x == 0 && diff.y % s.y == 0 && diff.z % s.z == 0,
        "extent difference {diff} is not a multiple of stride {s}"
    );
    let ws = diff / s + Vec3::ONE;

    let mut out = Cube::zeros(ws.dim());
    for qx in 0..ws.x {
        for qy in 0..ws.y {
            for qz in 0..ws.z {
                let mut acc = 0.0;
                for px in 0..gs.x {
                    for py in 0..gs.y {
                        for pz in 0..gs.z {
                            acc += x[[px + s.x * qx, py + s.y * qy, pz + s.z * qz]]
                                * g[[px, py, pz]];
                        }
                    }
                }
                out[[qx, qy, qz]] = acc;
            }
        }
    }
    out
}
