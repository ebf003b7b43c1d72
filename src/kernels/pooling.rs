use ndarray::Array3;

use crate::cube::{delinearize, linear_index, Cube, Vec3};

/// Windowed max with inner tap spacing `stride`, matching the sparse-conv
/// convention: every output position is kept, consecutive windows overlap.
/// Output extents are `size(x) - (window - 1)*stride`.
///
/// Returns the pooled volume and, per output cell, the row-major linear
/// index of the winning element in `x`. Ties go to the smallest index.
pub fn pool_forward(x: &Cube, window: Vec3, stride: Vec3) -> (Cube, Array3<usize>) {
    let xs = Vec3::of(x);
    let span = (window - Vec3::ONE) * stride;
    assert!(span.fits_in(xs), "pool span {span} does not fit input {xs}");

    let os = xs - span;
    let mut y = Cube::zeros(os.dim());
    let mut indices = Array3::<usize>::zeros(os.dim());
    for px in 0..os.x {
        for py in 0..os.y {
            for pz in 0..os.z {
                let mut best = f64::NEG_INFINITY;
                let mut best_at = 0;
                // taps are visited in increasing linear order, so a strict
                // comparison keeps the earliest winner
                for qx in 0..window.x {
                    for qy in 0..window.y {
                        for qz in 0..window.z {
                            let pos = Vec3::new(
                                px + stride.x * qx,
                                py + stride.y * qy,
                                pz + stride.z * qz,
                            );
                            let v = x[pos.dim()];
                            if v > best {
                                best = v;
                                best_at = linear_index(xs, pos);
                            }
                        }
                    }
                }
                y[[px, py, pz]] = best;
                indices[[px, py, pz]] = best_at;
            }
        }
    }
    (y, indices)
}

/// Routes a pooled gradient back through saved argmax indices: allocates an
/// `in_size` volume of zeros and adds `g[p]` at `indices[p]`. Collisions sum.
pub fn pool_backward(in_size: Vec3, g: &Cube, indices: &Array3<usize>) -> Cube {
    assert_eq!(
        g.dim(),
        indices.dim(),
        "gradient and argmax extents differ"
    );
    let mut out = Cube::zeros(in_size.dim());
    for (gv, &idx) in g.iter().zip(indices.iter()) {
        let pos = delinearize(in_size, idx);
        out[pos.dim()] += gv;
    }
    out
}
