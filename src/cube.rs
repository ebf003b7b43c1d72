use std::fmt::{self, Display};
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::error::NetError;

/// A volumetric feature map: a 3-D volume of doubles, row-major.
pub type Cube = Array3<f64>;

/// Elementwise 3-vector of extents, used for every geometry triple in the
/// runtime: field-of-view, stride and feature-map size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0, y: 0, z: 0 };
    pub const ONE: Vec3 = Vec3 { x: 1, y: 1, z: 1 };

    pub fn new(x: usize, y: usize, z: usize) -> Vec3 {
        Vec3 { x, y, z }
    }

    pub fn splat(v: usize) -> Vec3 {
        Vec3 { x: v, y: v, z: v }
    }

    /// Extents of a cube.
    pub fn of(c: &Cube) -> Vec3 {
        let (x, y, z) = c.dim();
        Vec3 { x, y, z }
    }

    pub fn product(self) -> usize {
        self.x * self.y * self.z
    }

    /// Shape tuple for ndarray allocation.
    pub fn dim(self) -> (usize, usize, usize) {
        (self.x, self.y, self.z)
    }

    pub fn all_positive(self) -> bool {
        self.x > 0 && self.y > 0 && self.z > 0
    }

    /// True if every component of `self` is strictly less than `other`'s.
    pub fn fits_in(self, other: Vec3) -> bool {
        self.x < other.x && self.y < other.y && self.z < other.z
    }
}

macro_rules! elementwise {
    ($trait:ident, $method:ident, $op:tt) => {
        impl $trait for Vec3 {
            type Output = Vec3;
            fn $method(self, rhs: Vec3) -> Vec3 {
                Vec3 {
                    x: self.x $op rhs.x,
                    y: self.y $op rhs.y,
                    z: self.z $op rhs.z,
                }
            }
        }
    };
}

elementwise!(Add, add, +);
elementwise!(Sub, sub, -);
elementwise!(Mul, mul, *);
elementwise!(Div, div, /);

impl From<(usize, usize, usize)> for Vec3 {
    fn from((x, y, z): (usize, usize, usize)) -> Vec3 {
        Vec3 { x, y, z }
    }
}

impl From<[usize; 3]> for Vec3 {
    fn from(v: [usize; 3]) -> Vec3 {
        Vec3 { x: v[0], y: v[1], z: v[2] }
    }
}

impl Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

impl FromStr for Vec3 {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Vec3, NetError> {
        let bad = || NetError::BadVec3 { value: s.to_string() };
        let mut it = s.split(',').map(|p| p.trim().parse::<usize>());
        let x = it.next().ok_or_else(bad)?.map_err(|_| bad())?;
        let y = it.next().ok_or_else(bad)?.map_err(|_| bad())?;
        let z = it.next().ok_or_else(bad)?.map_err(|_| bad())?;
        if it.next().is_some() {
            return Err(bad());
        }
        Ok(Vec3 { x, y, z })
    }
}

/// Row-major linear index of `pos` inside a volume of extents `size`.
pub fn linear_index(size: Vec3, pos: Vec3) -> usize {
    debug_assert!(pos.x < size.x && pos.y < size.y && pos.z < size.z);
    (pos.x * size.y + pos.y) * size.z + pos.z
}

/// Inverse of [`linear_index`].
pub fn delinearize(size: Vec3, idx: usize) -> Vec3 {
    debug_assert!(idx < size.product());
    let z = idx % size.z;
    let rest = idx / size.z;
    Vec3 {
        x: rest / size.y,
        y: rest % size.y,
        z,
    }
}

/// Packs doubles as contiguous little-endian bytes, the persisted layout for
/// filters and biases.
pub fn pack_f64(vals: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vals.len() * 8);
    for v in vals {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Inverse of [`pack_f64`]. The caller validates the byte length.
pub fn unpack_f64(bytes: &[u8]) -> Vec<f64> {
    debug_assert!(bytes.len() % 8 == 0);
    bytes
        .chunks_exact(8)
        .map(|c| {
            let mut b = [0u8; 8];
            b.copy_from_slice(c);
            f64::from_le_bytes(b)
        })
        .collect()
}
