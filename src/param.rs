use crate::cube::{Cube, Vec3};

/// A convolution filter: weight tensor plus persistent momentum state.
///
/// Update rule, given a weight gradient `dw`:
/// `v := momentum*v - eta*dw; w := (1 - eta*weight_decay)*w + v`.
#[derive(Debug, Clone)]
pub struct Filter {
    w: Cube,
    v: Cube,
    eta: f64,
    momentum: f64,
    weight_decay: f64,
}

impl Filter {
    pub fn new(size: Vec3, eta: f64, momentum: f64, weight_decay: f64) -> Filter {
        Filter {
            w: Cube::zeros(size.dim()),
            v: Cube::zeros(size.dim()),
            eta,
            momentum,
            weight_decay,
        }
    }

    pub fn w(&self) -> &Cube {
        &self.w
    }

    pub fn set_w(&mut self, w: Cube) {
        assert_eq!(w.dim(), self.v.dim(), "weight extents differ from filter size");
        self.w = w;
    }

    pub fn update(&mut self, dw: &Cube) {
        assert_eq!(dw.dim(), self.w.dim(), "gradient extents differ from filter size");
        let (eta, mom, wd) = (self.eta, self.momentum, self.weight_decay);
        self.v.zip_mut_with(dw, |v, d| *v = mom * *v - eta * d);
        self.w *= 1.0 - eta * wd;
        self.w += &self.v;
    }

    pub fn set_eta(&mut self, eta: f64) {
        self.eta = eta;
    }

    pub fn set_momentum(&mut self, momentum: f64) {
        self.momentum = momentum;
    }

    pub fn set_weight_decay(&mut self, weight_decay: f64) {
        self.weight_decay = weight_decay;
    }
}

/// Scalar analogue of [`Filter`], owned per index by transfer node groups.
#[derive(Debug, Clone)]
pub struct Bias {
    b: f64,
    v: f64,
    eta: f64,
    momentum: f64,
    weight_decay: f64,
}

impl Bias {
    pub fn new(eta: f64, momentum: f64, weight_decay: f64) -> Bias {
        Bias {
            b: 0.0,
            v: 0.0,
            eta,
            momentum,
            weight_decay,
        }
    }

    pub fn b(&self) -> f64 {
        self.b
    }

    pub fn set_b(&mut self, b: f64) {
        self.b = b;
    }

    pub fn update(&mut self, db: f64) {
        self.v = self.momentum * self.v - self.eta * db;
        self.b = (1.0 - self.eta * self.weight_decay) * self.b + self.v;
    }

    pub fn set_eta(&mut self, eta: f64) {
        self.eta = eta;
    }

    pub fn set_momentum(&mut self, momentum: f64) {
        self.momentum = momentum;
    }

    pub fn set_weight_decay(&mut self, weight_decay: f64) {
        self.weight_decay = weight_decay;
    }
}
