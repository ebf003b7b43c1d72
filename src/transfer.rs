use crate::config::Config;
use crate::cube::Cube;
use crate::error::{NetError, Result};

/// Elementwise transfer functions for transfer node groups.
///
/// The backward form is written in terms of the *saved post-activation*
/// value, so a node only has to keep its output around to differentiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFn {
    Linear,
    Tanh,
    RectifyLinear,
    Logistics,
}

impl TransferFn {
    /// Reads the `function` key of a record; absent means tanh.
    pub fn from_config(cfg: &Config) -> Result<TransferFn> {
        let name = cfg.optional::<String>("function", "tanh".to_string())?;
        match name.as_str() {
            "linear" => Ok(TransferFn::Linear),
            "tanh" => Ok(TransferFn::Tanh),
            "rectify_linear" => Ok(TransferFn::RectifyLinear),
            "logistics" => Ok(TransferFn::Logistics),
            _ => Err(NetError::UnknownType {
                what: "transfer function",
                ty: name,
            }),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TransferFn::Linear => "linear",
            TransferFn::Tanh => "tanh",
            TransferFn::RectifyLinear => "rectify_linear",
            TransferFn::Logistics => "logistics",
        }
    }

    /// In-place `f(x + bias)`.
    pub fn apply(self, x: &mut Cube, bias: f64) {
        match self {
            TransferFn::Linear => x.mapv_inplace(|v| v + bias),
            TransferFn::Tanh => x.mapv_inplace(|v| (v + bias).tanh()),
            TransferFn::RectifyLinear => x.mapv_inplace(|v| (v + bias).max(0.0)),
            TransferFn::Logistics => x.mapv_inplace(|v| 1.0 / (1.0 + (-(v + bias)).exp())),
        }
    }

    /// In-place `g * f'`, with `f'` evaluated from the post-activation `f`.
    pub fn grad(self, g: &mut Cube, f: &Cube) {
        assert_eq!(g.dim(), f.dim(), "gradient and activation extents differ");
        match self {
            TransferFn::Linear => {}
            TransferFn::Tanh => g.zip_mut_with(f, |g, f| *g *= 1.0 - f * f),
            TransferFn::RectifyLinear => {
                g.zip_mut_with(f, |g, f| *g *= if *f > 0.0 { 1.0 } else { 0.0 })
            }
            TransferFn::Logistics => g.zip_mut_with(f, |g, f| *g *= f * (1.0 - f)),
        }
    }
}
