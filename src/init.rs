use rand::Rng;
use rand_distr::{Bernoulli, Distribution, Normal, Uniform};

use crate::config::Config;
use crate::error::{NetError, Result};

/// Weight and bias initializers, selected by the `init` option of a record.
/// Parameters come from sibling `init_*` keys so the record stays flat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Init {
    Zero,
    Constant { value: f64 },
    Uniform { low: f64, high: f64 },
    Gaussian { mean: f64, std: f64 },
    Bernoulli { p: f64 },
}

impl Init {
    /// Reads the initializer out of a record. No `init` key means zeros.
    pub fn from_config(cfg: &Config) -> Result<Init> {
        let name = match cfg.get("init") {
            None => return Ok(Init::Zero),
            Some(_) => cfg.require::<String>("init")?,
        };
        match name.as_str() {
            "zero" => Ok(Init::Zero),
            "constant" => Ok(Init::Constant {
                value: cfg.optional("init_value", 0.0)?,
            }),
            "uniform" => Ok(Init::Uniform {
                low: cfg.optional("init_low", -0.1)?,
                high: cfg.optional("init_high", 0.1)?,
            }),
            "gaussian" => Ok(Init::Gaussian {
                mean: cfg.optional("init_mean", 0.0)?,
                std: cfg.optional("init_std", 0.01)?,
            }),
            "bernoulli" => Ok(Init::Bernoulli {
                p: cfg.optional("init_p", 0.5)?,
            }),
            _ => Err(NetError::UnknownType {
                what: "initializer",
                ty: name,
            }),
        }
    }

    /// Fills a live buffer; the caller packs or loads from it afterwards.
    pub fn fill(self, out: &mut [f64]) -> Result<()> {
        let mut rng = rand::thread_rng();
        match self {
            Init::Zero => out.fill(0.0),
            Init::Constant { value } => out.fill(value),
            Init::Uniform { low, high } => {
                if low > high {
                    return Err(NetError::BadInit(format!(
                        "uniform bounds out of order: {low} > {high}"
                    )));
                }
                let d = Uniform::new_inclusive(low, high);
                out.iter_mut().for_each(|v| *v = rng.sample(d));
            }
            Init::Gaussian { mean, std } => {
                let d = Normal::new(mean, std)
                    .map_err(|e| NetError::BadInit(format!("gaussian: {e}")))?;
                out.iter_mut().for_each(|v| *v = d.sample(&mut rng));
            }
            Init::Bernoulli { p } => {
                let d = Bernoulli::new(p)
                    .map_err(|e| NetError::BadInit(format!("bernoulli: {e}")))?;
                out.iter_mut()
                    .for_each(|v| *v = if d.sample(&mut rng) { 1.0 } else { 0.0 });
            }
        }
        Ok(())
    }

    pub fn sample(self, n: usize) -> Result<Vec<f64>> {
        let mut vals = vec![0.0; n];
        self.fill(&mut vals)?;
        Ok(vals)
    }
}
