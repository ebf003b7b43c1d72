use std::rc::Rc;

use itertools::iproduct;
use ndarray::Array3;

use crate::config::{Config, Opt};
use crate::cube::{pack_f64, unpack_f64, Cube, Vec3};
use crate::error::{NetError, Result};
use crate::graph::nodes::NodeId;
use crate::init::Init;
use crate::kernels::{conv_sparse, conv_sparse_flipped, conv_sparse_inverse, pool_backward, pool_forward};
use crate::param::Filter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeKind {
    Dummy,
    MaxPool,
    Conv,
}

/// Per-pair operator state. The kernel stride of convolution and pooling
/// operators is the stride *inherited* from the producing node group, never
/// the edge's own stride factor.
pub enum EdgeOp {
    Dummy,
    MaxPool {
        window: Vec3,
        stride: Vec3,
        indices: Option<Array3<usize>>,
        insize: Vec3,
    },
    Conv {
        stride: Vec3,
        filter: Filter,
        saved: Option<Rc<Cube>>,
    },
}

impl EdgeOp {
    /// Consumes a producer feature map, emits the consumer-shaped result.
    /// The input handle is shared with the producer's accumulator and is
    /// never mutated here.
    pub(crate) fn forward(&mut self, f: &Rc<Cube>) -> Cube {
        match self {
            // the consumer mutates its accumulator in place, so identity
            // edges hand over a copy rather than the shared buffer
            EdgeOp::Dummy => (**f).clone(),
            EdgeOp::MaxPool {
                window,
                stride,
                indices,
                insize,
            } => {
                *insize = Vec3::of(f);
                let (y, idx) = pool_forward(f, *window, *stride);
                *indices = Some(idx);
                y
            }
            EdgeOp::Conv { stride, filter, saved } => {
                *saved = Some(Rc::clone(f));
                conv_sparse(f, filter.w(), *stride)
            }
        }
    }

    /// Consumes a consumer gradient, emits the producer-shaped gradient.
    /// Convolution computes both gradients from the pre-update weights,
    /// then applies the filter update.
    pub(crate) fn backward(&mut self, g: &Cube) -> Cube {
        match self {
            EdgeOp::Dummy => g.clone(),
            EdgeOp::MaxPool {
                window,
                stride,
                indices,
                insize,
            } => {
                let idx = indices.as_ref().expect("pool backward before forward");
                assert_eq!(
                    *insize,
                    Vec3::of(g) + (*window - Vec3::ONE) * *stride,
                    "pool gradient extents inconsistent with saved input"
                );
                pool_backward(*insize, g, idx)
            }
            EdgeOp::Conv { stride, filter, saved } => {
                let x = saved.take().expect("conv backward before forward");
                let dw = conv_sparse_flipped(&x, g, *stride);
                let dx = conv_sparse_inverse(g, filter.w(), *stride);
                filter.update(&dw);
                dx
            }
        }
    }
}

/// One materialized operator and its place in the topology.
pub struct EdgeInst {
    pub(crate) in_port: usize,
    pub(crate) out_port: usize,
    pub(crate) op: EdgeOp,
}

/// Binds a producing node group to a consuming one. Constructed as a bare
/// descriptor first; geometry propagation fills `in_stride`/`in_fsize`,
/// then `materialize` instantiates the per-pair operators.
pub struct EdgeGroup {
    name: String,
    pub(crate) in_node: NodeId,
    pub(crate) out_node: NodeId,
    pub(crate) width: Vec3,
    pub(crate) stride: Vec3,
    pub(crate) in_stride: Vec3,
    pub(crate) in_fsize: Vec3,
    kind: EdgeKind,
    insts: Vec<EdgeInst>,
    opts: Config,
}

impl EdgeGroup {
    pub fn descriptor(op: &Config, in_node: NodeId, out_node: NodeId) -> Result<EdgeGroup> {
        let name: String = op.require("name")?;
        let ty: String = op.require("type")?;

        let (kind, width, stride) = match ty.as_str() {
            "dummy" => (EdgeKind::Dummy, Vec3::ONE, Vec3::ONE),
            "max_filter" => (
                EdgeKind::MaxPool,
                op.require("size")?,
                op.require("stride")?,
            ),
            "conv" => (
                EdgeKind::Conv,
                op.require("size")?,
                op.optional("stride", Vec3::ONE)?,
            ),
            _ => return Err(NetError::UnknownType { what: "edge group", ty }),
        };
        if !width.all_positive() || !stride.all_positive() {
            return Err(NetError::ZeroSize { name });
        }

        Ok(EdgeGroup {
            name,
            in_node,
            out_node,
            width,
            stride,
            in_stride: Vec3::ZERO,
            in_fsize: Vec3::ZERO,
            kind,
            insts: Vec::new(),
            opts: op.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instantiates operators for producer cardinality `n` and consumer
    /// cardinality `m`. Geometry must have been propagated: the inherited
    /// producer stride becomes the kernel stride.
    pub(crate) fn materialize(&mut self, n: usize, m: usize) -> Result<()> {
        match self.kind {
            EdgeKind::Dummy => {
                if n != m {
                    return Err(NetError::SizeMismatch { name: self.name.clone(), n, m });
                }
                self.insts = (0..n)
                    .map(|i| EdgeInst { in_port: i, out_port: i, op: EdgeOp::Dummy })
                    .collect();
            }
            EdgeKind::MaxPool => {
                if n != m {
                    return Err(NetError::SizeMismatch { name: self.name.clone(), n, m });
                }
                self.insts = (0..n)
                    .map(|i| EdgeInst {
                        in_port: i,
                        out_port: i,
                        op: EdgeOp::MaxPool {
                            window: self.width,
                            stride: self.in_stride,
                            indices: None,
                            insize: Vec3::ZERO,
                        },
                    })
                    .collect();
            }
            EdgeKind::Conv => {
                let eta = self.opts.optional("eta", 0.1)?;
                let momentum = self.opts.optional("momentum", 0.0)?;
                let weight_decay = self.opts.optional("weight_decay", 0.0)?;

                let vol = self.width.product();
                let count = n * m * vol;
                let values = if self.opts.contains("filters") {
                    let bytes: Vec<u8> = self.opts.require("filters")?;
                    if bytes.len() != count * 8 {
                        return Err(NetError::PayloadLength {
                            name: self.name.clone(),
                            got: bytes.len(),
                            expected: count * 8,
                        });
                    }
                    unpack_f64(&bytes)
                } else {
                    Init::from_config(&self.opts)?.sample(count)?
                };

                // port-pair-major, spatial-minor: filter k = i*m + j
                self.insts = Vec::with_capacity(n * m);
                for (i, j) in iproduct!(0..n, 0..m) {
                    let k = i * m + j;
                    let w = Array3::from_shape_vec(
                        self.width.dim(),
                        values[k * vol..(k + 1) * vol].to_vec(),
                    )
                    .expect("filter chunk matches spatial volume");
                    let mut filter = Filter::new(self.width, eta, momentum, weight_decay);
                    filter.set_w(w);
                    self.insts.push(EdgeInst {
                        in_port: i,
                        out_port: j,
                        op: EdgeOp::Conv {
                            stride: self.in_stride,
                            filter,
                            saved: None,
                        },
                    });
                }
            }
        }
        Ok(())
    }

    pub(crate) fn insts(&self) -> &[EdgeInst] {
        &self.insts
    }

    pub(crate) fn inst_mut(&mut self, k: usize) -> &mut EdgeInst {
        &mut self.insts[k]
    }

    pub fn set_eta(&mut self, eta: f64) {
        if self.kind == EdgeKind::Conv {
            self.opts.push("eta", eta);
            self.each_filter(|f| f.set_eta(eta));
        }
    }

    pub fn set_momentum(&mut self, momentum: f64) {
        if self.kind == EdgeKind::Conv {
            self.opts.push("momentum", momentum);
            self.each_filter(|f| f.set_momentum(momentum));
        }
    }

    pub fn set_weight_decay(&mut self, weight_decay: f64) {
        if self.kind == EdgeKind::Conv {
            self.opts.push("weight_decay", weight_decay);
            self.each_filter(|f| f.set_weight_decay(weight_decay));
        }
    }

    fn each_filter(&mut self, mut f: impl FnMut(&mut Filter)) {
        for inst in &mut self.insts {
            if let EdgeOp::Conv { filter, .. } = &mut inst.op {
                f(filter);
            }
        }
    }

    /// Construction record, with live filter weights embedded.
    pub fn serialize(&self) -> Config {
        let mut ret = self.opts.clone();
        if self.kind == EdgeKind::Conv {
            let mut values = Vec::new();
            for inst in &self.insts {
                if let EdgeOp::Conv { filter, .. } = &inst.op {
                    values.extend(filter.w().iter().copied());
                }
            }
            ret.push("filters", Opt::Bytes(pack_f64(&values)));
        }
        ret
    }
}
