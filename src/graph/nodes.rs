use std::rc::Rc;

use crate::config::{Config, Opt};
use crate::cube::{pack_f64, unpack_f64, Cube};
use crate::error::{NetError, Result};
use crate::init::Init;
use crate::param::Bias;
use crate::transfer::TransferFn;

pub type NodeId = usize;

/// Address of one edge instance: (edge group id, instance index).
pub type EdgeAddr = (usize, usize);

/// Variant state of a node group.
pub enum NodeKind {
    /// Forwards injected maps verbatim, swallows gradients.
    Input,
    /// Accumulates fan-in by elementwise addition.
    Sum,
    /// As `Sum`, plus per-index bias and a shared transfer function.
    Transfer { biases: Vec<Bias>, func: TransferFn },
}

/// A layer-like collection of feature maps sharing one role. Ports are
/// wired to edge instances by address; all per-sweep state (accumulators,
/// arrival counters) lives here.
pub struct NodeGroup {
    name: String,
    size: usize,
    kind: NodeKind,
    in_edges: Vec<Vec<EdgeAddr>>,
    out_edges: Vec<Vec<EdgeAddr>>,
    received: Vec<usize>,
    fs: Vec<Option<Rc<Cube>>>,
    gs: Vec<Option<Rc<Cube>>>,
    opts: Config,
}

impl NodeGroup {
    pub fn from_config(op: &Config) -> Result<NodeGroup> {
        let name: String = op.require("name")?;
        let ty: String = op.require("type")?;
        let size: usize = op.require("size")?;
        if size == 0 {
            return Err(NetError::ZeroSize { name });
        }

        let kind = match ty.as_str() {
            "input" => NodeKind::Input,
            "sum" => NodeKind::Sum,
            "transfer" => {
                let func = TransferFn::from_config(op)?;
                let eta = op.optional("eta", 0.1)?;
                let momentum = op.optional("momentum", 0.0)?;
                let weight_decay = op.optional("weight_decay", 0.0)?;

                let values = if op.contains("biases") {
                    let bytes: Vec<u8> = op.require("biases")?;
                    if bytes.len() != size * 8 {
                        return Err(NetError::PayloadLength {
                            name,
                            got: bytes.len(),
                            expected: size * 8,
                        });
                    }
                    unpack_f64(&bytes)
                } else {
                    Init::from_config(op)?.sample(size)?
                };

                let biases = values
                    .into_iter()
                    .map(|b| {
                        let mut bias = Bias::new(eta, momentum, weight_decay);
                        bias.set_b(b);
                        bias
                    })
                    .collect();
                NodeKind::Transfer { biases, func }
            }
            _ => return Err(NetError::UnknownType { what: "node group", ty }),
        };

        Ok(NodeGroup {
            name,
            size,
            kind,
            in_edges: vec![Vec::new(); size],
            out_edges: vec![Vec::new(); size],
            received: vec![0; size],
            fs: vec![None; size],
            gs: vec![None; size],
            opts: op.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_input(&self) -> bool {
        matches!(self.kind, NodeKind::Input)
    }

    pub(crate) fn attach_in(&mut self, port: usize, addr: EdgeAddr) {
        assert!(port < self.size, "in port {port} out of range");
        assert!(
            !matches!(self.kind, NodeKind::Input),
            "input node group `{}` cannot consume edges",
            self.name
        );
        self.in_edges[port].push(addr);
    }

    pub(crate) fn attach_out(&mut self, port: usize, addr: EdgeAddr) {
        assert!(port < self.size, "out port {port} out of range");
        self.out_edges[port].push(addr);
    }

    pub(crate) fn out_addrs(&self, port: usize) -> &[EdgeAddr] {
        &self.out_edges[port]
    }

    pub(crate) fn in_addrs(&self, port: usize) -> &[EdgeAddr] {
        &self.in_edges[port]
    }

    /// Current forward buffers; sinks keep theirs so the engine can collect.
    pub fn featuremaps(&self) -> &[Option<Rc<Cube>>] {
        &self.fs
    }

    /// Accepts a feature map on input port `port`. Returns the map to fan
    /// out when the port fires, `None` while contributions are still due.
    pub(crate) fn absorb_forward(&mut self, port: usize, f: Rc<Cube>) -> Option<Rc<Cube>> {
        assert!(port < self.size, "forward port {port} out of range");
        if matches!(self.kind, NodeKind::Input) {
            return Some(f);
        }

        let expected = self.in_edges[port].len();
        assert!(
            self.received[port] < expected,
            "forward arrival overflow at `{}`[{port}]",
            self.name
        );
        if self.received[port] == 0 {
            self.fs[port] = Some(f);
        } else {
            let buf = self.fs[port].as_mut().expect("accumulator started");
            *Rc::make_mut(buf) += &*f;
        }
        self.received[port] += 1;
        if self.received[port] < expected {
            return None;
        }
        self.received[port] = 0;

        if let NodeKind::Transfer { biases, func } = &mut self.kind {
            let buf = self.fs[port].as_mut().expect("accumulator started");
            func.apply(Rc::make_mut(buf), biases[port].b());
            // retained across the sweep pair: backward differentiates
            // through the saved post-activation value
            Some(Rc::clone(buf))
        } else if self.out_edges[port].is_empty() {
            // terminal summing port: keep the result for collection
            Some(Rc::clone(self.fs[port].as_ref().expect("accumulator started")))
        } else {
            self.fs[port].take()
        }
    }

    /// Accepts a gradient on output port `port`; symmetric to
    /// [`absorb_forward`]. Terminal ports fire on the single explicit
    /// gradient injected by the caller.
    pub(crate) fn absorb_backward(&mut self, port: usize, g: Rc<Cube>) -> Option<Rc<Cube>> {
        assert!(port < self.size, "backward port {port} out of range");
        if matches!(self.kind, NodeKind::Input) {
            return None;
        }

        let expected = self.out_edges[port].len();
        assert!(
            self.received[port] < expected.max(1),
            "backward arrival overflow at `{}`[{port}]",
            self.name
        );
        if self.received[port] == 0 {
            self.gs[port] = Some(g);
        } else {
            let buf = self.gs[port].as_mut().expect("accumulator started");
            *Rc::make_mut(buf) += &*g;
        }
        self.received[port] += 1;
        if self.received[port] < expected {
            return None;
        }
        self.received[port] = 0;

        let mut g = self.gs[port].take().expect("accumulator started");
        if let NodeKind::Transfer { biases, func } = &mut self.kind {
            let f = self.fs[port]
                .take()
                .expect("transfer backward without a saved forward");
            func.grad(Rc::make_mut(&mut g), &f);
            biases[port].update(g.sum());
        }
        Some(g)
    }

    pub fn set_eta(&mut self, eta: f64) {
        if let NodeKind::Transfer { biases, .. } = &mut self.kind {
            self.opts.push("eta", eta);
            biases.iter_mut().for_each(|b| b.set_eta(eta));
        }
    }

    pub fn set_momentum(&mut self, momentum: f64) {
        if let NodeKind::Transfer { biases, .. } = &mut self.kind {
            self.opts.push("momentum", momentum);
            biases.iter_mut().for_each(|b| b.set_momentum(momentum));
        }
    }

    pub fn set_weight_decay(&mut self, weight_decay: f64) {
        if let NodeKind::Transfer { biases, .. } = &mut self.kind {
            self.opts.push("weight_decay", weight_decay);
            biases.iter_mut().for_each(|b| b.set_weight_decay(weight_decay));
        }
    }

    /// Construction record, with live bias values embedded.
    pub fn serialize(&self) -> Config {
        let mut ret = self.opts.clone();
        if let NodeKind::Transfer { biases, .. } = &self.kind {
            let values: Vec<f64> = biases.iter().map(Bias::b).collect();
            ret.push("biases", Opt::Bytes(pack_f64(&values)));
        }
        ret
    }
}
