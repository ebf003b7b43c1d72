use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::config::Config;
use crate::cube::{Cube, Vec3};
use crate::error::{NetError, Result};
use crate::graph::edges::EdgeGroup;
use crate::graph::nodes::{NodeGroup, NodeId};

/// Resolved geometry triple of a node group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeGeometry {
    /// Extent, in input-volume coordinates, of the region influencing one
    /// element of this node's feature maps.
    pub fov: Vec3,
    /// Spacing, in input-volume coordinates, between adjacent elements.
    pub stride: Vec3,
    /// Feature-map extents.
    pub fsize: Vec3,
}

#[derive(Default, Clone, Copy)]
struct PartialGeometry {
    fov: Option<Vec3>,
    stride: Option<Vec3>,
    fsize: Option<Vec3>,
}

/// Group-level adjacency used by the geometry passes, before per-port
/// operators exist.
#[derive(Default, Clone)]
struct GroupAdj {
    incoming: Vec<usize>,
    outgoing: Vec<usize>,
}

/// The dataflow engine: owns flat vectors of node and edge groups, wires
/// them by id, propagates geometry, and drives forward/backward sweeps by
/// synchronous message passing along edges.
pub struct Network {
    nodes: Vec<NodeGroup>,
    edges: Vec<EdgeGroup>,
    adj: Vec<GroupAdj>,
    node_ids: HashMap<String, NodeId>,
    /// Input-typed groups, name-ordered.
    inputs: Vec<NodeId>,
    /// Groups without outgoing edges, name-ordered.
    outputs: Vec<NodeId>,
    geometry: Vec<NodeGeometry>,
}

impl Network {
    /// Builds the engine from one record per node group and one per edge
    /// group, plus the desired output extents. All-or-nothing: any config,
    /// topology or geometry error aborts construction.
    pub fn new(node_cfgs: &[Config], edge_cfgs: &[Config], outsz: Vec3) -> Result<Network> {
        let mut nodes = Vec::with_capacity(node_cfgs.len());
        let mut node_ids = HashMap::new();
        for cfg in node_cfgs {
            let node = NodeGroup::from_config(cfg)?;
            if node_ids.contains_key(node.name()) {
                return Err(NetError::DuplicateName {
                    name: node.name().to_string(),
                });
            }
            node_ids.insert(node.name().to_string(), nodes.len());
            nodes.push(node);
        }

        let mut edges = Vec::with_capacity(edge_cfgs.len());
        let mut edge_names = HashMap::new();
        let mut adj = vec![GroupAdj::default(); nodes.len()];
        for cfg in edge_cfgs {
            let name: String = cfg.require("name")?;
            if edge_names.contains_key(&name) {
                return Err(NetError::DuplicateName { name });
            }
            let resolve = |key: &str| -> Result<NodeId> {
                let node: String = cfg.require(key)?;
                node_ids.get(&node).copied().ok_or(NetError::UnknownNode {
                    edge: name.clone(),
                    node,
                })
            };
            let in_node = resolve("input")?;
            let out_node = resolve("output")?;
            if nodes[out_node].is_input() {
                return Err(NetError::BadEndpoint {
                    edge: name,
                    node: nodes[out_node].name().to_string(),
                    role: "consumer",
                });
            }

            let eid = edges.len();
            edges.push(EdgeGroup::descriptor(cfg, in_node, out_node)?);
            edge_names.insert(name, eid);
            adj[in_node].outgoing.push(eid);
            adj[out_node].incoming.push(eid);
        }

        let mut inputs: Vec<NodeId> = (0..nodes.len()).filter(|&n| nodes[n].is_input()).collect();
        inputs.sort_by(|&a, &b| nodes[a].name().cmp(nodes[b].name()));
        if inputs.is_empty() {
            return Err(NetError::NoInput);
        }
        let mut outputs: Vec<NodeId> = (0..nodes.len())
            .filter(|&n| adj[n].outgoing.is_empty())
            .collect();
        outputs.sort_by(|&a, &b| nodes[a].name().cmp(nodes[b].name()));

        let mut net = Network {
            nodes,
            edges,
            adj,
            node_ids,
            inputs,
            outputs,
            geometry: Vec::new(),
        };
        net.propagate_geometry(outsz)?;
        net.create_edges()?;
        Ok(net)
    }

    /// Runs the stride and FOV fixpoint passes and resolves every node
    /// group's geometry triple. Idempotent: re-running on an initialized
    /// network reaches the same fixed point.
    fn propagate_geometry(&mut self, outsz: Vec3) -> Result<()> {
        let mut partial = vec![PartialGeometry::default(); self.nodes.len()];
        // carry over already-resolved geometry so a re-run revisits
        for (p, g) in partial.iter_mut().zip(&self.geometry) {
            *p = PartialGeometry {
                fov: Some(g.fov),
                stride: Some(g.stride),
                fsize: Some(g.fsize),
            };
        }

        for i in 0..self.inputs.len() {
            self.stride_pass(&mut partial, self.inputs[i], Vec3::ONE)?;
        }
        for i in 0..self.outputs.len() {
            self.fov_pass(&mut partial, self.outputs[i], Vec3::ONE, outsz)?;
        }

        let mut geometry = Vec::with_capacity(self.nodes.len());
        for (node, p) in self.nodes.iter().zip(&partial) {
            match (p.fov, p.stride, p.fsize) {
                (Some(fov), Some(stride), Some(fsize)) => {
                    geometry.push(NodeGeometry { fov, stride, fsize })
                }
                _ => {
                    return Err(NetError::Unresolved {
                        name: node.name().to_string(),
                    })
                }
            }
        }
        self.geometry = geometry;

        for (node, g) in self.nodes.iter().zip(&self.geometry) {
            debug!(
                node = node.name(),
                fov = %g.fov,
                stride = %g.stride,
                fsize = %g.fsize,
                "node group geometry"
            );
        }
        Ok(())
    }

    /// Walks forward from `node`: every outgoing edge inherits the node's
    /// stride, every consumer compounds it with the edge's own factor.
    fn stride_pass(
        &mut self,
        partial: &mut [PartialGeometry],
        node: NodeId,
        stride: Vec3,
    ) -> Result<()> {
        if let Some(have) = partial[node].stride {
            if have != stride {
                return Err(NetError::GeometryMismatch {
                    name: self.nodes[node].name().to_string(),
                    what: "stride",
                    have,
                    got: stride,
                });
            }
            return Ok(());
        }
        partial[node].stride = Some(stride);
        for eid in self.adj[node].outgoing.clone() {
            self.edges[eid].in_stride = stride;
            let next = self.edges[eid].out_node;
            let compounded = stride * self.edges[eid].stride;
            self.stride_pass(partial, next, compounded)?;
        }
        Ok(())
    }

    /// Walks backward from `node`: field of view grows by the edge window
    /// compounded with its stride, feature size by the window span at the
    /// inherited stride.
    fn fov_pass(
        &mut self,
        partial: &mut [PartialGeometry],
        node: NodeId,
        fov: Vec3,
        fsize: Vec3,
    ) -> Result<()> {
        if let (Some(have_fov), Some(have_fsize)) = (partial[node].fov, partial[node].fsize) {
            if have_fov != fov {
                return Err(NetError::GeometryMismatch {
                    name: self.nodes[node].name().to_string(),
                    what: "fov",
                    have: have_fov,
                    got: fov,
                });
            }
            if have_fsize != fsize {
                return Err(NetError::GeometryMismatch {
                    name: self.nodes[node].name().to_string(),
                    what: "fsize",
                    have: have_fsize,
                    got: fsize,
                });
            }
            return Ok(());
        }
        for &eid in &self.adj[node].outgoing {
            self.edges[eid].in_fsize = fsize;
        }
        partial[node].fov = Some(fov);
        partial[node].fsize = Some(fsize);
        for eid in self.adj[node].incoming.clone() {
            let e = &self.edges[eid];
            let new_fov = (fov - Vec3::ONE) * e.stride + e.width;
            let new_fsize = (e.width - Vec3::ONE) * e.in_stride + fsize;
            let prev = e.in_node;
            self.fov_pass(partial, prev, new_fov, new_fsize)?;
        }
        Ok(())
    }

    /// Materializes per-pair operators now that every edge knows its
    /// inherited stride, and wires them to their endpoint ports.
    fn create_edges(&mut self) -> Result<()> {
        for eid in 0..self.edges.len() {
            let in_node = self.edges[eid].in_node;
            let out_node = self.edges[eid].out_node;
            let n = self.nodes[in_node].size();
            let m = self.nodes[out_node].size();
            self.edges[eid].materialize(n, m)?;

            let pairs: Vec<(usize, usize)> = self.edges[eid]
                .insts()
                .iter()
                .map(|inst| (inst.in_port, inst.out_port))
                .collect();
            for (k, (i, j)) in pairs.into_iter().enumerate() {
                self.nodes[in_node].attach_out(i, (eid, k));
                self.nodes[out_node].attach_in(j, (eid, k));
            }
        }
        Ok(())
    }

    /// Injects one sweep of feature maps, one entry per source group, and
    /// returns the collected maps of every sink group. Extents are checked
    /// against the propagated geometry before anything is injected.
    pub fn forward(
        &mut self,
        mut fin: HashMap<String, Vec<Cube>>,
    ) -> Result<HashMap<String, Vec<Cube>>> {
        self.validate_sweep(&fin, &self.inputs, "source")?;

        for idx in 0..self.inputs.len() {
            let id = self.inputs[idx];
            let maps = fin
                .remove(self.nodes[id].name())
                .expect("validated membership");
            for (port, map) in maps.into_iter().enumerate() {
                self.node_forward(id, port, Rc::new(map));
            }
        }

        let mut ret = HashMap::new();
        for &id in &self.outputs {
            let node = &self.nodes[id];
            let mut maps = Vec::with_capacity(node.size());
            for (port, f) in node.featuremaps().iter().enumerate() {
                let f = f.as_ref().ok_or_else(|| NetError::Incomplete {
                    name: node.name().to_string(),
                    port,
                })?;
                maps.push((**f).clone());
            }
            ret.insert(node.name().to_string(), maps);
        }
        Ok(ret)
    }

    /// Injects one sweep of gradients, one entry per sink group. Sources
    /// swallow gradients, so the returned mapping is an empty placeholder
    /// per source group.
    pub fn backward(
        &mut self,
        mut gin: HashMap<String, Vec<Cube>>,
    ) -> Result<HashMap<String, Vec<Cube>>> {
        self.validate_sweep(&gin, &self.outputs, "sink")?;

        for idx in 0..self.outputs.len() {
            let id = self.outputs[idx];
            let grads = gin
                .remove(self.nodes[id].name())
                .expect("validated membership");
            for (port, grad) in grads.into_iter().enumerate() {
                self.node_backward(id, port, Rc::new(grad));
            }
        }

        Ok(self
            .inputs
            .iter()
            .map(|&id| (self.nodes[id].name().to_string(), Vec::new()))
            .collect())
    }

    /// Checks a sweep's volumes against the expected groups before any of
    /// them is injected, so a malformed call leaves no partial state.
    fn validate_sweep(
        &self,
        vols: &HashMap<String, Vec<Cube>>,
        expected: &[NodeId],
        role: &'static str,
    ) -> Result<()> {
        if vols.len() != expected.len() {
            return Err(NetError::GroupCount {
                role,
                expected: expected.len(),
                got: vols.len(),
            });
        }
        for &id in expected {
            let node = &self.nodes[id];
            let maps = vols.get(node.name()).ok_or_else(|| NetError::UnknownName {
                what: "group",
                name: node.name().to_string(),
            })?;
            if maps.len() != node.size() {
                return Err(NetError::MapCount {
                    name: node.name().to_string(),
                    expected: node.size(),
                    got: maps.len(),
                });
            }
            let fsize = self.geometry[id].fsize;
            for (port, map) in maps.iter().enumerate() {
                if Vec3::of(map) != fsize {
                    return Err(NetError::ShapeMismatch {
                        name: node.name().to_string(),
                        port,
                        got: Vec3::of(map),
                        expected: fsize,
                    });
                }
            }
        }
        Ok(())
    }

    /// Delivers a feature map to a node port; when the port fires, pushes
    /// the result through every attached outgoing edge and recurses into
    /// the consumers.
    fn node_forward(&mut self, node: NodeId, port: usize, f: Rc<Cube>) {
        let fired = self.nodes[node].absorb_forward(port, f);
        let Some(out) = fired else { return };
        let addrs: Vec<_> = self.nodes[node].out_addrs(port).to_vec();
        for (eid, k) in addrs {
            let produced = self.edges[eid].inst_mut(k).op.forward(&out);
            let consumer = self.edges[eid].out_node;
            let consumer_port = self.edges[eid].insts()[k].out_port;
            self.node_forward(consumer, consumer_port, Rc::new(produced));
        }
    }

    fn node_backward(&mut self, node: NodeId, port: usize, g: Rc<Cube>) {
        let fired = self.nodes[node].absorb_backward(port, g);
        let Some(out) = fired else { return };
        let addrs: Vec<_> = self.nodes[node].in_addrs(port).to_vec();
        for (eid, k) in addrs {
            let produced = self.edges[eid].inst_mut(k).op.backward(&out);
            let producer = self.edges[eid].in_node;
            let producer_port = self.edges[eid].insts()[k].in_port;
            self.node_backward(producer, producer_port, Rc::new(produced));
        }
    }

    pub fn set_eta(&mut self, eta: f64) {
        self.nodes.iter_mut().for_each(|n| n.set_eta(eta));
        self.edges.iter_mut().for_each(|e| e.set_eta(eta));
    }

    pub fn set_momentum(&mut self, momentum: f64) {
        self.nodes.iter_mut().for_each(|n| n.set_momentum(momentum));
        self.edges.iter_mut().for_each(|e| e.set_momentum(momentum));
    }

    pub fn set_weight_decay(&mut self, weight_decay: f64) {
        self.nodes.iter_mut().for_each(|n| n.set_weight_decay(weight_decay));
        self.edges.iter_mut().for_each(|e| e.set_weight_decay(weight_decay));
    }

    /// Field of view of the (first, name-ordered) input group.
    pub fn fov(&self) -> Vec3 {
        self.geometry[self.inputs[0]].fov
    }

    /// Resolved geometry of a node group, by name.
    pub fn geometry(&self, name: &str) -> Option<NodeGeometry> {
        self.node_ids.get(name).map(|&id| self.geometry[id])
    }

    /// One record per node group and one per edge group, each a superset
    /// of its construction record with live weights embedded. Feeding the
    /// result back to [`Network::new`] reproduces the network.
    pub fn serialize(&self) -> (Vec<Config>, Vec<Config>) {
        let mut node_ids: Vec<NodeId> = (0..self.nodes.len()).collect();
        node_ids.sort_by(|&a, &b| self.nodes[a].name().cmp(self.nodes[b].name()));
        let mut edge_ids: Vec<usize> = (0..self.edges.len()).collect();
        edge_ids.sort_by(|&a, &b| self.edges[a].name().cmp(self.edges[b].name()));

        (
            node_ids.iter().map(|&id| self.nodes[id].serialize()).collect(),
            edge_ids.iter().map(|&id| self.edges[id].serialize()).collect(),
        )
    }
}
