//! The dataflow graph: node groups joined by edge groups, driven by
//! synchronous message passing. Geometry is propagated once at
//! construction; sweeps then move `Rc`-shared cubes along the wires.

pub mod edges;
pub mod network;
pub mod nodes;

pub use edges::{EdgeGroup, EdgeInst, EdgeOp};
pub use network::{Network, NodeGeometry};
pub use nodes::{EdgeAddr, NodeGroup, NodeId, NodeKind};
