//! A runtime for convolutional networks over 3-D volumetric feature maps.
//!
//! A network is a DAG of *node groups* (ordered collections of feature
//! maps sharing a layer role) joined by *edge groups* (per-pair operators:
//! strided convolution, max pooling, identity). Construction takes flat
//! option records, propagates field-of-view / stride / feature-size
//! geometry from the desired output extents, and wires everything by id;
//! `forward` and `backward` then sweep the graph with arrival-counted
//! accumulation at every port.

pub mod config;
pub mod cube;
pub mod error;
pub mod graph;
pub mod init;
pub mod kernels;
pub mod param;
pub mod transfer;

pub use config::{Config, Opt};
pub use cube::{Cube, Vec3};
pub use error::{NetError, Result};
pub use graph::{Network, NodeGeometry};
