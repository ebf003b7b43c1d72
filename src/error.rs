use thiserror::Error;

use crate::cube::Vec3;

/// Everything that can go wrong while constructing or sweeping a network.
/// Construction is all-or-nothing: any of these surfaced from `Network::new`
/// means no partially wired engine escaped.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("missing required option `{key}`")]
    MissingOption { key: String },

    #[error("option `{key}` is not a {expected}")]
    OptionType { key: String, expected: &'static str },

    #[error("cannot parse `{value}` as a 3-vector")]
    BadVec3 { value: String },

    #[error("unknown {what} type `{ty}`")]
    UnknownType { what: &'static str, ty: String },

    #[error("invalid initializer parameters: {0}")]
    BadInit(String),

    #[error("duplicate group name `{name}`")]
    DuplicateName { name: String },

    #[error("edge `{edge}` references undefined node group `{node}`")]
    UnknownNode { edge: String, node: String },

    #[error("edge `{edge}`: node group `{node}` cannot appear as {role}")]
    BadEndpoint {
        edge: String,
        node: String,
        role: &'static str,
    },

    #[error("`{name}`: zero cardinality or extent")]
    ZeroSize { name: String },

    #[error("edge `{name}`: producer and consumer sizes differ ({n} vs {m})")]
    SizeMismatch { name: String, n: usize, m: usize },

    #[error("geometry conflict at `{name}`: {what} {have} vs {got}")]
    GeometryMismatch {
        name: String,
        what: &'static str,
        have: Vec3,
        got: Vec3,
    },

    #[error("node group `{name}` is unreachable from the network inputs")]
    Unresolved { name: String },

    #[error("network has no input node groups")]
    NoInput,

    #[error("unknown {what} `{name}`")]
    UnknownName { what: &'static str, name: String },

    #[error("expected volumes for {expected} {role} groups, got {got}")]
    GroupCount {
        role: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("`{name}`: expected {expected} volumes, got {got}")]
    MapCount {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("`{name}`[{port}]: volume extents {got} disagree with propagated size {expected}")]
    ShapeMismatch {
        name: String,
        port: usize,
        got: Vec3,
        expected: Vec3,
    },

    #[error("`{name}`: packed payload of {got} bytes, expected {expected}")]
    PayloadLength {
        name: String,
        got: usize,
        expected: usize,
    },

    #[error("sink `{name}`[{port}] did not produce a feature map")]
    Incomplete { name: String, port: usize },
}

pub type Result<T> = std::result::Result<T, NetError>;
