pub mod activations;
mod graph;
pub mod layers;
pub mod loss;
mod model;

pub use graph::{Graph, GraphBuilder, NodeId, ParamSlot};
pub use model::Model;

/// The shape of a single sample, channels first: `[channels, height, width]`.
pub type Shape = [usize; 3];

/// Whether a forward pass is part of training or just inference.
///
/// Only training passes keep the metadata needed for a later backward pass, and dropout is only
/// active during them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Train,
    Infer,
}
