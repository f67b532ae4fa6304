use log::info;
use machine_learning::{
    MlErr,
    arch::{Graph, GraphBuilder, Model, NodeId, Shape, activations::ActFn, layers::Layer},
};

use crate::{Result, config::ArchConfig};

pub const INPUT: &str = "data_input";
pub const CONCAT: &str = "concat-upscore";
pub const FUSE: &str = "upscore_fuse";
pub const CLASSIFIER_DROPOUT: &str = "Dropout_Classifier";

enum Source {
    Input,
    Node(&'static str),
}

/// A stack of "same" convolutions, each followed by dropout, ending in a side projection.
struct Tower {
    source: Source,
    /// Filters and kernel side of each convolution.
    convs: &'static [(usize, usize)],
    pool: Option<&'static str>,
    upsample: usize,
}

const TOWERS: [Tower; 6] = [
    Tower {
        source: Source::Input,
        convs: &[(64, 3), (64, 3)],
        pool: Some("max_pool1"),
        upsample: 1,
    },
    Tower {
        source: Source::Node("max_pool1"),
        convs: &[(128, 3), (128, 3)],
        pool: Some("max_pool2"),
        upsample: 2,
    },
    Tower {
        source: Source::Node("max_pool2"),
        convs: &[(256, 3), (256, 3), (256, 3)],
        pool: Some("max_pool3"),
        upsample: 4,
    },
    Tower {
        source: Source::Node("max_pool3"),
        convs: &[(512, 3), (512, 3), (512, 3)],
        pool: None,
        upsample: 8,
    },
    Tower {
        source: Source::Node("max_pool1"),
        convs: &[(64, 5), (64, 5)],
        pool: Some("max_pool4"),
        upsample: 2,
    },
    Tower {
        source: Source::Node("max_pool4"),
        convs: &[(128, 5), (128, 3)],
        pool: None,
        upsample: 4,
    },
];

/// The multi-scale retina segmentation network.
///
/// Six convolutional towers look at the image at strides 1 to 8, each one projects its last
/// feature map to a few side channels which are upsampled back to the input resolution, cropped
/// to align with the first tower and fused by a 1x1 convolution into per-class logits.
#[derive(Clone, Debug)]
pub struct RetinaModel {
    graph: Graph,
    classification: usize,
    activation: ActFn,
    side_outputs: Vec<String>,
}

impl RetinaModel {
    /// Builds the network, checking every shape along the way.
    ///
    /// # Args
    /// * `classification` - The amount of classes, hence output channels.
    /// * `activation` - The activation of every tower convolution.
    /// * `arch` - Input size, widths and regularization.
    ///
    /// # Returns
    /// The model or an error if the shapes don't line up.
    pub fn build(classification: usize, activation: ActFn, arch: &ArchConfig) -> Result<Self> {
        let input_shape = [arch.in_channels, arch.input_size, arch.input_size];
        let mut builder = GraphBuilder::new(INPUT, input_shape);
        let mut seeds = arch
            .seed
            .into_iter()
            .flat_map(|seed| (0..).map(move |i: u64| seed.wrapping_add(i)));
        let mut dropout = |builder: &mut GraphBuilder,
                           name: String,
                           input: NodeId|
         -> machine_learning::Result<NodeId> {
            let layer = Layer::dropout(arch.dropout, seeds.next())?;
            builder.add(name, layer, input)
        };

        let mut side_outputs = Vec::with_capacity(TOWERS.len());
        let mut aligned = Vec::with_capacity(TOWERS.len());
        let mut target_hw = None;

        for (t, tower) in TOWERS.iter().enumerate().map(|(i, tower)| (i + 1, tower)) {
            let mut x = match tower.source {
                Source::Input => builder.input(),
                Source::Node(name) => builder.node(name)?,
            };

            for (i, &(filters, kernel)) in tower.convs.iter().enumerate().map(|(i, c)| (i + 1, c)) {
                let in_channels = builder.shape(x)[0];
                let conv = Layer::conv2d(
                    in_channels,
                    arch.filters(filters),
                    (kernel, kernel),
                    Some(activation),
                );
                x = builder.add(format!("conv{t}_{i}"), conv, x)?;
                x = dropout(&mut builder, format!("Drop{t}_{i}"), x)?;
            }

            if let Some(pool) = tower.pool {
                builder.add(pool, Layer::max_pool(2), x)?;
            }

            let last = tower.convs.len();
            let side = arch.side_channels;
            let projection = Layer::conv2d(
                builder.shape(x)[0],
                side,
                (arch.side_kernel, arch.side_kernel),
                None,
            );
            let mut side_out = builder.add(format!("conv{t}_{last}_{side}"), projection, x)?;
            side_out = dropout(&mut builder, format!("Drop{t}_{last}_{side}"), side_out)?;

            if tower.upsample > 1 {
                let up = builder.add(
                    format!("side_multi{t}_up"),
                    Layer::up_sample(tower.upsample),
                    side_out,
                )?;

                let [_, h1, w1] = target_hw.unwrap_or(builder.shape(side_out));
                let cropping = alignment_crop(builder.shape(up), (h1, w1))?;
                side_out = builder.add(format!("upside_multi{t}"), Layer::crop(cropping), up)?;
            } else {
                target_hw.get_or_insert(builder.shape(side_out));
            }

            side_outputs.push(builder.node_name(side_out).to_string());
            aligned.push(side_out);
        }

        let concat = builder.concat(CONCAT, &aligned)?;
        let fuse = Layer::conv2d(builder.shape(concat)[0], classification, (1, 1), None);
        let fuse = builder.add(FUSE, fuse, concat)?;
        let output = dropout(&mut builder, CLASSIFIER_DROPOUT.to_string(), fuse)?;

        let graph = builder.build(output);
        info!(
            "built the retina model: {} parameters, output {:?}",
            graph.size(),
            graph.output_shape()
        );

        Ok(Self {
            graph,
            classification,
            activation,
            side_outputs,
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn classification(&self) -> usize {
        self.classification
    }

    pub fn activation(&self) -> ActFn {
        self.activation
    }

    /// The names of the six side outputs as they enter the concatenation.
    pub fn side_outputs(&self) -> &[String] {
        &self.side_outputs
    }

    pub fn side_output_shapes(&self) -> Result<Vec<Shape>> {
        let shapes = self
            .side_outputs
            .iter()
            .map(|name| self.graph.node_shape(name))
            .collect::<machine_learning::Result<_>>()?;

        Ok(shapes)
    }
}

/// The cropping that brings an upsampled side output back to `(h, w)`: half the excess at the
/// top/left, the rest at the bottom/right.
fn alignment_crop(
    upsampled: Shape,
    (h, w): (usize, usize),
) -> Result<((usize, usize), (usize, usize))> {
    let [c, uh, uw] = upsampled;
    let (Some(eh), Some(ew)) = (uh.checked_sub(h), uw.checked_sub(w)) else {
        return Err(MlErr::ShapeMismatch {
            what: "upsampled side output".into(),
            got: upsampled.to_vec(),
            expected: vec![c, h, w],
        }
        .into());
    };

    Ok(((eh / 2, eh - eh / 2), (ew / 2, ew - ew / 2)))
}
