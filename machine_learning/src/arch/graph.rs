use std::{cell::RefCell, collections::HashMap, rc::Rc};

use log::debug;
use ndarray::prelude::*;
use rand::Rng;

use super::{Mode, Model, Shape, layers::Layer, layers::ParamShape};
use crate::{
    MlErr, Result,
    initialization::{ChainedParamGen, ParamGen},
};

/// A handle to a node of a graph under construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Clone, Debug)]
enum Op {
    Input,
    Layer(Layer),
    Concat,
}

#[derive(Clone, Debug)]
struct Node {
    name: String,
    op: Op,
    inputs: Vec<usize>,
    shape: Shape,
    offset: usize,
}

/// Where a parametrized layer's parameters live in the model's flat parameter buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamSlot {
    pub layer: String,
    pub offset: usize,
    pub shapes: Vec<ParamShape>,
}

impl ParamSlot {
    pub fn size(&self) -> usize {
        self.shapes.iter().map(ParamShape::len).sum()
    }
}

/// Builds a `Graph` node by node, checking the shapes as it goes.
///
/// Every node can only take already existing nodes as inputs, so the insertion order is a
/// topological order of the graph.
#[derive(Clone, Debug)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
    names: HashMap<String, usize>,
    size: usize,
}

impl GraphBuilder {
    /// Creates a new `GraphBuilder` with a single input node.
    ///
    /// # Arguments
    /// * `input_name` - The name of the input node.
    /// * `input_shape` - The shape of every sample the graph will take.
    pub fn new(input_name: impl Into<String>, input_shape: Shape) -> Self {
        let name = input_name.into();
        let input = Node {
            name: name.clone(),
            op: Op::Input,
            inputs: Vec::new(),
            shape: input_shape,
            offset: 0,
        };

        Self {
            nodes: vec![input],
            names: HashMap::from([(name, 0)]),
            size: 0,
        }
    }

    /// The input node.
    pub fn input(&self) -> NodeId {
        NodeId(0)
    }

    /// Looks up a node by name.
    pub fn node(&self, name: &str) -> Result<NodeId> {
        self.names
            .get(name)
            .map(|&i| NodeId(i))
            .ok_or_else(|| MlErr::UnknownNode(name.to_string()))
    }

    pub fn shape(&self, id: NodeId) -> Shape {
        self.nodes[id.0].shape
    }

    pub fn node_name(&self, id: NodeId) -> &str {
        &self.nodes[id.0].name
    }

    /// Appends a layer applied to the output of `input`.
    ///
    /// # Returns
    /// The new node or an error if the name is taken or the layer can't take the input's shape.
    pub fn add(&mut self, name: impl Into<String>, layer: Layer, input: NodeId) -> Result<NodeId> {
        let shape = layer.output_shape(self.shape(input)).map_err(|e| match e {
            MlErr::ShapeMismatch { got, expected, .. } => MlErr::ShapeMismatch {
                what: format!("input of {}", self.nodes[input.0].name),
                got,
                expected,
            },
            e => e,
        })?;

        let offset = self.size;
        self.size += layer.size();
        self.push(name.into(), Op::Layer(layer), vec![input.0], shape, offset)
    }

    /// Appends a channel-wise concatenation of `inputs`, which must share their spatial dims.
    pub fn concat(&mut self, name: impl Into<String>, inputs: &[NodeId]) -> Result<NodeId> {
        let name = name.into();
        let Some(first) = inputs.first() else {
            return Err(MlErr::SizeMismatch {
                what: "concat inputs",
                got: 0,
                expected: 1,
            });
        };

        let [_, h, w] = self.shape(*first);
        let mut channels = 0;

        for &input in inputs {
            let [c, ih, iw] = self.shape(input);

            if (ih, iw) != (h, w) {
                return Err(MlErr::ShapeMismatch {
                    what: format!("input {} of {name}", self.nodes[input.0].name),
                    got: vec![c, ih, iw],
                    expected: vec![c, h, w],
                });
            }

            channels += c;
        }

        let inputs = inputs.iter().map(|id| id.0).collect();
        self.push(name, Op::Concat, inputs, [channels, h, w], self.size)
    }

    fn push(
        &mut self,
        name: String,
        op: Op,
        inputs: Vec<usize>,
        shape: Shape,
        offset: usize,
    ) -> Result<NodeId> {
        if self.names.contains_key(&name) {
            return Err(MlErr::DuplicateNode(name));
        }

        debug!("{name}: {shape:?}");

        let id = self.nodes.len();
        self.names.insert(name.clone(), id);
        self.nodes.push(Node {
            name,
            op,
            inputs,
            shape,
            offset,
        });

        Ok(NodeId(id))
    }

    /// Finishes the graph with `output` as its output node.
    pub fn build(self, output: NodeId) -> Graph {
        let mut needed = vec![false; self.nodes.len()];
        needed[output.0] = true;

        for (i, node) in self.nodes.iter().enumerate().rev() {
            if needed[i] {
                node.inputs.iter().for_each(|&j| needed[j] = true);
            }
        }

        // Position of each node's last consumer, its value can be dropped after it.
        let mut last_use = vec![0; self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate().filter(|(i, _)| needed[*i]) {
            node.inputs.iter().for_each(|&j| last_use[j] = i);
        }

        Graph {
            nodes: self.nodes,
            names: self.names,
            needed,
            last_use,
            output: output.0,
            size: self.size,
        }
    }
}

/// A directed acyclic graph of named layers and concatenations with a single input and output.
///
/// The graph doesn't own its parameters, they're laid out in a flat buffer following the
/// insertion order of the parametrized layers.
#[derive(Clone, Debug)]
pub struct Graph {
    nodes: Vec<Node>,
    names: HashMap<String, usize>,
    needed: Vec<bool>,
    last_use: Vec<usize>,
    output: usize,
    size: usize,
}

impl Graph {
    pub fn input_shape(&self) -> Shape {
        self.nodes[0].shape
    }

    pub fn output_shape(&self) -> Shape {
        self.nodes[self.output].shape
    }

    /// The shape of the samples coming out of the node called `name`.
    pub fn node_shape(&self, name: &str) -> Result<Shape> {
        self.names
            .get(name)
            .map(|&i| self.nodes[i].shape)
            .ok_or_else(|| MlErr::UnknownNode(name.to_string()))
    }

    /// The parametrized layers of the graph along with the location of their parameters.
    pub fn param_slots(&self) -> Vec<ParamSlot> {
        self.nodes
            .iter()
            .filter_map(|node| match &node.op {
                Op::Layer(layer) if layer.size() > 0 => Some(ParamSlot {
                    layer: node.name.clone(),
                    offset: node.offset,
                    shapes: layer.param_shapes(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Generates a fresh set of parameters for this graph.
    ///
    /// # Arguments
    /// * `rng` - The random number generator shared by every layer's initializer.
    pub fn init_params<R>(&self, rng: Rc<RefCell<R>>) -> Result<Vec<f32>>
    where
        R: Rng + 'static,
    {
        let mut param_gens = Vec::new();

        for node in &self.nodes {
            if let Op::Layer(layer) = &node.op {
                param_gens.extend(layer.param_gens(rng.clone())?);
            }
        }

        let mut params = vec![0.; self.size];
        let written = ChainedParamGen::new(param_gens).fill(&mut params);

        if written != self.size {
            return Err(MlErr::SizeMismatch {
                what: "initialized params",
                got: written,
                expected: self.size,
            });
        }

        Ok(params)
    }

    fn check_params(&self, what: &'static str, len: usize) -> Result<()> {
        if len != self.size {
            return Err(MlErr::SizeMismatch {
                what,
                got: len,
                expected: self.size,
            });
        }

        Ok(())
    }
}

impl Model for Graph {
    fn size(&self) -> usize {
        self.size
    }

    fn forward(&mut self, params: &[f32], x: ArrayView4<f32>, mode: Mode) -> Result<Array4<f32>> {
        self.check_params("params", params.len())?;

        let (_, c, h, w) = x.dim();
        if [c, h, w] != self.input_shape() {
            return Err(MlErr::ShapeMismatch {
                what: "graph input".into(),
                got: vec![c, h, w],
                expected: self.input_shape().to_vec(),
            });
        }

        let mut values: Vec<Option<Array4<f32>>> = vec![None; self.nodes.len()];
        values[0] = Some(x.to_owned());

        for i in 1..self.nodes.len() {
            if !self.needed[i] {
                continue;
            }

            let node = &mut self.nodes[i];
            let value = match &mut node.op {
                Op::Input => unreachable!("the input is always the first node"),
                Op::Layer(layer) => {
                    let params = &params[node.offset..node.offset + layer.size()];
                    let x = values[node.inputs[0]]
                        .as_ref()
                        .ok_or(MlErr::MissingForward("graph node"))?;
                    layer.forward(params, x.view(), mode)?
                }
                Op::Concat => {
                    let views = node
                        .inputs
                        .iter()
                        .map(|&j| values[j].as_ref().map(|v| v.view()))
                        .collect::<Option<Vec<_>>>()
                        .ok_or(MlErr::MissingForward("graph node"))?;
                    ndarray::concatenate(Axis(1), &views)?
                }
            };

            values[i] = Some(value);

            for &j in &self.nodes[i].inputs {
                if self.last_use[j] == i && j != self.output {
                    values[j] = None;
                }
            }
        }

        values[self.output]
            .take()
            .ok_or(MlErr::MissingForward("graph output"))
    }

    fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array4<f32>,
    ) -> Result<Array4<f32>> {
        self.check_params("params", params.len())?;
        self.check_params("grad", grad.len())?;

        let mut deltas: Vec<Option<Array4<f32>>> = vec![None; self.nodes.len()];
        deltas[self.output] = Some(d);

        for i in (1..self.nodes.len()).rev() {
            let Some(d) = deltas[i].take() else {
                continue;
            };

            let channels: Vec<_> = self.nodes[i]
                .inputs
                .iter()
                .map(|&j| self.nodes[j].shape[0])
                .collect();

            let node = &mut self.nodes[i];
            match &mut node.op {
                Op::Input => unreachable!("the input is always the first node"),
                Op::Layer(layer) => {
                    let range = node.offset..node.offset + layer.size();
                    let dx = layer.backward(&params[range.clone()], &mut grad[range], d)?;
                    accumulate(&mut deltas[node.inputs[0]], dx);
                }
                Op::Concat => {
                    let mut start = 0;

                    for (&j, c) in node.inputs.iter().zip(channels) {
                        let dx = d.slice(s![.., start..start + c, .., ..]).to_owned();
                        accumulate(&mut deltas[j], dx);
                        start += c;
                    }
                }
            }
        }

        deltas[0].take().ok_or(MlErr::MissingForward("graph input"))
    }
}

/// Adds `d` to the deltas of a node, nodes feeding several consumers receive the sum of them.
fn accumulate(slot: &mut Option<Array4<f32>>, d: Array4<f32>) {
    match slot {
        Some(acc) => *acc += &d,
        None => *slot = Some(d),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::activations::ActFn;
    use rand::{SeedableRng, rngs::StdRng};

    fn two_branch_graph() -> Graph {
        let mut builder = GraphBuilder::new("input", [2, 6, 6]);
        let input = builder.input();

        let a = builder
            .add("conv_a", Layer::conv2d(2, 3, (3, 3), Some(ActFn::Tanh)), input)
            .unwrap();
        let pool = builder.add("pool", Layer::max_pool(2), a).unwrap();
        let b = builder
            .add("conv_b", Layer::conv2d(3, 2, (1, 1), None), pool)
            .unwrap();
        let up = builder.add("up", Layer::up_sample(2), b).unwrap();
        let cat = builder.concat("cat", &[a, up]).unwrap();
        let out = builder
            .add("fuse", Layer::conv2d(5, 1, (1, 1), None), cat)
            .unwrap();

        builder.build(out)
    }

    fn params_for(graph: &Graph) -> Vec<f32> {
        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(5)));
        graph.init_params(rng).unwrap()
    }

    #[test]
    fn shapes_are_checked_at_build_time() {
        let graph = two_branch_graph();
        assert_eq!(graph.output_shape(), [1, 6, 6]);
        assert_eq!(graph.node_shape("cat").unwrap(), [5, 6, 6]);
        assert_eq!(graph.node_shape("pool").unwrap(), [3, 3, 3]);

        let mut builder = GraphBuilder::new("input", [2, 6, 6]);
        let input = builder.input();
        let pool = builder.add("pool", Layer::max_pool(2), input).unwrap();
        assert!(matches!(
            builder.concat("cat", &[input, pool]),
            Err(MlErr::ShapeMismatch { .. })
        ));
        assert!(matches!(
            builder.add("conv", Layer::conv2d(3, 1, (1, 1), None), input),
            Err(MlErr::ShapeMismatch { .. })
        ));
        assert!(matches!(
            builder.add("pool", Layer::max_pool(2), input),
            Err(MlErr::DuplicateNode(_))
        ));
    }

    #[test]
    fn param_slots_follow_insertion_order() {
        let graph = two_branch_graph();
        let slots = graph.param_slots();

        let names: Vec<_> = slots.iter().map(|slot| slot.layer.as_str()).collect();
        assert_eq!(names, ["conv_a", "conv_b", "fuse"]);
        assert_eq!(slots[0].offset, 0);
        assert_eq!(slots[1].offset, slots[0].size());
        assert_eq!(slots[2].offset, slots[0].size() + slots[1].size());
        assert_eq!(graph.size(), slots.iter().map(ParamSlot::size).sum::<usize>());
    }

    #[test]
    fn input_gradient_matches_finite_differences() {
        let mut graph = two_branch_graph();
        let params = params_for(&graph);

        let mut rng = StdRng::seed_from_u64(9);
        let x = Array4::from_shape_simple_fn((1, 2, 6, 6), || rng.random_range(-1.0..1.0));

        graph.forward(&params, x.view(), Mode::Train).unwrap();
        let mut grad = vec![0.; graph.size()];
        let dx = graph
            .backward(&params, &mut grad, Array4::ones((1, 1, 6, 6)))
            .unwrap();

        let eps = 5e-3;
        for idx in [[0, 0, 0, 0], [0, 1, 2, 3], [0, 0, 5, 4]] {
            let mut xp = x.clone();
            xp[idx] += eps;
            let plus = graph.forward(&params, xp.view(), Mode::Infer).unwrap().sum();
            xp[idx] -= 2. * eps;
            let minus = graph.forward(&params, xp.view(), Mode::Infer).unwrap().sum();

            let numeric = (plus - minus) / (2. * eps);
            assert!(
                (numeric - dx[idx]).abs() < 2e-2,
                "{idx:?}: {numeric} vs {}",
                dx[idx]
            );
        }
    }

    #[test]
    fn wrong_input_shape_fails() {
        let mut graph = two_branch_graph();
        let params = params_for(&graph);
        let x = Array4::zeros((1, 2, 5, 6));

        assert!(matches!(
            graph.forward(&params, x.view(), Mode::Infer),
            Err(MlErr::ShapeMismatch { .. })
        ));
    }
}
