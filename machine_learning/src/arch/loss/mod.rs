mod loss_fn;
mod sigmoid_cross_entropy;
mod softmax_cross_entropy;

pub(crate) use loss_fn::check_shapes;
pub use loss_fn::LossFn;
pub use sigmoid_cross_entropy::SigmoidCrossEntropy;
pub use softmax_cross_entropy::{SoftmaxCrossEntropy, softmax};
