mod act_fn;
mod elu;
mod relu;
mod sigmoid;

pub use act_fn::ActFn;
pub use elu::Elu;
pub use relu::Relu;
pub use sigmoid::Sigmoid;
