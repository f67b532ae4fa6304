#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Sigmoid;

impl Sigmoid {
    pub fn new() -> Self {
        Self
    }

    pub fn f(&self, z: f32) -> f32 {
        1. / (1. + (-z).exp())
    }

    pub fn df(&self, z: f32) -> f32 {
        let s = self.f(z);
        s * (1. - s)
    }
}
