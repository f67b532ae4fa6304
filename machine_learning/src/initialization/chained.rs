use super::ParamGen;

/// A parameter generator that delegates the generation to a chain of parameter generators.
///
/// The graph builds one of these with a kernel and a bias generator per convolution, each
/// knowing how many parameters it has to produce, so that a single pass fills the whole
/// flat parameter buffer in layout order.
pub struct ChainedParamGen {
    param_gens: Vec<Box<dyn ParamGen>>,
    curr: usize,
}

impl ChainedParamGen {
    /// Creates a new `ChainedParamGen` parameter generator.
    ///
    /// # Arguments
    /// * `param_gens` - A vec of potentially different parameter generators.
    pub fn new(param_gens: Vec<Box<dyn ParamGen>>) -> Self {
        Self {
            param_gens,
            curr: 0,
        }
    }
}

impl ParamGen for ChainedParamGen {
    fn sample(&mut self, n: usize) -> Option<Vec<f32>> {
        if self.curr == self.param_gens.len() {
            return None;
        }

        match self.param_gens[self.curr].sample(n) {
            Some(sample) if sample.len() == n => Some(sample),
            Some(mut sample) => {
                self.curr += 1;

                if let Some(next_sample) = self.sample(n - sample.len()) {
                    sample.extend(next_sample);
                }

                Some(sample)
            }
            None => {
                self.curr += 1;
                self.sample(n)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{super::ConstParamGen, *};

    #[test]
    fn empty() {
        let mut param_gen = ChainedParamGen::new(vec![]);
        assert!(param_gen.sample(1).is_none());
    }

    #[test]
    fn crosses_generator_boundaries() {
        let mut param_gen = ChainedParamGen::new(vec![
            Box::new(ConstParamGen::new(1., 2)),
            Box::new(ConstParamGen::zeros(0)),
            Box::new(ConstParamGen::new(3., 2)),
        ]);

        assert_eq!(param_gen.sample(3).unwrap(), [1., 1., 3.]);
        assert_eq!(param_gen.sample(3).unwrap(), [3.]);
        assert!(param_gen.sample(1).is_none());
    }
}
