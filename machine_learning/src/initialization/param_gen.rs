/// A `ParamGen` generates values for the initial state of the model's parameters.
pub trait ParamGen {
    /// Should sample at most `n` parameters.
    ///
    /// # Arguments
    /// * `n` - The upper limit of samples to generate.
    ///
    /// # Returns
    /// An option whether the generator is exhausted.
    fn sample(&mut self, n: usize) -> Option<Vec<f32>>;

    /// Drains the generator into `params`, from the start of the slice.
    ///
    /// # Returns
    /// The amount of parameters written.
    fn fill(&mut self, params: &mut [f32]) -> usize {
        let mut written = 0;

        while written < params.len() {
            let Some(sample) = self.sample(params.len() - written) else {
                break;
            };

            params[written..written + sample.len()].copy_from_slice(&sample);
            written += sample.len();
        }

        written
    }
}
