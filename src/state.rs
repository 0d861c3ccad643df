use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::real;

/// Scratch space owned by exactly one worker thread.
///
/// The model itself is shared; everything an update writes that is not a
/// weight lives here, so the hot path doesn't allocate.
pub struct State {
    /// Average of the input rows for the current example.
    pub hidden: Vec<real>,
    /// One score per output row, used by softmax and by prediction.
    pub output: Vec<real>,
    /// Gradient with respect to `hidden`, scattered into the input rows.
    pub grad: Vec<real>,
    pub rng: StdRng,
    loss_sum: f64,
    nexamples: u64,
}

impl State {
    pub fn new(hidden_size: usize, output_size: usize, seed: u64) -> Self {
        State {
            hidden: vec![0.0; hidden_size],
            output: vec![0.0; output_size],
            grad: vec![0.0; hidden_size],
            rng: StdRng::seed_from_u64(seed),
            loss_sum: 0.0,
            nexamples: 0,
        }
    }

    /// Average loss over every example recorded so far, or 0 if none.
    pub fn loss(&self) -> real {
        if self.nexamples == 0 {
            0.0
        } else {
            (self.loss_sum / self.nexamples as f64) as real
        }
    }

    pub fn examples(&self) -> u64 {
        self.nexamples
    }

    pub(crate) fn record(&mut self, loss: real) {
        self.loss_sum += loss as f64;
        self.nexamples += 1;
    }

    /// Running `(sum, count)`, for callers that average over a window.
    pub(crate) fn totals(&self) -> (f64, u64) {
        (self.loss_sum, self.nexamples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loss_is_mean_of_recorded_values() {
        let mut state = State::new(4, 3, 0);
        assert_eq!(state.loss(), 0.0);

        let values = [0.5, 2.0, 1.25, 0.0, 3.5];
        for &v in &values {
            state.record(v);
        }
        assert_eq!(state.examples(), 5);
        let mean = values.iter().sum::<real>() / values.len() as real;
        assert!((state.loss() - mean).abs() < 1e-6);
    }

    #[test]
    fn buffers_have_requested_sizes() {
        let state = State::new(7, 11, 3);
        assert_eq!(state.hidden.len(), 7);
        assert_eq!(state.grad.len(), 7);
        assert_eq!(state.output.len(), 11);
    }
}
