use super::{BinaryLogistic, Loss};
use crate::{real, Matrix, State};

/// Every output row is an independent binary classifier. An example may
/// carry several labels; they are all positives at once.
pub struct OneVsAllLoss {
    logistic: BinaryLogistic,
}

impl OneVsAllLoss {
    pub fn new(wo: Matrix) -> Self {
        OneVsAllLoss {
            logistic: BinaryLogistic::new(wo),
        }
    }
}

impl Loss for OneVsAllLoss {
    /// `target_index` is ignored: every id in `targets` is positive.
    fn forward(
        &self,
        targets: &[usize],
        _target_index: Option<usize>,
        state: &mut State,
        lr: real,
        backprop: bool,
    ) -> real {
        (0..self.logistic.wo.rows())
            .map(|i| {
                let is_match = targets.contains(&i);
                self.logistic.update(i, is_match, state, lr, backprop)
            })
            .sum()
    }

    fn compute_output(&self, state: &mut State) {
        self.logistic.compute_output(state);
    }

    fn output(&self) -> &Matrix {
        &self.logistic.wo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_label_in_the_target_set_becomes_likely() {
        let loss = OneVsAllLoss::new(Matrix::new(4, 3).unwrap());
        let mut state = State::new(3, 4, 0);
        state.hidden.copy_from_slice(&[0.6, -0.3, 0.9]);

        let before = loss.forward(&[1, 3], None, &mut state, 0.0, false);
        for _ in 0..30 {
            loss.forward(&[1, 3], None, &mut state, 0.3, true);
        }
        let after = loss.forward(&[1, 3], None, &mut state, 0.0, false);
        assert!(after < before);

        let predictions = loss.predict(4, 0.5, &mut state);
        let mut labels: Vec<usize> = predictions.iter().map(|p| p.label).collect();
        labels.sort();
        assert_eq!(labels, [1, 3]);
    }
}
