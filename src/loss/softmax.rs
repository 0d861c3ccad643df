use super::{single_target, Loss};
use crate::tables::Tables;
use crate::{real, Matrix, State};

/// Exact softmax over every output row. O(outputs) per example, so it's
/// meant for small label sets.
pub struct SoftmaxLoss {
    wo: Matrix,
    tables: Tables,
}

/// Replace logits with probabilities. The max logit is subtracted first, so
/// large logits don't overflow and adding a constant changes nothing.
pub fn softmax_in_place(values: &mut [real]) {
    let max = values.iter().copied().fold(real::NEG_INFINITY, real::max);
    let mut z = 0.0;
    for x in values.iter_mut() {
        *x = (*x - max).exp();
        z += *x;
    }
    for x in values.iter_mut() {
        *x /= z;
    }
}

impl SoftmaxLoss {
    pub fn new(wo: Matrix) -> Self {
        SoftmaxLoss {
            wo,
            tables: Tables::new(),
        }
    }
}

impl Loss for SoftmaxLoss {
    fn forward(
        &self,
        targets: &[usize],
        target_index: Option<usize>,
        state: &mut State,
        lr: real,
        backprop: bool,
    ) -> real {
        self.compute_output(state);
        let target = single_target(targets, target_index, "softmax");

        if backprop {
            for i in 0..self.wo.rows() {
                let label = if i == target { 1.0 } else { 0.0 };
                let alpha = lr * (label - state.output[i]);
                self.wo.add_row_to(&mut state.grad, i, alpha);
                self.wo.add_vector_to_row(&state.hidden, i, alpha);
            }
        }
        -self.tables.log(state.output[target])
    }

    fn compute_output(&self, state: &mut State) {
        self.wo.mul_vector(&state.hidden, &mut state.output);
        softmax_in_place(&mut state.output);
    }

    fn output(&self) -> &Matrix {
        &self.wo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_is_a_distribution() {
        let mut v = vec![1.0, -2.0, 0.5, 3.0, 0.0];
        softmax_in_place(&mut v);
        let total: real = v.iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!(v.iter().all(|&p| p > 0.0 && p < 1.0));
        assert!(v[3] > v[0] && v[0] > v[2] && v[2] > v[4] && v[4] > v[1]);
    }

    #[test]
    fn shifting_logits_changes_nothing() {
        let logits = [0.3, -1.2, 2.5, 0.0];
        let mut a = logits.to_vec();
        let mut b: Vec<real> = logits.iter().map(|x| x + 40.0).collect();
        softmax_in_place(&mut a);
        softmax_in_place(&mut b);
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn huge_logits_stay_finite() {
        let mut v = vec![1000.0, 999.0, -1000.0];
        softmax_in_place(&mut v);
        assert!(v.iter().all(|p| p.is_finite()));
        assert!((v.iter().sum::<real>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn gradient_step_lowers_loss() {
        let wo = Matrix::new(3, 2).unwrap();
        wo.uniform(0.5, 11);
        let loss = SoftmaxLoss::new(wo);
        let mut state = State::new(2, 3, 0);
        state.hidden.copy_from_slice(&[1.0, -0.5]);

        let before = loss.forward(&[0, 2], Some(1), &mut state, 0.0, false);
        assert!((state.output.iter().sum::<real>() - 1.0).abs() < 1e-5);
        loss.forward(&[0, 2], Some(1), &mut state, 0.5, true);
        let after = loss.forward(&[0, 2], Some(1), &mut state, 0.0, false);
        assert!(after < before, "{after} >= {before}");
        assert!(state.grad.iter().all(|g| g.is_finite()));
        assert!(state.grad.iter().any(|&g| g != 0.0));
    }
}
