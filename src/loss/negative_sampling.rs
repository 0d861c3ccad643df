use std::iter;

use rand::Rng;

use super::{single_target, BinaryLogistic, Loss};
use crate::{real, Matrix, State};

const NEGATIVE_TABLE_SIZE: usize = 10_000_000;

/// Contrasts the true target against `neg` ids drawn from the unigram
/// distribution raised to the 3/4 power.
pub struct NegativeSamplingLoss {
    logistic: BinaryLogistic,
    neg: usize,
    /// Output ids, each repeated in proportion to `count^0.75`. Sorted.
    negatives: Vec<u32>,
}

impl NegativeSamplingLoss {
    pub fn new(wo: Matrix, neg: usize, target_counts: &[u64]) -> Self {
        NegativeSamplingLoss {
            logistic: BinaryLogistic::new(wo),
            neg,
            negatives: unigram_table(target_counts, NEGATIVE_TABLE_SIZE),
        }
    }

    /// False when every entry of the table is the same id, so that no valid
    /// negative exists for it.
    fn has_alternatives(&self) -> bool {
        self.negatives.first() != self.negatives.last()
    }

    /// Draw a negative for `target`, redrawing until it differs.
    fn get_negative(&self, target: usize, rng: &mut impl Rng) -> usize {
        loop {
            let negative = self.negatives[rng.gen_range(0..self.negatives.len())] as usize;
            if negative != target {
                return negative;
            }
        }
    }
}

/// Each id gets `ceil(size * w / total)` slots, so even the rarest id can be
/// drawn. The table may end up slightly longer than `size`.
fn unigram_table(counts: &[u64], size: usize) -> Vec<u32> {
    let power: f64 = 0.75;
    let weight = |count: u64| (count.max(1) as f64).powf(power);
    let total = counts.iter().map(|&c| weight(c)).sum::<f64>();

    let mut table = Vec::with_capacity(size + counts.len());
    for (id, &count) in counts.iter().enumerate() {
        let slots = (weight(count) * size as f64 / total).ceil() as usize;
        table.extend(iter::repeat(id as u32).take(slots.max(1)));
    }
    table
}

impl Loss for NegativeSamplingLoss {
    fn forward(
        &self,
        targets: &[usize],
        target_index: Option<usize>,
        state: &mut State,
        lr: real,
        backprop: bool,
    ) -> real {
        let target = single_target(targets, target_index, "negative sampling");
        let mut loss = self.logistic.update(target, true, state, lr, backprop);
        if self.has_alternatives() {
            for _ in 0..self.neg {
                let negative = self.get_negative(target, &mut state.rng);
                loss += self.logistic.update(negative, false, state, lr, backprop);
            }
        }
        loss
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
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn loss(counts: &[u64]) -> NegativeSamplingLoss {
        NegativeSamplingLoss::new(Matrix::new(counts.len(), 4).unwrap(), 5, counts)
    }

    #[test]
    fn never_draws_the_positive_target() {
        let ns = loss(&[50, 20, 10, 5, 1]);
        let mut rng = StdRng::seed_from_u64(42);
        for target in 0..5 {
            for _ in 0..2000 {
                assert_ne!(ns.get_negative(target, &mut rng), target);
            }
        }
    }

    #[test]
    fn draws_are_deterministic_for_a_seed() {
        let ns = loss(&[50, 20, 10, 5, 1]);
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..100).map(|_| ns.get_negative(0, &mut rng)).collect::<Vec<_>>()
        };
        assert_eq!(draw(9), draw(9));
        assert_ne!(draw(9), draw(10));
    }

    #[test]
    fn table_follows_smoothed_unigram_distribution() {
        let counts = [1000, 100, 10];
        let table = unigram_table(&counts, 100_000);
        let total: f64 = counts.iter().map(|&c| (c as f64).powf(0.75)).sum();
        for (id, &c) in counts.iter().enumerate() {
            let expected = (c as f64).powf(0.75) / total;
            let observed =
                table.iter().filter(|&&x| x as usize == id).count() as f64 / table.len() as f64;
            assert!((expected - observed).abs() < 0.001, "id {id}: {observed} vs {expected}");
        }
    }

    #[test]
    fn rare_ids_still_get_drawn() {
        let counts = [1_000_000_000, 1];
        let table = unigram_table(&counts, 1000);
        assert_eq!(table.iter().filter(|&&x| x == 1).count(), 1);
        assert!(table.windows(2).all(|w| w[0] <= w[1]));

        let ns = loss(&counts);
        assert!(ns.has_alternatives());
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(ns.get_negative(0, &mut rng), 1);
    }

    #[test]
    fn single_output_has_no_negatives() {
        let ns = loss(&[3]);
        assert!(!ns.has_alternatives());
        let mut state = State::new(4, 1, 0);
        state.hidden.fill(0.5);
        let value = ns.forward(&[0], Some(0), &mut state, 0.1, true);
        assert!(value.is_finite());
    }

    #[test]
    fn training_step_raises_positive_score() {
        let ns = loss(&[5, 5, 5, 5]);
        let mut state = State::new(4, 4, 1);
        state.hidden.copy_from_slice(&[0.5, -0.25, 0.75, 0.1]);
        let before = ns.output().dot_row(&state.hidden, 2);
        ns.forward(&[2], Some(0), &mut state, 0.5, true);
        let after = ns.output().dot_row(&state.hidden, 2);
        assert!(after > before);
        assert!(state.grad.iter().all(|g| g.is_finite()));
    }
}
