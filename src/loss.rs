//! Output layers.
//!
//! A [`Loss`] owns the output matrix. Given the hidden vector in a
//! [`State`], it computes a scalar loss and, when asked to backpropagate,
//! updates its own rows and accumulates the gradient with respect to the
//! hidden vector into `state.grad`.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;

use crate::tables::{std_log, Tables};
use crate::{real, LossName, Matrix, Prediction, State};

mod hierarchical_softmax;
mod negative_sampling;
mod one_vs_all;
mod softmax;

pub use hierarchical_softmax::HierarchicalSoftmaxLoss;
pub use negative_sampling::NegativeSamplingLoss;
pub use one_vs_all::OneVsAllLoss;
pub use softmax::{softmax_in_place, SoftmaxLoss};

pub trait Loss: Send + Sync {
    /// Compute the loss for one example.
    ///
    /// `targets[target_index]` is the positive target. `target_index` is
    /// `None` when every entry of `targets` is positive; only one-vs-all
    /// accepts that, the other losses panic.
    ///
    /// With `backprop`, output rows are updated in place and the gradient for
    /// `state.hidden` is added to `state.grad`.
    fn forward(
        &self,
        targets: &[usize],
        target_index: Option<usize>,
        state: &mut State,
        lr: real,
        backprop: bool,
    ) -> real;

    /// Fill `state.output` with a score in `0..=1` for every output row.
    fn compute_output(&self, state: &mut State);

    /// The `k` most likely output ids with probability at least `threshold`,
    /// best first. `Prediction::score` is a log-probability.
    fn predict(&self, k: usize, threshold: real, state: &mut State) -> Vec<Prediction> {
        self.compute_output(state);
        let mut top = TopK::new(k);
        for (label, &p) in state.output.iter().enumerate() {
            if p < threshold {
                continue;
            }
            top.push(std_log(p), label);
        }
        top.into_predictions()
    }

    fn output(&self) -> &Matrix;
}

/// Build the output layer named by `name`. `target_counts[i]` is the
/// frequency of output id `i`; it shapes the hierarchical-softmax tree and
/// the negative-sampling distribution.
pub fn build(name: LossName, output: Matrix, target_counts: &[u64], neg: usize) -> Box<dyn Loss> {
    assert_eq!(output.rows(), target_counts.len());
    match name {
        LossName::NegativeSampling => {
            Box::new(NegativeSamplingLoss::new(output, neg, target_counts))
        }
        LossName::HierarchicalSoftmax => {
            Box::new(HierarchicalSoftmaxLoss::new(output, target_counts))
        }
        LossName::Softmax => Box::new(SoftmaxLoss::new(output)),
        LossName::OneVsAll => Box::new(OneVsAllLoss::new(output)),
    }
}

/// The positive target for a loss that trains on exactly one target.
fn single_target(targets: &[usize], target_index: Option<usize>, loss: &str) -> usize {
    match target_index {
        Some(i) => {
            assert!(
                i < targets.len(),
                "target index {i} out of range for {} targets",
                targets.len()
            );
            targets[i]
        }
        None => panic!("{loss} loss trains on a single target; only one-vs-all accepts all labels"),
    }
}

/// Output rows trained as independent binary classifiers.
struct BinaryLogistic {
    wo: Matrix,
    tables: Tables,
}

impl BinaryLogistic {
    fn new(wo: Matrix) -> Self {
        BinaryLogistic {
            wo,
            tables: Tables::new(),
        }
    }

    /// One logistic-regression step on output row `target`.
    fn update(&self, target: usize, label: bool, state: &mut State, lr: real, backprop: bool) -> real {
        let score = self.tables.sigmoid(self.wo.dot_row(&state.hidden, target));
        if backprop {
            let alpha = lr * (label as i32 as real - score);
            self.wo.add_row_to(&mut state.grad, target, alpha);
            self.wo.add_vector_to_row(&state.hidden, target, alpha);
        }
        if label {
            -self.tables.log(score)
        } else {
            -self.tables.log(1.0 - score)
        }
    }

    fn compute_output(&self, state: &mut State) {
        self.wo.mul_vector(&state.hidden, &mut state.output);
        for x in &mut state.output {
            *x = self.tables.sigmoid(*x);
        }
    }
}

/// Bounded min-heap that keeps the `k` best-scoring ids.
///
/// Equal scores prefer the lower id.
pub(crate) struct TopK {
    k: usize,
    heap: BinaryHeap<Reverse<(OrderedFloat<real>, Reverse<usize>)>>,
}

impl TopK {
    pub fn new(k: usize) -> Self {
        TopK {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.k
    }

    /// Lowest score currently kept.
    pub fn worst(&self) -> Option<real> {
        self.heap.peek().map(|Reverse((score, _))| score.into_inner())
    }

    pub fn push(&mut self, score: real, label: usize) {
        if self.is_full() && self.worst().map_or(false, |worst| score < worst) {
            return;
        }
        self.heap.push(Reverse((OrderedFloat(score), Reverse(label))));
        if self.heap.len() > self.k {
            self.heap.pop();
        }
    }

    pub fn into_predictions(self) -> Vec<Prediction> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse((score, Reverse(label)))| Prediction {
                label,
                score: score.into_inner(),
            })
            .collect()
    }
}
