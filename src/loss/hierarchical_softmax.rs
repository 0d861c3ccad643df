use std::cmp::Reverse;

use super::{single_target, BinaryLogistic, Loss, TopK};
use crate::tables::std_log;
use crate::{real, Matrix, Prediction, State};

/// Organizes the output ids as leaves of a Huffman tree. Each internal node
/// is a binary classifier (one output row) choosing between its children, so
/// an update costs O(depth) instead of O(outputs).
pub struct HierarchicalSoftmaxLoss {
    logistic: BinaryLogistic,
    tree: Tree,
}

struct Tree {
    /// `paths[id]` is the output row of every internal node from the root
    /// down to the leaf for `id`.
    paths: Vec<Vec<usize>>,
    /// `codes[id][d]` is true if the path turns right below `paths[id][d]`.
    codes: Vec<Vec<bool>>,
    /// Tree slots `0..n` are leaves, `n..2n-1` internal nodes; the root is
    /// the last slot. `children[a]` are the slots under internal slot `n + a`.
    children: Vec<(usize, usize)>,
    /// Output id at each leaf slot.
    leaves: Vec<usize>,
}

impl Tree {
    fn root(&self) -> usize {
        2 * self.leaves.len() - 2
    }
}

/// Take the cheaper of the next unused leaf and the next unused internal
/// node. Leaves are sorted by decreasing count, so the cheapest remaining
/// leaf is the one just below `pos1`.
fn pop_min(count: &[u64], pos1: &mut usize, pos2: &mut usize) -> usize {
    if *pos1 > 0 && count[*pos1 - 1] < count[*pos2] {
        *pos1 -= 1;
        *pos1
    } else {
        *pos2 += 1;
        *pos2 - 1
    }
}

// Create binary Huffman tree using the target counts.
// Frequent ids will have short unique binary codes.
fn build_tree(counts: &[u64]) -> Tree {
    let n = counts.len();
    assert!(n > 0, "hierarchical softmax needs at least one output");

    let mut leaves: Vec<usize> = (0..n).collect();
    leaves.sort_by_key(|&id| Reverse(counts[id]));

    let mut count = vec![u64::MAX; 2 * n];
    for (slot, &id) in leaves.iter().enumerate() {
        count[slot] = counts[id];
    }
    let mut parent = vec![0usize; 2 * n];
    let mut binary = vec![false; 2 * n]; // which child a node is of its parent
    let mut children = Vec::with_capacity(n - 1);

    let mut pos1 = n;
    let mut pos2 = n;
    // Following algorithm constructs the Huffman tree by adding one node at a time
    for a in 0..(n - 1) {
        let min1 = pop_min(&count, &mut pos1, &mut pos2);
        let min2 = pop_min(&count, &mut pos1, &mut pos2);
        count[n + a] = count[min1].saturating_add(count[min2]);
        parent[min1] = n + a;
        parent[min2] = n + a;
        binary[min2] = true;
        children.push((min1, min2));
    }

    let root = 2 * n - 2;
    let mut paths = vec![vec![]; n];
    let mut codes = vec![vec![]; n];
    for (slot, &id) in leaves.iter().enumerate() {
        let mut path = vec![];
        let mut code = vec![];
        let mut b = slot;
        while b != root {
            code.push(binary[b]);
            b = parent[b];
            path.push(b - n);
        }
        path.reverse();
        code.reverse();
        paths[id] = path;
        codes[id] = code;
    }

    Tree {
        paths,
        codes,
        children,
        leaves,
    }
}

impl HierarchicalSoftmaxLoss {
    pub fn new(wo: Matrix, target_counts: &[u64]) -> Self {
        HierarchicalSoftmaxLoss {
            logistic: BinaryLogistic::new(wo),
            tree: build_tree(target_counts),
        }
    }

    /// Root-to-leaf output rows and turn directions for output id `id`.
    pub fn path(&self, id: usize) -> (&[usize], &[bool]) {
        (&self.tree.paths[id], &self.tree.codes[id])
    }

    fn dfs(&self, top: &mut TopK, min_score: real, slot: usize, score: real, hidden: &[real]) {
        if score < min_score {
            return;
        }
        if top.is_full() && top.worst().map_or(false, |worst| score < worst) {
            return;
        }

        let n = self.tree.leaves.len();
        if slot < n {
            top.push(score, self.tree.leaves[slot]);
            return;
        }

        let node = slot - n;
        let (left, right) = self.tree.children[node];
        let f = self
            .logistic
            .tables
            .sigmoid(self.logistic.wo.dot_row(hidden, node));
        self.dfs(top, min_score, left, score + std_log(1.0 - f), hidden);
        self.dfs(top, min_score, right, score + std_log(f), hidden);
    }
}

impl Loss for HierarchicalSoftmaxLoss {
    fn forward(
        &self,
        targets: &[usize],
        target_index: Option<usize>,
        state: &mut State,
        lr: real,
        backprop: bool,
    ) -> real {
        let target = single_target(targets, target_index, "hierarchical softmax");
        let (path, code) = self.path(target);
        path.iter()
            .zip(code)
            .map(|(&node, &label)| self.logistic.update(node, label, state, lr, backprop))
            .sum()
    }

    fn compute_output(&self, state: &mut State) {
        self.logistic.compute_output(state);
    }

    fn predict(&self, k: usize, threshold: real, state: &mut State) -> Vec<Prediction> {
        let min_score = if threshold > 0.0 {
            std_log(threshold)
        } else {
            real::NEG_INFINITY
        };
        let mut top = TopK::new(k);
        self.dfs(&mut top, min_score, self.tree.root(), 0.0, &state.hidden);
        top.into_predictions()
    }

    fn output(&self) -> &Matrix {
        &self.logistic.wo
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BinaryHeap, HashSet};

    use super::*;

    const COUNTS: [u64; 8] = [40, 3, 25, 7, 7, 100, 1, 12];

    /// Sum of depth * count over all leaves of an optimal prefix code.
    fn huffman_cost(counts: &[u64]) -> u64 {
        let mut heap: BinaryHeap<Reverse<u64>> = counts.iter().map(|&c| Reverse(c)).collect();
        let mut cost = 0;
        while heap.len() > 1 {
            let Reverse(a) = heap.pop().unwrap();
            let Reverse(b) = heap.pop().unwrap();
            cost += a + b;
            heap.push(Reverse(a + b));
        }
        cost
    }

    #[test]
    fn paths_are_huffman_optimal() {
        let tree = build_tree(&COUNTS);
        let weighted: u64 = COUNTS
            .iter()
            .zip(&tree.paths)
            .map(|(&c, path)| c * path.len() as u64)
            .sum();
        assert_eq!(weighted, huffman_cost(&COUNTS));
    }

    #[test]
    fn average_depth_is_within_one_bit_of_entropy() {
        let tree = build_tree(&COUNTS);
        let total: u64 = COUNTS.iter().sum();
        let mut entropy = 0.0;
        let mut average = 0.0;
        for (&c, path) in COUNTS.iter().zip(&tree.paths) {
            let p = c as f64 / total as f64;
            entropy -= p * p.log2();
            average += p * path.len() as f64;
        }
        assert!(entropy <= average && average < entropy + 1.0);
    }

    #[test]
    fn codes_form_a_prefix_free_tree() {
        let tree = build_tree(&COUNTS);
        let n = COUNTS.len();
        let mut seen = HashSet::new();
        for (path, code) in tree.paths.iter().zip(&tree.codes) {
            assert_eq!(path.len(), code.len());
            assert_eq!(path[0], n - 2, "every path starts at the root");
            assert!(seen.insert(code.clone()));
        }
        // A more frequent id never sits deeper than a rarer one.
        assert!(tree.paths[5].len() <= tree.paths[6].len());
        assert!(tree.paths[0].len() <= tree.paths[1].len());
    }

    #[test]
    fn path_length_is_leaf_depth() {
        let tree = build_tree(&COUNTS);
        let n = COUNTS.len();
        for (id, path) in tree.paths.iter().enumerate() {
            // Walk down from the root following the codes; we must end at `id`.
            let mut slot = tree.root();
            for (d, &right) in tree.codes[id].iter().enumerate() {
                assert_eq!(slot - n, path[d]);
                let (l, r) = tree.children[slot - n];
                slot = if right { r } else { l };
            }
            assert!(slot < n);
            assert_eq!(tree.leaves[slot], id);
        }
    }

    #[test]
    fn single_output_has_empty_path() {
        let hs = HierarchicalSoftmaxLoss::new(Matrix::new(1, 3).unwrap(), &[4]);
        assert!(hs.path(0).0.is_empty());
        let mut state = State::new(3, 1, 0);
        assert_eq!(hs.forward(&[0], Some(0), &mut state, 0.1, true), 0.0);
        let predictions = hs.predict(1, 0.0, &mut state);
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].label, 0);
    }

    #[test]
    fn predictions_cover_every_leaf_and_sum_to_one() {
        let wo = Matrix::new(COUNTS.len(), 4).unwrap();
        wo.uniform(1.0, 3);
        let hs = HierarchicalSoftmaxLoss::new(wo, &COUNTS);
        let mut state = State::new(4, COUNTS.len(), 0);
        state.hidden.copy_from_slice(&[0.3, -0.2, 0.8, 0.1]);

        let predictions = hs.predict(COUNTS.len(), 0.0, &mut state);
        assert_eq!(predictions.len(), COUNTS.len());
        assert!(predictions.windows(2).all(|w| w[0].score >= w[1].score));
        let total: real = predictions.iter().map(|p| p.score.exp()).sum();
        assert!((total - 1.0).abs() < 0.01, "total probability {total}");

        let best = hs.predict(2, 0.0, &mut state);
        assert_eq!(best, predictions[..2]);
    }

    #[test]
    fn training_makes_target_more_likely() {
        let hs = HierarchicalSoftmaxLoss::new(Matrix::new(COUNTS.len(), 4).unwrap(), &COUNTS);
        let mut state = State::new(4, COUNTS.len(), 0);
        state.hidden.copy_from_slice(&[0.5, -0.5, 0.25, 1.0]);
        let before = hs.forward(&[3], Some(0), &mut state, 0.0, false);
        for _ in 0..20 {
            hs.forward(&[3], Some(0), &mut state, 0.2, true);
        }
        let after = hs.forward(&[3], Some(0), &mut state, 0.0, false);
        assert!(after < before, "{after} >= {before}");
    }
}
