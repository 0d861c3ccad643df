use crate::{real, Error, Loss, Matrix, Result, State};

/// Pass as `k` to [`Model::predict`] to rank every output id.
pub const UNLIMITED_PREDICTIONS: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Output id: a label id for classifiers, a word id otherwise.
    pub label: usize,
    /// Log-probability.
    pub score: real,
}

impl Prediction {
    pub fn probability(&self) -> real {
        self.score.exp()
    }
}

/// Input matrix plus output layer.
///
/// `Model` has no mutable fields of its own: methods take `&self` and write
/// only to the shared weight matrices and the caller's [`State`], so many
/// threads can train the same model at once.
pub struct Model {
    input: Matrix,
    loss: Box<dyn Loss>,
    normalize_gradient: bool,
}

impl Model {
    pub fn new(input: Matrix, loss: Box<dyn Loss>, normalize_gradient: bool) -> Self {
        assert_eq!(input.cols(), loss.output().cols());
        Model {
            input,
            loss,
            normalize_gradient,
        }
    }

    pub fn input(&self) -> &Matrix {
        &self.input
    }

    pub fn output(&self) -> &Matrix {
        self.loss.output()
    }

    /// Embedding dimension.
    pub fn dim(&self) -> usize {
        self.input.cols()
    }

    pub fn output_size(&self) -> usize {
        self.loss.output().rows()
    }

    /// Fresh scratch space sized for this model.
    pub fn new_state(&self, seed: u64) -> State {
        State::new(self.dim(), self.output_size(), seed)
    }

    /// Set `state.hidden` to the mean of the input rows named by `input`.
    pub fn compute_hidden(&self, input: &[usize], state: &mut State) {
        let hidden = &mut state.hidden;
        hidden.fill(0.0);
        if input.is_empty() {
            return;
        }
        for &row in input {
            self.input.add_row_to(hidden, row, 1.0);
        }
        let scale = 1.0 / input.len() as real;
        for x in hidden.iter_mut() {
            *x *= scale;
        }
    }

    /// One SGD step: predict `targets[target_index]` (or all of `targets`,
    /// for one-vs-all) from the average of the `input` rows.
    ///
    /// Does nothing if `input` is empty; subsampling can remove every word
    /// from a line.
    pub fn update(
        &self,
        input: &[usize],
        targets: &[usize],
        target_index: Option<usize>,
        lr: real,
        state: &mut State,
    ) {
        if input.is_empty() {
            return;
        }
        self.compute_hidden(input, state);

        state.grad.fill(0.0);
        let loss = self.loss.forward(targets, target_index, state, lr, true);
        state.record(loss);

        if self.normalize_gradient {
            let scale = 1.0 / input.len() as real;
            for g in &mut state.grad {
                *g *= scale;
            }
        }
        for &row in input {
            self.input.add_vector_to_row(&state.grad, row, 1.0);
        }
    }

    /// Like `update`, but only records the loss; no weights change.
    pub fn evaluate(
        &self,
        input: &[usize],
        targets: &[usize],
        target_index: Option<usize>,
        state: &mut State,
    ) {
        if input.is_empty() {
            return;
        }
        self.compute_hidden(input, state);
        let loss = self.loss.forward(targets, target_index, state, 0.0, false);
        state.record(loss);
    }

    /// The `k` most likely outputs for `input` with probability at least
    /// `threshold`, best first. `k` is either positive or
    /// [`UNLIMITED_PREDICTIONS`].
    pub fn predict(
        &self,
        input: &[usize],
        k: i32,
        threshold: real,
        state: &mut State,
    ) -> Result<Vec<Prediction>> {
        let k = if k == UNLIMITED_PREDICTIONS {
            self.output_size()
        } else if k <= 0 {
            return Err(Error::InvalidArgument(format!(
                "k needs to be 1 or higher, got {k}"
            )));
        } else {
            k as usize
        };
        self.compute_hidden(input, state);
        Ok(self.loss.predict(k, threshold, state))
    }

    /// Averaged input vector, e.g. a sentence embedding.
    pub fn sentence_vector(&self, input: &[usize], state: &mut State) -> Vec<real> {
        self.compute_hidden(input, state);
        state.hidden.clone()
    }
}
