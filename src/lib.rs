//! Online training of word, subword and sentence embeddings and of linear
//! text classifiers.
//!
//! Two weight matrices are shared by every worker thread and updated without
//! locks; each worker keeps its own scratch [`State`]. The output layer is one
//! of four interchangeable [`loss`] strategies.

#[allow(non_camel_case_types)]
pub type real = f32; // Precision of float numbers

mod error;
pub use error::{Error, Result};

pub mod args;
pub use args::{Args, LossName, ModelName};

pub mod matrix;
pub use matrix::Matrix;

mod tables;

pub mod loss;
pub use loss::Loss;

mod state;
pub use state::State;

mod model;
pub use model::{Model, Prediction, UNLIMITED_PREDICTIONS};

pub mod dictionary;
pub use dictionary::{Dictionary, Line};

mod trainer;
pub use trainer::{TestReport, TrainReport, Trainer};

pub mod snapshot;

pub fn norm(v: &[real]) -> real {
    v.iter().copied().map(|e| e * e).sum::<real>().sqrt()
}

/// Scale `v` to unit length. Zero vectors are left alone.
pub fn normalize(v: &mut [real]) {
    let len = norm(v);
    if len > 0.0 {
        for e in v {
            *e /= len;
        }
    }
}
