//! Training configuration.

use serde::{Deserialize, Serialize};

use crate::{real, Error, Result};

/// What the model learns to predict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum ModelName {
    /// Predict a word from the average of its context.
    Cbow,
    /// Predict each context word from the word in the middle.
    #[value(name = "skipgram")]
    SkipGram,
    /// Predict the labels attached to a line of text.
    Supervised,
}

/// Which output layer computes the loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum LossName {
    #[value(name = "hs")]
    HierarchicalSoftmax,
    #[value(name = "ns")]
    NegativeSampling,
    Softmax,
    #[value(name = "ova")]
    OneVsAll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Args {
    pub model: ModelName,
    pub loss: LossName,

    /// Embedding vector length (number of dimensions).
    pub dim: usize,

    /// Max skip length between words.
    pub window: usize,

    /// Number of passes over the training data.
    pub epoch: usize,

    /// Discard words that appear less than this many times.
    pub min_count: u64,

    /// Discard labels that appear less than this many times.
    pub min_count_label: u64,

    /// Number of negatives drawn per positive target.
    pub neg: usize,

    /// Max length of word n-grams (supervised only).
    pub word_ngrams: usize,

    /// Number of hash buckets shared by subwords and word n-grams.
    pub bucket: usize,

    /// Min length of character n-grams.
    pub minn: usize,

    /// Max length of character n-grams; 0 disables subwords.
    pub maxn: usize,

    pub thread: usize,

    /// Starting learning rate.
    pub lr: real,

    /// Number of tokens a worker processes before it publishes its progress.
    pub lr_update_rate: u64,

    /// Subsampling threshold. Words with higher frequency are randomly
    /// down-sampled.
    pub t: f64,

    /// Prefix that marks a token as a label.
    pub label: String,

    pub seed: u64,

    /// 0 = quiet, 1 = summary, 2 = progress bar.
    pub verbose: usize,
}

impl Default for Args {
    fn default() -> Self {
        Args {
            model: ModelName::SkipGram,
            loss: LossName::NegativeSampling,
            dim: 100,
            window: 5,
            epoch: 5,
            min_count: 5,
            min_count_label: 0,
            neg: 5,
            word_ngrams: 1,
            bucket: 2_000_000,
            minn: 3,
            maxn: 6,
            thread: 12,
            lr: 0.05,
            lr_update_rate: 100,
            t: 1e-4,
            label: "__label__".to_string(),
            seed: 0,
            verbose: 2,
        }
    }
}

impl Args {
    /// Defaults for training a classifier: no subwords, no subsampling of
    /// rare words, full softmax over the labels.
    pub fn supervised() -> Self {
        Args {
            model: ModelName::Supervised,
            loss: LossName::Softmax,
            lr: 0.1,
            min_count: 1,
            minn: 0,
            maxn: 0,
            bucket: 0,
            ..Args::default()
        }
    }

    /// Word n-grams need hash buckets even when subwords are off.
    pub fn with_word_ngrams(mut self, n: usize) -> Self {
        self.word_ngrams = n;
        if n > 1 && self.bucket == 0 {
            self.bucket = 2_000_000;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidConfig(msg.to_string()));
        if self.dim == 0 {
            return invalid("dim must be at least 1");
        }
        if self.window == 0 {
            return invalid("window must be at least 1");
        }
        if self.epoch == 0 {
            return invalid("epoch must be at least 1");
        }
        if self.thread == 0 {
            return invalid("thread must be at least 1");
        }
        if self.lr.is_nan() || self.lr <= 0.0 {
            return invalid("lr must be positive");
        }
        if self.maxn > 0 && self.minn > self.maxn {
            return invalid("minn must not exceed maxn");
        }
        if self.maxn > 0 && self.bucket == 0 {
            return invalid("subwords need at least one bucket");
        }
        if self.word_ngrams > 1 && self.bucket == 0 {
            return invalid("word n-grams need at least one bucket");
        }
        if self.label.is_empty() {
            return invalid("label prefix must not be empty");
        }
        Ok(())
    }

    /// Supervised models normalize the input gradient by the number of
    /// input rows.
    pub fn normalize_gradient(&self) -> bool {
        self.model == ModelName::Supervised
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Args::default().validate().unwrap();
        Args::supervised().validate().unwrap();
        Args::supervised().with_word_ngrams(2).validate().unwrap();
    }

    #[test]
    fn rejects_degenerate_settings() {
        let cases: Vec<fn(&mut Args)> = vec![
            |a| a.dim = 0,
            |a| a.window = 0,
            |a| a.epoch = 0,
            |a| a.thread = 0,
            |a| a.lr = 0.0,
            |a| a.lr = real::NAN,
            |a| {
                a.minn = 5;
                a.maxn = 3;
            },
            |a| a.bucket = 0,
            |a| {
                a.word_ngrams = 2;
                a.maxn = 0;
                a.bucket = 0;
            },
        ];
        for tweak in cases {
            let mut args = Args::default();
            tweak(&mut args);
            assert!(matches!(args.validate(), Err(Error::InvalidConfig(_))));
        }
    }

    #[test]
    fn word_ngrams_turn_on_buckets() {
        let args = Args::supervised();
        assert_eq!(args.bucket, 0);
        assert_eq!(args.with_word_ngrams(2).bucket, 2_000_000);
    }
}
