use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::ops::Range;
use std::panic;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use rand::Rng;

use crate::{
    loss, norm, normalize, real, Args, Dictionary, Error, Line, LossName, Matrix, Model, ModelName,
    Prediction, Result, State,
};

const PROGRESS_TEMPLATE: &str = "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>9}/{len:9} {msg}";

#[derive(Debug, Clone)]
pub struct TrainReport {
    /// Average loss over the examples seen in each epoch, across all threads.
    pub epoch_losses: Vec<real>,
    /// Average loss over the whole run.
    pub loss: real,
    pub tokens: u64,
    pub elapsed: Duration,
}

/// Precision and recall at k over a labelled corpus.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TestReport {
    pub examples: usize,
    /// Number of gold labels.
    pub labels: usize,
    pub predicted: usize,
    pub correct: usize,
}

impl TestReport {
    pub fn precision(&self) -> f64 {
        if self.predicted == 0 {
            0.0
        } else {
            self.correct as f64 / self.predicted as f64
        }
    }

    pub fn recall(&self) -> f64 {
        if self.labels == 0 {
            0.0
        } else {
            self.correct as f64 / self.labels as f64
        }
    }
}

/// Owns the vocabulary and the model, and runs Hogwild training over them.
pub struct Trainer {
    args: Args,
    dict: Dictionary,
    model: Model,
    /// Tokens processed by all workers; drives the learning-rate schedule.
    token_count: AtomicU64,
}

/// Share `i` of `n` of a corpus `len` lines or bytes long.
fn slice_bounds(len: u64, i: usize, n: usize) -> Range<u64> {
    let (i, n) = (i as u64, n as u64);
    len * i / n..len * (i + 1) / n
}

/// One worker's part of the training data.
enum Shard<'a> {
    Lines(&'a [String]),
    /// The lines of a file that start within a byte range.
    File(&'a Path, Range<u64>),
}

impl Shard<'_> {
    fn for_each_line(&self, mut f: impl FnMut(&str)) -> io::Result<()> {
        match self {
            Shard::Lines(lines) => {
                for text in *lines {
                    f(text.as_str());
                }
                Ok(())
            }
            Shard::File(path, range) => read_byte_range(path, range.clone(), f),
        }
    }
}

/// Call `f` on every line of the file at `path` whose first byte lies in
/// `range`, without its line ending. Every line of the file falls in exactly
/// one of a set of ranges that tile the file.
fn read_byte_range(path: &Path, range: Range<u64>, mut f: impl FnMut(&str)) -> io::Result<()> {
    let mut fi = BufReader::new(File::open(path)?);
    let mut pos = range.start;
    if pos > 0 {
        // Skip the tail of the line the previous range owns.
        fi.seek(SeekFrom::Start(pos - 1))?;
        pos = pos - 1 + fi.read_until(b'\n', &mut vec![])? as u64;
    }
    let mut buf = String::new();
    while pos < range.end {
        buf.clear();
        let n = fi.read_line(&mut buf)?;
        if n == 0 {
            break;
        }
        pos += n as u64;
        let text = buf.strip_suffix('\n').unwrap_or(&buf);
        f(text.strip_suffix('\r').unwrap_or(text));
    }
    Ok(())
}

impl Trainer {
    /// Fresh model for `dict`: input rows uniform in `±1/dim`, output rows zero.
    pub fn new(args: Args, dict: Dictionary) -> Result<Self> {
        args.validate()?;
        let input = Matrix::new(dict.input_rows(), args.dim)?;
        input.uniform(1.0 / args.dim as real, args.seed);
        let output_rows = match args.model {
            ModelName::Supervised => dict.nlabels(),
            ModelName::Cbow | ModelName::SkipGram => dict.nwords(),
        };
        let output = Matrix::new(output_rows, args.dim)?;
        Self::from_parts(args, dict, input, output)
    }

    /// Reassemble a trainer from saved weights.
    pub fn from_parts(args: Args, dict: Dictionary, input: Matrix, output: Matrix) -> Result<Self> {
        let counts = dict.target_counts();
        if input.rows() != dict.input_rows() || output.rows() != counts.len() {
            return Err(Error::Format(format!(
                "matrix shapes {}x{} and {}x{} don't match a dictionary with {} input rows and {} outputs",
                input.rows(),
                input.cols(),
                output.rows(),
                output.cols(),
                dict.input_rows(),
                counts.len(),
            )));
        }
        if input.cols() != args.dim || output.cols() != args.dim {
            return Err(Error::Format(format!(
                "expected {} columns, found {} and {}",
                args.dim,
                input.cols(),
                output.cols()
            )));
        }
        let loss = loss::build(args.loss, output, &counts, args.neg);
        let model = Model::new(input, loss, args.normalize_gradient());
        Ok(Trainer {
            args,
            dict,
            model,
            token_count: AtomicU64::new(0),
        })
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dict
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Train on `corpus`, one example per line, with `args.thread` workers
    /// each making `args.epoch` passes over its own slice.
    pub fn train(&self, corpus: &[String]) -> Result<TrainReport> {
        if corpus.is_empty() {
            return Err(Error::InvalidArgument("training corpus is empty".to_string()));
        }
        info!("training on {} lines", corpus.len());
        self.run(|id, n| {
            let r = slice_bounds(corpus.len() as u64, id, n);
            Shard::Lines(&corpus[r.start as usize..r.end as usize])
        })
    }

    /// Like [`Trainer::train`], streaming the corpus from a file. Each worker
    /// reads its own byte range of the file once per epoch.
    pub fn train_file(&self, path: &Path) -> Result<TrainReport> {
        let len = fs::metadata(path)?.len();
        if len == 0 {
            return Err(Error::InvalidArgument(format!(
                "training file {path:?} is empty"
            )));
        }
        info!("training on {path:?}, {len} bytes");
        self.run(|id, n| Shard::File(path, slice_bounds(len, id, n)))
    }

    fn run<'a>(&self, shard_for: impl Fn(usize, usize) -> Shard<'a>) -> Result<TrainReport> {
        let start = Instant::now();
        self.token_count.store(0, Ordering::Relaxed);
        let total_tokens = self.args.epoch as u64 * self.dict.ntokens();

        let progress = if self.args.verbose > 1 {
            let style = ProgressStyle::with_template(PROGRESS_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            let pb = ProgressBar::new(total_tokens);
            pb.set_style(style);
            pb
        } else {
            ProgressBar::hidden()
        };

        let nthreads = self.args.thread;
        info!(
            "{:?} model, {:?} loss, {} threads",
            self.args.model, self.args.loss, nthreads
        );

        let per_thread = thread::scope(|s| {
            let threads = (0..nthreads)
                .map(|id| {
                    let shard = shard_for(id, nthreads);
                    let progress = &progress;
                    s.spawn(move || self.train_thread(id, shard, total_tokens, progress))
                })
                .collect::<Vec<_>>();
            threads
                .into_iter()
                .map(|t| t.join().unwrap_or_else(|err| panic::resume_unwind(err)))
                .collect::<io::Result<Vec<Vec<(f64, u64)>>>>()
        })?;
        progress.finish_with_message("done");

        let mut epoch_losses = Vec::with_capacity(self.args.epoch);
        let (mut sum, mut count) = (0.0, 0);
        for epoch in 0..self.args.epoch {
            let (s, n) = per_thread
                .iter()
                .map(|epochs| epochs[epoch])
                .fold((0.0, 0), |(s, n), (ds, dn)| (s + ds, n + dn));
            let avg = if n == 0 { 0.0 } else { (s / n as f64) as real };
            debug!("epoch {}: {} examples, loss {:.5}", epoch + 1, n, avg);
            epoch_losses.push(avg);
            sum += s;
            count += n;
        }

        let report = TrainReport {
            epoch_losses,
            loss: if count == 0 { 0.0 } else { (sum / count as f64) as real },
            tokens: self.token_count.load(Ordering::Relaxed),
            elapsed: start.elapsed(),
        };
        info!(
            "trained on {} tokens in {:.2?}, average loss {:.5}",
            report.tokens, report.elapsed, report.loss
        );
        Ok(report)
    }

    /// One worker. Returns the `(loss sum, examples)` seen in each epoch.
    fn train_thread(
        &self,
        id: usize,
        shard: Shard<'_>,
        total_tokens: u64,
        progress: &ProgressBar,
    ) -> io::Result<Vec<(f64, u64)>> {
        match &shard {
            Shard::Lines(lines) => debug!("worker {id} starting on {} lines", lines.len()),
            Shard::File(_, range) => debug!("worker {id} starting on bytes {range:?}"),
        }
        let mut state = self.model.new_state(self.args.seed.wrapping_add(id as u64));
        let mut line = Line::default();
        let mut bow = vec![];
        let mut local_tokens = 0;
        let mut epochs = Vec::with_capacity(self.args.epoch);

        for _ in 0..self.args.epoch {
            let (sum_before, n_before) = state.totals();
            shard.for_each_line(|text| {
                let done = self.token_count.load(Ordering::Relaxed) as f64 / total_tokens as f64;
                let lr = self.args.lr * (1.0 - done).max(0.0) as real;
                local_tokens += self.dict.get_line(text, &mut line, &mut state.rng);
                self.step(&line, lr, true, &mut state, &mut bow);
                if local_tokens > self.args.lr_update_rate {
                    self.token_count.fetch_add(local_tokens, Ordering::Relaxed);
                    progress.inc(local_tokens);
                    local_tokens = 0;
                }
            })?;
            let (sum, n) = state.totals();
            epochs.push((sum - sum_before, n - n_before));
        }
        self.token_count.fetch_add(local_tokens, Ordering::Relaxed);
        progress.inc(local_tokens);

        debug!(
            "worker {id} done: {} examples, loss {:.5}",
            state.examples(),
            state.loss()
        );
        Ok(epochs)
    }

    /// Build the examples for one parsed line and either train on them or
    /// just score them.
    fn step(&self, line: &Line, lr: real, backprop: bool, state: &mut State, bow: &mut Vec<usize>) {
        match self.args.model {
            ModelName::Supervised => {
                if line.labels.is_empty() || line.words.is_empty() {
                    return;
                }
                let target_index = match self.args.loss {
                    LossName::OneVsAll => None,
                    _ => Some(state.rng.gen_range(0..line.labels.len())),
                };
                self.example(&line.words, &line.labels, target_index, lr, backprop, state);
            }
            ModelName::Cbow => {
                for words in line.sentences() {
                    for w in 0..words.len() {
                        let b = state.rng.gen_range(1..=self.args.window);
                        bow.clear();
                        for c in w.saturating_sub(b)..words.len().min(w + b + 1) {
                            if c != w {
                                bow.extend_from_slice(self.dict.subwords(words[c]));
                            }
                        }
                        self.example(bow.as_slice(), words, Some(w), lr, backprop, state);
                    }
                }
            }
            ModelName::SkipGram => {
                for words in line.sentences() {
                    for w in 0..words.len() {
                        let b = state.rng.gen_range(1..=self.args.window);
                        let input = self.dict.subwords(words[w]);
                        for c in w.saturating_sub(b)..words.len().min(w + b + 1) {
                            if c != w {
                                self.example(input, words, Some(c), lr, backprop, state);
                            }
                        }
                    }
                }
            }
        }
    }

    fn example(
        &self,
        input: &[usize],
        targets: &[usize],
        target_index: Option<usize>,
        lr: real,
        backprop: bool,
        state: &mut State,
    ) {
        if backprop {
            self.model.update(input, targets, target_index, lr, state);
        } else {
            self.model.evaluate(input, targets, target_index, state);
        }
    }

    /// Average loss over `corpus` without changing any weights. Examples
    /// are drawn with the same seed as the first training thread.
    pub fn evaluate(&self, corpus: &[String]) -> real {
        let mut state = self.model.new_state(self.args.seed);
        let mut line = Line::default();
        let mut bow = vec![];
        for text in corpus {
            self.dict.get_line(text, &mut line, &mut state.rng);
            self.step(&line, 0.0, false, &mut state, &mut bow);
        }
        state.loss()
    }

    /// Top-`k` predictions for one line of text; see [`Model::predict`].
    pub fn predict_line(&self, text: &str, k: i32, threshold: real) -> Result<Vec<Prediction>> {
        let mut state = self.model.new_state(self.args.seed);
        let mut line = Line::default();
        self.dict.get_line(text, &mut line, &mut state.rng);
        self.model.predict(&line.words, k, threshold, &mut state)
    }

    /// Precision and recall at `k` against the labels on each line.
    pub fn test(&self, corpus: &[String], k: i32, threshold: real) -> Result<TestReport> {
        if self.args.model != ModelName::Supervised {
            return Err(Error::InvalidArgument(
                "only supervised models can be tested".to_string(),
            ));
        }
        let mut state = self.model.new_state(self.args.seed);
        let mut line = Line::default();
        let mut report = TestReport::default();
        for text in corpus {
            self.dict.get_line(text, &mut line, &mut state.rng);
            if line.labels.is_empty() || line.words.is_empty() {
                continue;
            }
            let predictions = self.model.predict(&line.words, k, threshold, &mut state)?;
            report.examples += 1;
            report.labels += line.labels.len();
            report.predicted += predictions.len();
            report.correct += predictions
                .iter()
                .filter(|p| line.labels.contains(&p.label))
                .count();
        }
        Ok(report)
    }

    /// Embedding of a word: the mean of its word row and subword rows.
    /// Unknown words with no subwords get the zero vector.
    pub fn word_vector(&self, word: &str) -> Vec<real> {
        let ids = self.dict.word_ids(word);
        let mut v = vec![0.0; self.args.dim];
        if ids.is_empty() {
            return v;
        }
        for &id in &ids {
            self.model.input().add_row_to(&mut v, id, 1.0);
        }
        let scale = 1.0 / ids.len() as real;
        v.iter_mut().for_each(|x| *x *= scale);
        v
    }

    /// Embedding of a line of text. Classifiers use their hidden vector;
    /// unsupervised models average the normalized word vectors.
    pub fn sentence_vector(&self, text: &str) -> Vec<real> {
        match self.args.model {
            ModelName::Supervised => {
                let mut state = self.model.new_state(self.args.seed);
                let mut line = Line::default();
                self.dict.get_line(text, &mut line, &mut state.rng);
                self.model.sentence_vector(&line.words, &mut state)
            }
            ModelName::Cbow | ModelName::SkipGram => {
                let mut sum = vec![0.0; self.args.dim];
                let mut count = 0;
                for word in text.split_whitespace() {
                    let mut v = self.word_vector(word);
                    if norm(&v) > 0.0 {
                        normalize(&mut v);
                        sum.iter_mut().zip(&v).for_each(|(s, x)| *s += x);
                        count += 1;
                    }
                }
                if count > 0 {
                    sum.iter_mut().for_each(|s| *s /= count as real);
                }
                sum
            }
        }
    }
}
