use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use textvec::{
    real, snapshot, Args, Dictionary, LossName, ModelName, Prediction, Trainer,
};

#[derive(Parser)]
#[command(about = "Word vectors and text classification", long_about = None, version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a text classifier
    Supervised(TrainOptions),
    /// Train word vectors with the continuous bag of words model
    Cbow(TrainOptions),
    /// Train word vectors with the skip-gram model
    Skipgram(TrainOptions),
    /// Print the most likely labels for each line of standard input
    Predict {
        /// Model file written by a training command
        #[arg(value_name = "MODEL")]
        model: PathBuf,
        /// Number of labels to print per line; -1 for all
        #[arg(default_value_t = 1, allow_negative_numbers = true)]
        k: i32,
        /// Skip labels with probability below this
        #[arg(long, default_value_t = 0.0)]
        threshold: real,
        /// Also print each label's probability
        #[arg(long)]
        prob: bool,
    },
    /// Compute precision and recall at k on a labelled file
    Test {
        #[arg(value_name = "MODEL")]
        model: PathBuf,
        #[arg(value_name = "FILE")]
        test_file: PathBuf,
        #[arg(default_value_t = 1, allow_negative_numbers = true)]
        k: i32,
        #[arg(long, default_value_t = 0.0)]
        threshold: real,
    },
    /// Print one embedding per line of standard input
    PrintSentenceVectors {
        #[arg(value_name = "MODEL")]
        model: PathBuf,
    },
}

/// Training settings. Anything left out keeps the default for the model.
#[derive(clap::Args)]
struct TrainOptions {
    /// Use text data from FILE to train the model, one example per line
    #[arg(long, value_name = "FILE")]
    input: PathBuf,

    /// Write the model to PREFIX.bin and the word vectors to PREFIX.vec
    #[arg(long, value_name = "PREFIX")]
    output: PathBuf,

    #[arg(long)]
    loss: Option<LossName>,

    /// Set the starting learning rate
    #[arg(long)]
    lr: Option<real>,

    /// Number of tokens a thread processes between learning-rate updates
    #[arg(long = "lr-update-rate")]
    lr_update_rate: Option<u64>,

    /// Set size of word vectors
    #[arg(long)]
    dim: Option<usize>,

    /// Set max skip length between words
    #[arg(long = "ws")]
    window: Option<usize>,

    /// Number of passes over the training data
    #[arg(long)]
    epoch: Option<usize>,

    /// Discard words that appear less than N times
    #[arg(long = "min-count", value_name = "N")]
    min_count: Option<u64>,

    /// Discard labels that appear less than N times
    #[arg(long = "min-count-label", value_name = "N")]
    min_count_label: Option<u64>,

    /// Number of negatives sampled
    #[arg(long)]
    neg: Option<usize>,

    /// Max length of word n-grams
    #[arg(long = "word-ngrams", value_name = "N")]
    word_ngrams: Option<usize>,

    /// Number of hash buckets for subwords and word n-grams
    #[arg(long)]
    bucket: Option<usize>,

    /// Min length of character n-grams
    #[arg(long)]
    minn: Option<usize>,

    /// Max length of character n-grams
    #[arg(long)]
    maxn: Option<usize>,

    /// Use N threads
    #[arg(long, value_name = "N")]
    thread: Option<usize>,

    /// Sampling threshold
    #[arg(long)]
    t: Option<f64>,

    /// Labels prefix
    #[arg(long)]
    label: Option<String>,

    #[arg(long)]
    seed: Option<u64>,

    /// 0 = quiet, 1 = summary, 2 = progress bar
    #[arg(long)]
    verbose: Option<usize>,

    /// Save the word vectors in binary mode
    #[arg(long)]
    binary: bool,
}

impl TrainOptions {
    fn to_args(&self, model: ModelName) -> Args {
        let mut args = match model {
            ModelName::Supervised => Args::supervised(),
            _ => Args {
                model,
                ..Args::default()
            },
        };
        if let Some(n) = self.word_ngrams {
            args = args.with_word_ngrams(n);
        }
        macro_rules! apply {
            ($($field:ident),*) => {
                $(if let Some(v) = self.$field.clone() {
                    args.$field = v;
                })*
            };
        }
        apply!(
            loss,
            lr,
            lr_update_rate,
            dim,
            window,
            epoch,
            min_count,
            min_count_label,
            neg,
            bucket,
            minn,
            maxn,
            thread,
            t,
            label,
            seed,
            verbose
        );
        args
    }
}

fn read_corpus(path: &Path) -> Result<Vec<String>> {
    let f = BufReader::new(File::open(path).with_context(|| format!("error opening {path:?}"))?);
    f.lines()
        .collect::<io::Result<Vec<String>>>()
        .with_context(|| format!("error reading {path:?}"))
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut s = OsString::from(prefix.as_os_str());
    s.push(suffix);
    PathBuf::from(s)
}

fn train(model: ModelName, options: &TrainOptions) -> Result<()> {
    let args = options.to_args(model);
    args.validate().context("invalid training options")?;
    let input = &options.input;
    let f = File::open(input).with_context(|| format!("error opening {input:?}"))?;

    let mut dict = Dictionary::new(&args);
    dict.read(BufReader::new(f))
        .with_context(|| format!("error building the vocabulary from {input:?}"))?;
    let trainer = Trainer::new(args, dict)?;
    let report = trainer
        .train_file(input)
        .with_context(|| format!("error training on {input:?}"))?;
    if trainer.args().verbose > 0 {
        for (i, loss) in report.epoch_losses.iter().enumerate() {
            eprintln!("epoch {:>3}  loss {loss:.6}", i + 1);
        }
        eprintln!(
            "{} tokens in {:.1?} ({:.0} tokens/sec)",
            report.tokens,
            report.elapsed,
            report.tokens as f64 / report.elapsed.as_secs_f64().max(1e-9)
        );
    }

    let bin = with_suffix(&options.output, ".bin");
    snapshot::save_model(&trainer, &bin).with_context(|| format!("error writing {bin:?}"))?;
    let vec = with_suffix(&options.output, ".vec");
    snapshot::save_vectors(&trainer, &vec, options.binary)
        .with_context(|| format!("error writing {vec:?}"))?;
    info!("wrote {bin:?} and {vec:?}");
    Ok(())
}

fn load(path: &Path) -> Result<Trainer> {
    snapshot::load_model(path).with_context(|| format!("error loading model {path:?}"))
}

fn output_name(trainer: &Trainer, p: &Prediction) -> String {
    let dict = trainer.dictionary();
    match trainer.args().model {
        ModelName::Supervised => dict.label(p.label).to_string(),
        ModelName::Cbow | ModelName::SkipGram => dict.word(p.label).to_string(),
    }
}

fn predict(model: &Path, k: i32, threshold: real, prob: bool) -> Result<()> {
    let trainer = load(model)?;
    let mut out = BufWriter::new(io::stdout().lock());
    for line in io::stdin().lock().lines() {
        let line = line.context("error reading standard input")?;
        let predictions = trainer.predict_line(&line, k, threshold)?;
        let fields: Vec<String> = predictions
            .iter()
            .map(|p| {
                let name = output_name(&trainer, p);
                if prob {
                    format!("{name} {:.5}", p.probability())
                } else {
                    name
                }
            })
            .collect();
        writeln!(out, "{}", fields.join(" "))?;
    }
    out.flush()?;
    Ok(())
}

fn test(model: &Path, test_file: &Path, k: i32, threshold: real) -> Result<()> {
    let trainer = load(model)?;
    let corpus = read_corpus(test_file)?;
    let report = trainer.test(&corpus, k, threshold)?;
    println!("N\t{}", report.examples);
    println!("P@{k}\t{:.3}", report.precision());
    println!("R@{k}\t{:.3}", report.recall());
    Ok(())
}

fn print_sentence_vectors(model: &Path) -> Result<()> {
    let trainer = load(model)?;
    let mut out = BufWriter::new(io::stdout().lock());
    for line in io::stdin().lock().lines() {
        let line = line.context("error reading standard input")?;
        let v = trainer.sentence_vector(&line);
        let fields: Vec<String> = v.iter().map(|x| x.to_string()).collect();
        writeln!(out, "{}", fields.join(" "))?;
    }
    out.flush()?;
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Supervised(options) => train(ModelName::Supervised, &options),
        Command::Cbow(options) => train(ModelName::Cbow, &options),
        Command::Skipgram(options) => train(ModelName::SkipGram, &options),
        Command::Predict {
            model,
            k,
            threshold,
            prob,
        } => predict(&model, k, threshold, prob),
        Command::Test {
            model,
            test_file,
            k,
            threshold,
        } => test(&model, &test_file, k, threshold),
        Command::PrintSentenceVectors { model } => print_sentence_vectors(&model),
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
