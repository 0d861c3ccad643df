//! Saving and loading trained models and word vectors.
//!
//! A model file is a bincode stream: a magic number and version, then the
//! [`Args`], the [`Dictionary`], and both weight matrices. Word vectors are
//! exported in the word2vec `.vec` layout: a `"<count> <dim>"` header, then
//! one word per row followed by its values, either as text or as raw
//! little-endian `f32`s.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{real, Args, Dictionary, Error, Matrix, Result, Trainer};

const MAGIC: u32 = 0x7478_7476;
const VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct MatrixData {
    rows: usize,
    cols: usize,
    data: Vec<real>,
}

impl MatrixData {
    fn new(m: &Matrix) -> Self {
        MatrixData {
            rows: m.rows(),
            cols: m.cols(),
            data: m.to_vec(),
        }
    }

    fn into_matrix(self) -> Result<Matrix> {
        Matrix::from_vec(self.rows, self.cols, &self.data)
    }
}

pub fn save_model(trainer: &Trainer, path: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(&mut writer, &(MAGIC, VERSION))?;
    bincode::serialize_into(
        &mut writer,
        &(
            trainer.args(),
            trainer.dictionary(),
            MatrixData::new(trainer.model().input()),
            MatrixData::new(trainer.model().output()),
        ),
    )?;
    writer.flush()?;
    debug!("saved model to {path:?}");
    Ok(())
}

pub fn load_model(path: &Path) -> Result<Trainer> {
    let mut reader = BufReader::new(File::open(path)?);
    let (magic, version): (u32, u32) = bincode::deserialize_from(&mut reader)?;
    if magic != MAGIC {
        return Err(Error::Format(format!("{path:?} is not a model file")));
    }
    if version != VERSION {
        return Err(Error::Format(format!(
            "unsupported model file version {version}"
        )));
    }
    let (args, dict, input, output): (Args, Dictionary, MatrixData, MatrixData) =
        bincode::deserialize_from(&mut reader)?;
    debug!("loaded model from {path:?}");
    Trainer::from_parts(args, dict, input.into_matrix()?, output.into_matrix()?)
}

/// Write the vector of every word in the vocabulary.
pub fn save_vectors(trainer: &Trainer, path: &Path, binary: bool) -> Result<()> {
    let dict = trainer.dictionary();
    let mut fo = BufWriter::new(File::create(path)?);
    writeln!(fo, "{} {}", dict.nwords(), trainer.args().dim)?;
    for i in 0..dict.nwords() {
        let word = dict.word(i);
        let v = trainer.word_vector(word);
        write!(fo, "{word}")?;
        if binary {
            write!(fo, " ")?;
            let bits: Vec<u32> = v.iter().map(|x| x.to_bits().to_le()).collect();
            fo.write_all(bytemuck::cast_slice::<u32, u8>(&bits))?;
        } else {
            for x in &v {
                write!(fo, " {x}")?;
            }
        }
        writeln!(fo)?;
    }
    fo.flush()?;
    debug!("saved {} vectors to {path:?}", dict.nwords());
    Ok(())
}

/// Word vectors read back from a binary `.vec` file.
pub struct Vectors {
    size: usize,
    vocab: Vec<String>,
    /// `embeddings[k * size..(k+1) * size]` is the vector for word `k`.
    embeddings: Vec<real>,
}

impl Vectors {
    pub fn load(path: &Path) -> Result<Self> {
        let mut f = BufReader::new(File::open(path)?);
        let mut line = String::new();
        f.read_line(&mut line)?;
        let mut fields = line.split_whitespace().map(str::parse::<usize>);
        let (num_words, size) = match (fields.next(), fields.next()) {
            (Some(Ok(n)), Some(Ok(size))) => (n, size),
            _ => return Err(Error::Format(format!("bad vector file header {line:?}"))),
        };

        let mut vocab = Vec::with_capacity(num_words);
        let mut embeddings = vec![0.0; num_words * size];
        for b in 0..num_words {
            let mut word = Vec::<u8>::new();
            if f.read_until(b' ', &mut word)? == 0 {
                return Err(Error::Format(format!(
                    "expected {num_words} vectors, found {b}"
                )));
            }
            if word.last() == Some(&b' ') {
                word.pop();
            }
            word.retain(|c| *c != b'\n');
            vocab.push(
                String::from_utf8(word).map_err(|err| Error::Format(err.to_string()))?,
            );

            let row = &mut embeddings[b * size..][..size];
            f.read_exact(bytemuck::cast_slice_mut::<real, u8>(row))?;
            for x in row.iter_mut() {
                *x = real::from_bits(u32::from_le(x.to_bits()));
            }
        }

        Ok(Vectors {
            size,
            vocab,
            embeddings,
        })
    }

    pub fn num_words(&self) -> usize {
        self.vocab.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Exact match only, case-sensitive.
    pub fn get(&self, word: &str) -> Option<&[real]> {
        let i = self.vocab.iter().position(|v| v == word)?;
        Some(&self.embeddings[i * self.size..][..self.size])
    }
}
