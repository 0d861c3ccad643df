//! Vocabulary, subsampling, and subword hashing.
//!
//! Turns lines of text into the id lists the model trains on. Input ids
//! `0..nwords` are words; ids from `nwords` on are hash buckets shared by
//! character n-grams and word n-grams. Labels are numbered separately from 0.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::io::BufRead;
use std::iter;

use log::info;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{real, Args, Error, ModelName, Result};

/// End-of-sentence token appended to every line.
pub const EOS: &str = "</s>";

/// Longest run of tokens trained as one unsupervised sentence. Longer lines
/// are split; context windows never cross a split.
pub const MAX_LINE_SIZE: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
enum EntryType {
    Word,
    Label,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    word: String,
    count: u64,
    kind: EntryType,
    /// This word's id followed by its character n-gram bucket ids.
    subwords: Vec<usize>,
}

/// Ids for one line of text. Reused across lines to avoid allocating.
#[derive(Debug, Default)]
pub struct Line {
    /// Input ids: words for unsupervised models; words, subwords and word
    /// n-grams for supervised models.
    pub words: Vec<usize>,
    pub labels: Vec<usize>,
    hashes: Vec<u32>,
    /// Offsets into `words` where a new sentence starts.
    breaks: Vec<usize>,
}

impl Line {
    /// `words` cut into sentences of at most [`MAX_LINE_SIZE`] tokens.
    pub fn sentences(&self) -> impl Iterator<Item = &[usize]> + '_ {
        let mut start = 0;
        self.breaks
            .iter()
            .copied()
            .chain(iter::once(self.words.len()))
            .map(move |end| {
                let sentence = &self.words[start..end];
                start = end;
                sentence
            })
            .filter(|sentence| !sentence.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dictionary {
    args: Args,
    /// Words sorted by decreasing count, then labels sorted the same way.
    entries: Vec<Entry>,
    word2int: HashMap<String, usize>,
    pdiscard: Vec<real>,
    nwords: usize,
    nlabels: usize,
    ntokens: u64,
}

/// 32-bit FNV-1a, with bytes sign-extended before mixing.
pub fn hash(s: &str) -> u32 {
    let mut h: u32 = 2166136261;
    for &b in s.as_bytes() {
        h ^= b as i8 as i32 as u32;
        h = h.wrapping_mul(16777619);
    }
    h
}

impl Dictionary {
    pub fn new(args: &Args) -> Self {
        Dictionary {
            args: args.clone(),
            entries: vec![],
            word2int: HashMap::new(),
            pdiscard: vec![],
            nwords: 0,
            nlabels: 0,
            ntokens: 0,
        }
    }

    /// Build the vocabulary from a corpus with one example per line.
    pub fn read<R: BufRead>(&mut self, reader: R) -> Result<()> {
        for line in reader.lines() {
            self.add_line(&line?);
        }
        self.finish()
    }

    /// Like [`Dictionary::read`], for a corpus already in memory.
    pub fn read_lines<'a, I>(&mut self, lines: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for line in lines {
            self.add_line(line);
        }
        self.finish()
    }

    fn add_line(&mut self, line: &str) {
        for token in line.split_whitespace().chain(iter::once(EOS)) {
            self.add(token);
        }
    }

    fn add(&mut self, token: &str) {
        self.ntokens += 1;
        if let Some(&i) = self.word2int.get(token) {
            self.entries[i].count += 1;
            return;
        }
        let kind = if token.starts_with(&self.args.label) {
            EntryType::Label
        } else {
            EntryType::Word
        };
        self.word2int.insert(token.to_string(), self.entries.len());
        self.entries.push(Entry {
            word: token.to_string(),
            count: 1,
            kind,
            subwords: vec![],
        });
    }

    fn finish(&mut self) -> Result<()> {
        self.threshold(self.args.min_count, self.args.min_count_label);
        if self.nwords == 0 {
            return Err(Error::InvalidConfig(
                "empty vocabulary; try a smaller min_count".to_string(),
            ));
        }
        if self.args.model == ModelName::Supervised && self.nlabels == 0 {
            return Err(Error::InvalidConfig(format!(
                "no labels found; labels must start with {:?}",
                self.args.label
            )));
        }
        self.init_table_discard();
        self.init_ngrams();
        info!(
            "read {} tokens: {} words, {} labels",
            self.ntokens, self.nwords, self.nlabels
        );
        Ok(())
    }

    /// Drop rare entries and sort what remains: words before labels, then by
    /// decreasing count.
    fn threshold(&mut self, min_count: u64, min_count_label: u64) {
        self.entries.sort_by_key(|e| (e.kind, Reverse(e.count)));
        self.entries.retain(|e| match e.kind {
            EntryType::Word => e.count >= min_count,
            EntryType::Label => e.count >= min_count_label,
        });

        self.word2int.clear();
        self.nwords = 0;
        self.nlabels = 0;
        for (i, e) in self.entries.iter().enumerate() {
            self.word2int.insert(e.word.clone(), i);
            match e.kind {
                EntryType::Word => self.nwords += 1,
                EntryType::Label => self.nlabels += 1,
            }
        }
    }

    fn init_table_discard(&mut self) {
        let t = self.args.t;
        self.pdiscard = self
            .entries
            .iter()
            .map(|e| {
                let f = e.count as f64 / self.ntokens as f64;
                ((t / f).sqrt() + t / f) as real
            })
            .collect();
    }

    fn init_ngrams(&mut self) {
        for i in 0..self.entries.len() {
            let mut subwords = vec![i];
            if self.entries[i].word != EOS {
                let word = format!("<{}>", self.entries[i].word);
                self.compute_subwords(&word, &mut subwords);
            }
            self.entries[i].subwords = subwords;
        }
    }

    /// Push the bucket id of every character n-gram of `word` (already
    /// wrapped in `<` `>`) with length between `minn` and `maxn` characters.
    fn compute_subwords(&self, word: &str, out: &mut Vec<usize>) {
        let (minn, maxn, bucket) = (self.args.minn, self.args.maxn, self.args.bucket);
        if maxn == 0 || bucket == 0 {
            return;
        }
        let bounds: Vec<usize> = word
            .char_indices()
            .map(|(i, _)| i)
            .chain(iter::once(word.len()))
            .collect();
        let nchars = bounds.len() - 1;
        for i in 0..nchars {
            for n in 1..=maxn {
                let j = i + n;
                if j > nchars {
                    break;
                }
                // The bare "<" and ">" are not n-grams.
                if n >= minn && !(n == 1 && (i == 0 || j == nchars)) {
                    let h = hash(&word[bounds[i]..bounds[j]]) as usize % bucket;
                    out.push(self.nwords + h);
                }
            }
        }
    }

    pub fn nwords(&self) -> usize {
        self.nwords
    }

    pub fn nlabels(&self) -> usize {
        self.nlabels
    }

    /// Number of tokens in the corpus, including one `</s>` per line.
    pub fn ntokens(&self) -> u64 {
        self.ntokens
    }

    /// Rows the input matrix needs: one per word plus the hash buckets.
    pub fn input_rows(&self) -> usize {
        self.nwords + self.args.bucket
    }

    pub fn get_id(&self, token: &str) -> Option<usize> {
        self.word2int.get(token).copied()
    }

    /// Panics if `id` is out of range.
    pub fn word(&self, id: usize) -> &str {
        assert!(id < self.nwords);
        &self.entries[id].word
    }

    /// The label string for label id `lid`.
    pub fn label(&self, lid: usize) -> &str {
        assert!(lid < self.nlabels);
        &self.entries[self.nwords + lid].word
    }

    /// Word id followed by its subword bucket ids.
    pub fn subwords(&self, id: usize) -> &[usize] {
        &self.entries[id].subwords
    }

    /// Input ids for any token. Unknown words get only their character
    /// n-grams, which is empty when subwords are off.
    pub fn word_ids(&self, word: &str) -> Vec<usize> {
        match self.get_id(word) {
            Some(id) => self.subwords(id).to_vec(),
            None => {
                let mut ids = vec![];
                self.compute_subwords(&format!("<{word}>"), &mut ids);
                ids
            }
        }
    }

    pub fn word_counts(&self) -> Vec<u64> {
        self.entries[..self.nwords].iter().map(|e| e.count).collect()
    }

    pub fn label_counts(&self) -> Vec<u64> {
        self.entries[self.nwords..].iter().map(|e| e.count).collect()
    }

    /// Counts of whatever the model predicts: labels for supervised models,
    /// words otherwise.
    pub fn target_counts(&self) -> Vec<u64> {
        match self.args.model {
            ModelName::Supervised => self.label_counts(),
            ModelName::Cbow | ModelName::SkipGram => self.word_counts(),
        }
    }

    /// True if a frequent word should be skipped this time, given a uniform
    /// draw `rand` in `0..1`. Never true for supervised models.
    pub fn discard(&self, id: usize, rand: real) -> bool {
        match self.args.model {
            ModelName::Supervised => false,
            ModelName::Cbow | ModelName::SkipGram => rand > self.pdiscard[id],
        }
    }

    /// Parse one line of text into `line`, returning the number of tokens
    /// read (for the learning-rate schedule).
    ///
    /// Unsupervised models get the in-vocabulary words that survive
    /// subsampling, split by [`Line::sentences`]. Supervised models get every word's subwords, word n-gram
    /// buckets, and the label ids.
    pub fn get_line(&self, text: &str, line: &mut Line, rng: &mut impl Rng) -> u64 {
        line.words.clear();
        line.labels.clear();
        line.hashes.clear();
        line.breaks.clear();
        match self.args.model {
            ModelName::Supervised => self.get_labeled_line(text, line),
            ModelName::Cbow | ModelName::SkipGram => self.get_word_line(text, line, rng),
        }
    }

    fn get_word_line(&self, text: &str, line: &mut Line, rng: &mut impl Rng) -> u64 {
        let mut ntokens = 0;
        for token in text.split_whitespace().chain(iter::once(EOS)) {
            let Some(id) = self.get_id(token) else {
                continue;
            };
            ntokens += 1;
            if self.entries[id].kind == EntryType::Word && !self.discard(id, rng.gen::<real>()) {
                line.words.push(id);
            }
            if ntokens % MAX_LINE_SIZE == 0 {
                line.breaks.push(line.words.len());
            }
        }
        ntokens
    }

    fn get_labeled_line(&self, text: &str, line: &mut Line) -> u64 {
        let mut ntokens = 0;
        for token in text.split_whitespace().chain(iter::once(EOS)) {
            ntokens += 1;
            match self.get_id(token) {
                Some(id) if self.entries[id].kind == EntryType::Label => {
                    line.labels.push(id - self.nwords);
                }
                Some(id) => {
                    line.words.extend_from_slice(self.subwords(id));
                    line.hashes.push(hash(token));
                }
                None if token.starts_with(&self.args.label) => {}
                None => {
                    // Unknown words still contribute their character n-grams.
                    let word = format!("<{token}>");
                    self.compute_subwords(&word, &mut line.words);
                    line.hashes.push(hash(token));
                }
            }
        }
        self.add_word_ngrams(line);
        ntokens
    }

    fn add_word_ngrams(&self, line: &mut Line) {
        let n = self.args.word_ngrams;
        let bucket = self.args.bucket as u64;
        if n <= 1 || bucket == 0 {
            return;
        }
        let hashes = &line.hashes;
        for i in 0..hashes.len() {
            let mut h = hashes[i] as u64;
            for &next in &hashes[i + 1..hashes.len().min(i + n)] {
                h = h.wrapping_mul(116049371).wrapping_add(next as u64);
                line.words.push(self.nwords + (h % bucket) as usize);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    const CORPUS: &str = "\
__label__pets the cat sat on the mat
__label__pets the dog sat
__label__food the soup was hot __label__hot
";

    fn dict(args: Args) -> Dictionary {
        let mut d = Dictionary::new(&args);
        d.read(CORPUS.as_bytes()).unwrap();
        d
    }

    #[test]
    fn counts_and_orders_entries() {
        let d = dict(Args {
            min_count: 1,
            ..Args::supervised()
        });
        assert_eq!(d.ntokens(), 20);
        assert_eq!(d.nlabels(), 3);
        assert_eq!(d.word(0), "the");
        assert_eq!(d.word_counts()[0], 4);
        assert_eq!(d.label(0), "__label__pets");
        assert_eq!(d.label_counts(), [2, 1, 1]);
        let counts = d.word_counts();
        assert!(counts.windows(2).all(|w| w[0] >= w[1]));
        assert!(d.get_id(EOS).is_some());
    }

    #[test]
    fn min_count_drops_rare_words() {
        let d = dict(Args {
            min_count: 2,
            ..Args::supervised()
        });
        let words: Vec<&str> = (0..d.nwords()).map(|i| d.word(i)).collect();
        assert_eq!(words.len(), 3);
        assert!(words.contains(&"the") && words.contains(&"sat") && words.contains(&EOS));
    }

    #[test]
    fn empty_vocabulary_is_an_error() {
        let mut d = Dictionary::new(&Args::default());
        assert!(matches!(
            d.read_lines(["a b c"]),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn subwords_are_character_ngrams() {
        let args = Args {
            min_count: 1,
            minn: 3,
            maxn: 3,
            bucket: 1000,
            ..Args::default()
        };
        let mut d = Dictionary::new(&args);
        d.read_lines(["cat"]).unwrap();
        let id = d.get_id("cat").unwrap();
        let subwords = d.subwords(id);
        // "<cat>" has the trigrams "<ca", "cat", "at>".
        assert_eq!(subwords.len(), 4);
        assert_eq!(subwords[0], id);
        let expected = hash("cat") as usize % 1000 + d.nwords();
        assert_eq!(subwords[2], expected);
        assert!(subwords[1..].iter().all(|&s| s >= d.nwords() && s < d.input_rows()));
        assert_eq!(d.subwords(d.get_id(EOS).unwrap()).len(), 1);
    }

    #[test]
    fn multibyte_words_split_on_characters() {
        let args = Args {
            min_count: 1,
            minn: 1,
            maxn: 2,
            bucket: 100,
            ..Args::default()
        };
        let mut d = Dictionary::new(&args);
        d.read_lines(["né"]).unwrap();
        // "<né>": unigrams n, é; bigrams <n, né, é>.
        assert_eq!(d.subwords(d.get_id("né").unwrap()).len(), 1 + 5);
    }

    #[test]
    fn supervised_line_has_words_and_labels() {
        let d = dict(Args::supervised());
        let mut line = Line::default();
        let mut rng = StdRng::seed_from_u64(0);
        let n = d.get_line("__label__food the unseen cat", &mut line, &mut rng);
        assert_eq!(n, 5);
        assert_eq!(line.labels, [1]);
        let expected = [
            d.get_id("the").unwrap(),
            d.get_id("cat").unwrap(),
            d.get_id(EOS).unwrap(),
        ];
        assert_eq!(line.words, expected);
    }

    #[test]
    fn word_ngrams_add_buckets() {
        let d = dict(Args::supervised().with_word_ngrams(2));
        let mut line = Line::default();
        let mut rng = StdRng::seed_from_u64(0);
        d.get_line("the cat sat", &mut line, &mut rng);
        // 4 words (with </s>) and 3 bigrams.
        assert_eq!(line.words.len(), 7);
        assert!(line.words[4..].iter().all(|&id| id >= d.nwords()));
    }

    #[test]
    fn long_lines_split_into_sentences() {
        let args = Args {
            min_count: 1,
            t: 1.0,
            ..Args::default()
        };
        let text: Vec<String> = (0..2500).map(|i| format!("w{}", i % 10)).collect();
        let text = text.join(" ");
        let mut d = Dictionary::new(&args);
        d.read_lines([text.as_str()]).unwrap();

        let mut line = Line::default();
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(d.get_line(&text, &mut line, &mut rng), 2501);
        assert_eq!(line.words.len(), 2501);
        let sizes: Vec<usize> = line.sentences().map(<[usize]>::len).collect();
        let max = MAX_LINE_SIZE as usize;
        assert_eq!(sizes, [max, max, 2501 - 2 * max]);

        // A short line is one sentence, and stale splits are cleared.
        d.get_line("w1 w2", &mut line, &mut rng);
        assert_eq!(line.sentences().collect::<Vec<_>>(), [&line.words[..]]);
    }

    #[test]
    fn unsupervised_line_subsamples_frequent_words() {
        let args = Args {
            min_count: 1,
            t: 1e-3,
            ..Args::default()
        };
        let mut d = Dictionary::new(&args);
        let corpus: Vec<String> = (0..200)
            .map(|i| format!("the the the the rare{i}"))
            .collect();
        d.read_lines(corpus.iter().map(String::as_str)).unwrap();

        let the = d.get_id("the").unwrap();
        let mut line = Line::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut kept = 0;
        for text in &corpus {
            assert_eq!(d.get_line(text, &mut line, &mut rng), 6);
            kept += line.words.iter().filter(|&&w| w == the).count();
            assert!(line.labels.is_empty());
        }
        assert!(kept < 400, "kept {kept} of 800");

        let mut keep_all = Dictionary {
            args: Args { t: 1.0, ..args },
            ..d
        };
        keep_all.init_table_discard();
        keep_all.get_line(&corpus[0], &mut line, &mut rng);
        assert_eq!(line.words.len(), 6);
    }
}
