//! Documents, data blocks and vocabulary slices.
//!
//! A block is a memory-resident group of documents. Its vocabulary is cut
//! into slices so that the slots reserved for one slice stay under
//! `slice_capacity` bins no matter how large the corpus is.

use std::sync::Arc;

use crate::config::TrainerConfig;
use crate::error::{AliasError, Result};
use crate::index::{AliasTableIndex, sparse_capacity};
use crate::{TopicId, WordId};

/// A document: parallel word and topic arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    words: Vec<WordId>,
    topics: Vec<TopicId>,
}

impl Document {
    /// Document with every topic set to 0.
    pub fn new(words: Vec<WordId>) -> Self {
        let topics = vec![0; words.len()];
        Self { words, topics }
    }

    /// # Errors
    /// [`AliasError::InvalidConfig`] if the arrays differ in length.
    pub fn with_topics(words: Vec<WordId>, topics: Vec<TopicId>) -> Result<Self> {
        if words.len() != topics.len() {
            return Err(AliasError::InvalidConfig(format!(
                "{} words but {} topics",
                words.len(),
                topics.len()
            )));
        }
        Ok(Self { words, topics })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    #[inline]
    pub fn word(&self, i: usize) -> WordId {
        self.words[i]
    }

    #[inline]
    pub fn topic(&self, i: usize) -> TopicId {
        self.topics[i]
    }

    #[inline]
    pub fn set_topic(&mut self, i: usize, topic: TopicId) {
        self.topics[i] = topic;
    }

    pub fn words(&self) -> &[WordId] {
        &self.words
    }

    pub fn topics(&self) -> &[TopicId] {
        &self.topics
    }

    /// Add this document's topic counts into `counts` (indexed by topic).
    pub fn accumulate_topic_counts(&self, counts: &mut [u32]) {
        for &t in &self.topics {
            counts[t as usize] += 1;
        }
    }

    /// Nonzero `(topic, count)` pairs sorted by topic.
    pub fn topic_histogram(&self) -> Vec<(TopicId, u32)> {
        let mut sorted = self.topics.clone();
        sorted.sort_unstable();
        let mut out: Vec<(TopicId, u32)> = Vec::new();
        for t in sorted {
            match out.last_mut() {
                Some((last, n)) if *last == t => *n += 1,
                _ => out.push((t, 1)),
            }
        }
        out
    }
}

/// The documents of one block.
#[derive(Debug, Clone, Default)]
pub struct DataBlock {
    docs: Vec<Document>,
}

impl DataBlock {
    pub fn new(docs: Vec<Document>) -> Self {
        Self { docs }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn docs(&self) -> &[Document] {
        &self.docs
    }

    pub fn docs_mut(&mut self) -> &mut [Document] {
        &mut self.docs
    }
}

/// Sorted distinct words of one block, cut into slices.
#[derive(Debug, Clone)]
pub struct LocalVocab {
    words: Vec<WordId>,
    // slice s covers words[bounds[s]..bounds[s + 1]]
    bounds: Vec<usize>,
}

impl LocalVocab {
    /// Cut `words` (sorted, distinct) so that each slice's summed reservation
    /// stays within `slice_capacity`. A single word larger than the budget
    /// gets a slice of its own. There is always at least one slice.
    pub fn build<F>(words: Vec<WordId>, reserved: F, slice_capacity: usize) -> Self
    where
        F: Fn(WordId) -> usize,
    {
        let mut bounds = vec![0];
        let mut running = 0usize;
        for (i, &w) in words.iter().enumerate() {
            let r = reserved(w);
            if running > 0 && running + r > slice_capacity {
                bounds.push(i);
                running = 0;
            }
            running += r;
        }
        bounds.push(words.len());
        Self { words, bounds }
    }

    pub fn num_slices(&self) -> usize {
        self.bounds.len() - 1
    }

    /// Words of `slice`, ascending.
    pub fn words(&self, slice: usize) -> &[WordId] {
        &self.words[self.bounds[slice]..self.bounds[slice + 1]]
    }

    /// One past the largest word id of `slice`.
    pub fn last_word(&self, slice: usize) -> WordId {
        self.words(slice).last().map_or(0, |&w| w + 1)
    }

    /// Whether `word` falls in `slice`'s id range.
    #[inline]
    pub fn contains(&self, slice: usize, word: WordId) -> bool {
        match self.words(slice).first() {
            Some(&first) => first <= word && word < self.last_word(slice),
            None => false,
        }
    }

    pub fn all_words(&self) -> &[WordId] {
        &self.words
    }
}

/// Corpus statistics: global term frequencies, per-block vocabularies and
/// the alias index of every (block, slice).
#[derive(Debug, Clone)]
pub struct Meta {
    tf: Vec<u64>,
    vocabs: Vec<LocalVocab>,
    indexes: Vec<Vec<Arc<AliasTableIndex>>>,
}

impl Meta {
    pub fn build(blocks: &[DataBlock], cfg: &TrainerConfig) -> Self {
        let mut tf = vec![0u64; cfg.num_vocabs];
        for doc in blocks.iter().flat_map(|b| b.docs()) {
            for &w in doc.words() {
                tf[w as usize] += 1;
            }
        }
        let reserved = |w: WordId| sparse_capacity(tf[w as usize], cfg.num_topics, cfg.load_factor);

        let mut vocabs = Vec::with_capacity(blocks.len());
        let mut indexes = Vec::with_capacity(blocks.len());
        for block in blocks {
            let mut words: Vec<WordId> = block
                .docs()
                .iter()
                .flat_map(|d| d.words().iter().copied())
                .collect();
            words.sort_unstable();
            words.dedup();

            let vocab = LocalVocab::build(words, reserved, cfg.slice_capacity);
            let slices = (0..vocab.num_slices())
                .map(|s| {
                    Arc::new(AliasTableIndex::from_term_frequencies(
                        vocab.words(s),
                        |w| tf[w as usize],
                        cfg.num_topics,
                        cfg.load_factor,
                    ))
                })
                .collect();
            vocabs.push(vocab);
            indexes.push(slices);
        }
        Self { tf, vocabs, indexes }
    }

    pub fn tf(&self, word: WordId) -> u64 {
        self.tf[word as usize]
    }

    pub fn term_frequencies(&self) -> &[u64] {
        &self.tf
    }

    pub fn num_blocks(&self) -> usize {
        self.vocabs.len()
    }

    pub fn local_vocab(&self, block: usize) -> &LocalVocab {
        &self.vocabs[block]
    }

    pub fn alias_index(&self, block: usize, slice: usize) -> &Arc<AliasTableIndex> {
        &self.indexes[block][slice]
    }

    /// Largest pool footprint over all slices, in cells.
    pub fn max_pool_cells(&self) -> usize {
        self.indexes
            .iter()
            .flatten()
            .map(|i| i.total_cells())
            .max()
            .unwrap_or(0)
    }
}
