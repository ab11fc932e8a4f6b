//! Word-topic count table and topic summary row.
//!
//! [`Model`] is the seam to the parameter store. [`LocalStore`] keeps both
//! tables in process memory, laying rows out sparse or dense per word the same
//! way the alias index sizes slots.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::{TopicId, WordId};

/// Read and write access to the count tables.
pub trait Model: Send + Sync {
    fn num_topics(&self) -> usize;

    fn num_vocabs(&self) -> usize;

    /// Fill `out` with the nonzero `(topic, count)` entries of `word`'s row,
    /// sorted by topic.
    fn word_topic_row(&self, word: WordId, out: &mut Vec<(TopicId, i32)>);

    fn word_topic_count(&self, word: WordId, topic: TopicId) -> i32;

    fn summary_count(&self, topic: TopicId) -> i64;

    /// Fill `out` with the full summary row.
    fn summary_row(&self, out: &mut Vec<i64>);

    fn add_word_topic(&self, word: WordId, topic: TopicId, delta: i32);

    fn add_summary(&self, topic: TopicId, delta: i64);

    /// Announce that a forthcoming slice reads `word`'s row.
    fn request_row(&self, _word: WordId) {}

    /// Announce that a forthcoming slice reads the summary row.
    fn request_summary(&self) {}
}

#[derive(Debug)]
enum Row {
    Dense(Vec<i32>),
    Sparse(FxHashMap<TopicId, i32>),
}

impl Row {
    fn get(&self, topic: TopicId) -> i32 {
        match self {
            Row::Dense(counts) => counts[topic as usize],
            Row::Sparse(map) => map.get(&topic).copied().unwrap_or(0),
        }
    }

    fn add(&mut self, topic: TopicId, delta: i32) {
        match self {
            Row::Dense(counts) => counts[topic as usize] += delta,
            Row::Sparse(map) => {
                let slot = map.entry(topic).or_insert(0);
                *slot += delta;
                if *slot == 0 {
                    map.remove(&topic);
                }
            }
        }
    }
}

/// In-process parameter store.
#[derive(Debug)]
pub struct LocalStore {
    num_topics: usize,
    rows: Vec<RwLock<Row>>,
    summary: Vec<AtomicI64>,
    requests: AtomicU64,
}

impl LocalStore {
    /// All rows sparse.
    pub fn new(num_vocabs: usize, num_topics: usize) -> Self {
        Self::with_layout(num_vocabs, num_topics, |_| false)
    }

    /// Dense rows for words whose `tf * load_factor` exceeds `num_topics`.
    pub fn from_term_frequencies(
        tf: &[u64],
        num_topics: usize,
        load_factor: usize,
    ) -> Self {
        Self::with_layout(tf.len(), num_topics, |w| {
            tf[w].saturating_mul(load_factor as u64) > num_topics as u64
        })
    }

    fn with_layout<F: Fn(usize) -> bool>(num_vocabs: usize, num_topics: usize, dense: F) -> Self {
        let rows = (0..num_vocabs)
            .map(|w| {
                RwLock::new(if dense(w) {
                    Row::Dense(vec![0; num_topics])
                } else {
                    Row::Sparse(FxHashMap::default())
                })
            })
            .collect();
        Self {
            num_topics,
            rows,
            summary: (0..num_topics).map(|_| AtomicI64::new(0)).collect(),
            requests: AtomicU64::new(0),
        }
    }

    pub fn is_dense_row(&self, word: WordId) -> bool {
        matches!(*self.rows[word as usize].read(), Row::Dense(_))
    }

    /// Prefetch requests received so far.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

impl Model for LocalStore {
    fn num_topics(&self) -> usize {
        self.num_topics
    }

    fn num_vocabs(&self) -> usize {
        self.rows.len()
    }

    fn word_topic_row(&self, word: WordId, out: &mut Vec<(TopicId, i32)>) {
        out.clear();
        match &*self.rows[word as usize].read() {
            Row::Dense(counts) => out.extend(
                counts
                    .iter()
                    .enumerate()
                    .filter(|&(_, &c)| c != 0)
                    .map(|(k, &c)| (k as TopicId, c)),
            ),
            Row::Sparse(map) => {
                out.extend(map.iter().map(|(&k, &c)| (k, c)));
                out.sort_unstable_by_key(|&(k, _)| k);
            }
        }
    }

    fn word_topic_count(&self, word: WordId, topic: TopicId) -> i32 {
        self.rows[word as usize].read().get(topic)
    }

    fn summary_count(&self, topic: TopicId) -> i64 {
        self.summary[topic as usize].load(Ordering::Relaxed)
    }

    fn summary_row(&self, out: &mut Vec<i64>) {
        out.clear();
        out.extend(self.summary.iter().map(|c| c.load(Ordering::Relaxed)));
    }

    fn add_word_topic(&self, word: WordId, topic: TopicId, delta: i32) {
        self.rows[word as usize].write().add(topic, delta);
    }

    fn add_summary(&self, topic: TopicId, delta: i64) {
        self.summary[topic as usize].fetch_add(delta, Ordering::Relaxed);
    }

    fn request_row(&self, _word: WordId) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    fn request_summary(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }
}
