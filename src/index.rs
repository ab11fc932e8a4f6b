//! Per-(block, slice) reservation map for the slot pool.

use crate::WordId;
use crate::pool::cells_for;

/// Bins reserved for a word seen `tf` times.
///
/// `tf * load_factor` bins, unless that exceeds `num_topics`, in which case the
/// word gets a full dense slot of `num_topics` bins. Equality stays sparse.
#[inline]
pub fn sparse_capacity(tf: u64, num_topics: usize, load_factor: usize) -> usize {
    let wanted = tf.saturating_mul(load_factor as u64);
    if wanted > num_topics as u64 {
        num_topics
    } else {
        wanted as usize
    }
}

/// Where a word's slot lives in the pool and how many bins it may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// First cell of the slot.
    pub offset: usize,
    /// Maximum number of bins; `num_topics` for a dense slot.
    pub capacity: usize,
}

/// Reservation map for one (block, slice): words sorted ascending, each with
/// a contiguous region of the pool.
#[derive(Debug, Clone, Default)]
pub struct AliasTableIndex {
    words: Vec<WordId>,
    entries: Vec<IndexEntry>,
    total_cells: usize,
}

impl AliasTableIndex {
    /// Lay out slots for `(word, capacity)` pairs. Duplicate words keep the
    /// first reservation.
    pub fn from_capacities<I>(pairs: I, num_topics: usize) -> Self
    where
        I: IntoIterator<Item = (WordId, usize)>,
    {
        let mut pairs: Vec<(WordId, usize)> = pairs
            .into_iter()
            .map(|(w, capacity)| (w, capacity.min(num_topics)))
            .collect();
        pairs.sort_by_key(|&(w, _)| w);
        pairs.dedup_by_key(|&mut (w, _)| w);

        let mut words = Vec::with_capacity(pairs.len());
        let mut entries = Vec::with_capacity(pairs.len());
        let mut offset = 0usize;
        for (word, capacity) in pairs {
            words.push(word);
            entries.push(IndexEntry { offset, capacity });
            offset += cells_for(capacity);
        }
        Self {
            words,
            entries,
            total_cells: offset,
        }
    }

    /// Reserve slots for `words` from their term frequencies. Words with a
    /// zero frequency get no slot.
    pub fn from_term_frequencies<F>(
        words: &[WordId],
        tf: F,
        num_topics: usize,
        load_factor: usize,
    ) -> Self
    where
        F: Fn(WordId) -> u64,
    {
        Self::from_capacities(
            words
                .iter()
                .filter(|&&w| tf(w) > 0)
                .map(|&w| (w, sparse_capacity(tf(w), num_topics, load_factor))),
            num_topics,
        )
    }

    #[inline]
    pub fn entry(&self, word: WordId) -> Option<IndexEntry> {
        self.words
            .binary_search(&word)
            .ok()
            .map(|i| self.entries[i])
    }

    /// Cells the pool must hold for this slice.
    pub fn total_cells(&self) -> usize {
        self.total_cells
    }

    /// Pool footprint in bytes.
    pub fn total_bytes(&self) -> usize {
        self.total_cells * std::mem::size_of::<u32>()
    }

    pub fn words(&self) -> &[WordId] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}
