//! Hybrid sparse/dense alias storage for word proposal distributions.
//!
//! The proposal for word `w` is `q_w(k) ∝ (n_kw + β) / (n_k + β̄)`. It splits
//! into a word term `n_kw / (n_k + β̄)`, nonzero only on the topics `w` has been
//! assigned, and a smoothing term `β / (n_k + β̄)` shared by every word. The
//! word terms go into the [`SlotPool`] at offsets fixed by the slice's
//! [`AliasTableIndex`]; the smoothing term is built once per slice.
//!
//! Mutation happens only between phased-barrier waits, so the locks below are
//! never contended: they turn the barrier discipline into borrow-checked
//! access rather than arbitrate between threads.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use rand::Rng;

use crate::config::TrainerConfig;
use crate::error::{AliasError, Result};
use crate::index::AliasTableIndex;
use crate::model::Model;
use crate::pool::SlotPool;
use crate::sampler::{Branch, draw_mixture};
use crate::walker::{AliasSlot, WalkerScratch, build_bins};
use crate::{TopicId, TopicSampler, WordId};

/// What [`AliasTable::build`] refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKey {
    /// The sparse slot of one word, from its count row.
    Word(WordId),
    /// The shared dense smoothing slot, from the summary row.
    Smoothing,
}

#[derive(Debug, Default)]
struct AsymmetricPrior {
    slot: AliasSlot,
    alphas: Vec<f32>,
    alpha_sum: f32,
}

#[derive(Debug)]
pub struct AliasTable {
    num_topics: usize,
    alpha: f32,
    beta: f32,
    beta_sum: f32,
    asymmetric_alpha: Option<f32>,
    index: RwLock<Option<Arc<AliasTableIndex>>>,
    pool: RwLock<SlotPool>,
    smoothing: RwLock<AliasSlot>,
    prior: RwLock<AsymmetricPrior>,
}

impl AliasTable {
    pub fn new(cfg: &TrainerConfig) -> Self {
        Self {
            num_topics: cfg.num_topics,
            alpha: cfg.alpha,
            beta: cfg.beta,
            beta_sum: cfg.beta_sum(),
            asymmetric_alpha: cfg.asymmetric_alpha,
            index: RwLock::new(None),
            pool: RwLock::new(SlotPool::new()),
            smoothing: RwLock::new(AliasSlot::default()),
            prior: RwLock::new(AsymmetricPrior {
                slot: AliasSlot::default(),
                alphas: vec![cfg.alpha; cfg.num_topics],
                alpha_sum: cfg.alpha_sum(),
            }),
        }
    }

    /// Install the reservation map of the slice about to be built.
    ///
    /// Must run before any [`build`](Self::build) of the slice, with no
    /// [`Proposals`] alive.
    pub fn init(&self, index: Arc<AliasTableIndex>) {
        self.pool.write().reserve(index.total_cells());
        *self.index.write() = Some(index);
    }

    /// Rebuild one slot from the current counts.
    ///
    /// Rebuilding with unchanged counts reproduces the slot bit for bit.
    ///
    /// # Errors
    /// * [`AliasError::IndexNotInstalled`] if no index is installed.
    /// * [`AliasError::UnindexedWord`] if the index reserves nothing for the word.
    /// * [`AliasError::CapacityExceeded`] if the word has more nonzero topics
    ///   than its reservation.
    pub fn build<M: Model + ?Sized>(
        &self,
        key: SlotKey,
        model: &M,
        scratch: &mut WalkerScratch,
    ) -> Result<()> {
        match key {
            SlotKey::Word(word) => self.build_word(word, model, scratch),
            SlotKey::Smoothing => self.build_smoothing(model, scratch),
        }
    }

    fn build_word<M: Model + ?Sized>(
        &self,
        word: WordId,
        model: &M,
        scratch: &mut WalkerScratch,
    ) -> Result<()> {
        let index = self.index.read();
        let entry = index
            .as_ref()
            .ok_or(AliasError::IndexNotInstalled)?
            .entry(word)
            .ok_or(AliasError::UnindexedWord { word })?;

        model.word_topic_row(word, &mut scratch.row);
        if scratch.row.len() > entry.capacity {
            return Err(AliasError::CapacityExceeded {
                word,
                needed: scratch.row.len(),
                capacity: entry.capacity,
            });
        }

        scratch.proportions.clear();
        for &(topic, count) in &scratch.row {
            if count > 0 {
                let n_k = model.summary_count(topic).max(0) as f32;
                scratch
                    .proportions
                    .push((topic, count as f32 / (n_k + self.beta_sum)));
            }
        }
        let mass = build_bins(scratch)?;
        self.pool.read().write_slot(entry.offset, &scratch.bins, mass);
        Ok(())
    }

    fn build_smoothing<M: Model + ?Sized>(&self, model: &M, scratch: &mut WalkerScratch) -> Result<()> {
        model.summary_row(&mut scratch.summary);
        scratch.proportions.clear();
        for (k, &n_k) in scratch.summary.iter().enumerate() {
            let denom = n_k.max(0) as f32 + self.beta_sum;
            scratch.proportions.push((k as TopicId, self.beta / denom));
        }
        self.smoothing.write().rebuild(scratch)
    }

    /// Rebuild the document prior from global topic popularity.
    ///
    /// `alpha_k = a * K * (n_k + 1) / (N + K)` where `a` is the configured
    /// asymmetric concentration (the symmetric `alpha` if unset) and `N` the
    /// total assignment count, so the prior sums to about `a * K` and a
    /// uniform summary row gives back the symmetric prior.
    ///
    /// # Errors
    /// Propagates a failed slot construction (non-finite alphas).
    pub fn init_asymmetric_alpha<M: Model + ?Sized>(
        &self,
        model: &M,
        scratch: &mut WalkerScratch,
    ) -> Result<()> {
        let a = self.asymmetric_alpha.unwrap_or(self.alpha);
        model.summary_row(&mut scratch.summary);
        let k = self.num_topics as f64;
        let total: f64 = scratch.summary.iter().map(|&n| n.max(0) as f64).sum();

        let mut prior = self.prior.write();
        prior.alphas.clear();
        scratch.proportions.clear();
        for (topic, &n_k) in scratch.summary.iter().enumerate() {
            let alpha = (f64::from(a) * k * (n_k.max(0) as f64 + 1.0) / (total + k)) as f32;
            prior.alphas.push(alpha);
            scratch.proportions.push((topic as TopicId, alpha));
        }
        prior.alpha_sum = prior.alphas.iter().sum();
        prior.slot.rebuild(scratch)
    }

    /// Read access for the sampling phase. Hold it only between the
    /// shared-slots barrier and the sampling-done barrier.
    pub fn proposals(&self) -> Proposals<'_> {
        Proposals {
            index: self.index.read(),
            pool: self.pool.read(),
            smoothing: self.smoothing.read(),
            prior: self.prior.read(),
            num_topics: self.num_topics,
        }
    }

    /// One-off [`Proposals::propose`].
    pub fn propose<R: Rng + ?Sized>(&self, word: WordId, rng: &mut R) -> TopicId {
        self.proposals().propose(word, rng)
    }

    /// One-off [`Proposals::propose_asymmetric_alpha`].
    pub fn propose_asymmetric_alpha<R: Rng + ?Sized>(&self, rng: &mut R) -> TopicId {
        self.proposals().propose_asymmetric_alpha(rng)
    }

    pub fn alpha_at(&self, topic: TopicId) -> f32 {
        self.prior.read().alphas[topic as usize]
    }

    pub fn asy_alpha_sum(&self) -> f32 {
        self.prior.read().alpha_sum
    }

    /// Copy of `word`'s slot in the active slice.
    pub fn word_slot(&self, word: WordId) -> Option<AliasSlot> {
        let index = self.index.read();
        let entry = index.as_ref()?.entry(word)?;
        Some(self.pool.read().slot(entry.offset, entry.capacity).to_slot())
    }

    /// Copy of the shared smoothing slot.
    pub fn smoothing_slot(&self) -> AliasSlot {
        self.smoothing.read().clone()
    }

    /// Release the pool and the shared slots. No build or propose is valid
    /// until the next [`init`](Self::init).
    pub fn clear(&self) {
        self.pool.write().release();
        *self.index.write() = None;
        self.smoothing.write().clear();
        self.prior.write().slot.clear();
    }

    pub fn pool_cells(&self) -> usize {
        self.pool.read().len_cells()
    }
}

/// Read guards over every slot of the active slice.
pub struct Proposals<'a> {
    index: RwLockReadGuard<'a, Option<Arc<AliasTableIndex>>>,
    pool: RwLockReadGuard<'a, SlotPool>,
    smoothing: RwLockReadGuard<'a, AliasSlot>,
    prior: RwLockReadGuard<'a, AsymmetricPrior>,
    num_topics: usize,
}

impl Proposals<'_> {
    /// Draw from `word`'s proposal: its sparse slot mixed with the smoothing
    /// slot by mass. A word without a slot in this slice draws from the
    /// smoothing slot alone.
    #[inline]
    pub fn propose<R: Rng + ?Sized>(&self, word: WordId, rng: &mut R) -> TopicId {
        self.propose_branch(word, rng).1
    }

    /// [`propose`](Self::propose), also reporting which component answered.
    pub fn propose_branch<R: Rng + ?Sized>(&self, word: WordId, rng: &mut R) -> (Branch, TopicId) {
        match self.index.as_ref().and_then(|i| i.entry(word)) {
            Some(entry) => {
                let slot = self.pool.slot(entry.offset, entry.capacity);
                draw_mixture(&slot, &*self.smoothing, rng)
            }
            None => (Branch::Smoothing, self.smoothing.sample_topic(rng)),
        }
    }

    /// Draw from the asymmetric document prior; uniform until the prior has
    /// been built.
    #[inline]
    pub fn propose_asymmetric_alpha<R: Rng + ?Sized>(&self, rng: &mut R) -> TopicId {
        if self.prior.slot.is_empty() {
            rng.random_range(0..self.num_topics as TopicId)
        } else {
            self.prior.slot.sample_topic(rng)
        }
    }

    #[inline]
    pub fn alpha_at(&self, topic: TopicId) -> f32 {
        self.prior.alphas[topic as usize]
    }

    pub fn asy_alpha_sum(&self) -> f32 {
        self.prior.alpha_sum
    }

    /// Mass of `word`'s sparse slot, 0 when it has none.
    pub fn word_mass(&self, word: WordId) -> f32 {
        self.index
            .as_ref()
            .and_then(|i| i.entry(word))
            .map_or(0.0, |e| self.pool.slot(e.offset, e.capacity).mass())
    }

    pub fn smoothing_mass(&self) -> f32 {
        self.smoothing.mass()
    }

    pub fn num_topics(&self) -> usize {
        self.num_topics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::{Phase, PhasedBarrier};
    use crate::model::LocalStore;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    fn config(num_topics: usize, num_vocabs: usize) -> TrainerConfig {
        TrainerConfig {
            num_topics,
            num_vocabs,
            alpha: 0.5,
            beta: 0.1,
            ..TrainerConfig::default()
        }
    }

    /// Store where `rows[w]` lists `(topic, count)` for word `w`; the summary
    /// row is the column sums.
    fn store(num_topics: usize, rows: &[Vec<(TopicId, i32)>]) -> LocalStore {
        let store = LocalStore::new(rows.len(), num_topics);
        for (w, row) in rows.iter().enumerate() {
            for &(k, c) in row.iter() {
                store.add_word_topic(w as WordId, k, c);
                store.add_summary(k, i64::from(c));
            }
        }
        store
    }

    #[test]
    fn build_requires_index() {
        let cfg = config(4, 1);
        let table = AliasTable::new(&cfg);
        let model = store(4, &[vec![(1, 2)]]);
        let mut scratch = WalkerScratch::new();
        assert!(matches!(
            table.build(SlotKey::Word(0), &model, &mut scratch),
            Err(AliasError::IndexNotInstalled)
        ));

        table.init(Arc::new(AliasTableIndex::from_capacities([(0, 2)], 4)));
        table.build(SlotKey::Word(0), &model, &mut scratch).unwrap();
        assert!(matches!(
            table.build(SlotKey::Word(3), &model, &mut scratch),
            Err(AliasError::UnindexedWord { word: 3 })
        ));
    }

    #[test]
    fn capacity_boundary() {
        let cfg = config(8, 2);
        let table = AliasTable::new(&cfg);
        let model = store(
            8,
            &[
                vec![(0, 1), (3, 2), (5, 1)],
                vec![(0, 1), (1, 1), (2, 1), (7, 4)],
            ],
        );
        table.init(Arc::new(AliasTableIndex::from_capacities([(0, 3), (1, 3)], 8)));
        let mut scratch = WalkerScratch::new();

        table.build(SlotKey::Word(0), &model, &mut scratch).unwrap();
        let err = table.build(SlotKey::Word(1), &model, &mut scratch);
        assert!(matches!(
            err,
            Err(AliasError::CapacityExceeded {
                word: 1,
                needed: 4,
                capacity: 3
            })
        ));
    }

    #[test]
    fn rebuild_is_bit_identical() {
        let cfg = config(16, 1);
        let table = AliasTable::new(&cfg);
        let model = store(16, &[vec![(2, 7), (3, 1), (9, 4), (15, 2)]]);
        table.init(Arc::new(AliasTableIndex::from_capacities([(0, 8)], 16)));
        let mut scratch = WalkerScratch::new();

        table.build(SlotKey::Word(0), &model, &mut scratch).unwrap();
        let first = table.word_slot(0).unwrap();
        table.build(SlotKey::Smoothing, &model, &mut scratch).unwrap();
        table.build(SlotKey::Word(0), &model, &mut scratch).unwrap();
        let second = table.word_slot(0).unwrap();

        assert_eq!(first.mass().to_bits(), second.mass().to_bits());
        assert_eq!(first.height(), second.height());
        for (a, b) in first.bins().iter().zip(second.bins()) {
            assert_eq!(a.threshold.to_bits(), b.threshold.to_bits());
            assert_eq!((a.primary, a.alternate), (b.primary, b.alternate));
        }
    }

    #[test]
    fn slot_mass_is_sum_of_word_terms() {
        let cfg = config(4, 1);
        let table = AliasTable::new(&cfg);
        let model = store(4, &[vec![(0, 3), (2, 1)]]);
        table.init(Arc::new(AliasTableIndex::from_capacities([(0, 4)], 4)));
        let mut scratch = WalkerScratch::new();
        table.build(SlotKey::Word(0), &model, &mut scratch).unwrap();
        table.build(SlotKey::Smoothing, &model, &mut scratch).unwrap();

        // beta_sum = 0.1 * 1; n_0 = 3, n_2 = 1
        let want = 3.0 / 3.1 + 1.0 / 1.1;
        let slot = table.word_slot(0).unwrap();
        assert!((slot.mass() - want).abs() < 1e-5);
        assert_eq!(slot.height(), 2);

        let smooth = 0.1 / 3.1 + 0.1 / 0.1 + 0.1 / 1.1 + 0.1 / 0.1;
        assert!((table.smoothing_slot().mass() - smooth).abs() < 1e-5);
        assert_eq!(table.smoothing_slot().height(), 4);
    }

    #[test]
    fn proposals_follow_word_proposal_distribution() {
        let cfg = TrainerConfig {
            beta: 0.5,
            ..config(6, 3)
        };
        let model = store(6, &[vec![(1, 6), (4, 2)], vec![(1, 1), (2, 3)], vec![(0, 5)]]);
        let table = AliasTable::new(&cfg);
        table.init(Arc::new(AliasTableIndex::from_capacities([(0, 2), (1, 2), (2, 2)], 6)));
        let mut scratch = WalkerScratch::new();
        for w in 0..3 {
            table.build(SlotKey::Word(w), &model, &mut scratch).unwrap();
        }
        table.build(SlotKey::Smoothing, &model, &mut scratch).unwrap();

        let beta_sum = 0.5 * 3.0;
        let want: Vec<f64> = (0..6)
            .map(|k| {
                let n_kw = f64::from(model.word_topic_count(0, k));
                let n_k = model.summary_count(k) as f64;
                (n_kw + 0.5) / (n_k + beta_sum)
            })
            .collect();
        let total: f64 = want.iter().sum();

        let proposals = table.proposals();
        let mut rng = Pcg64Mcg::seed_from_u64(21);
        let draws = 200_000;
        let mut counts = [0usize; 6];
        for _ in 0..draws {
            counts[proposals.propose(0, &mut rng) as usize] += 1;
        }
        for k in 0..6 {
            let emp = counts[k] as f64 / draws as f64;
            let p = want[k] / total;
            assert!((emp - p).abs() < 0.006, "k={k} emp={emp} p={p}");
        }
    }

    #[test]
    fn mixture_branch_share_follows_masses() {
        let cfg = config(5, 1);
        let model = store(5, &[vec![(0, 4), (3, 1)]]);
        let table = AliasTable::new(&cfg);
        table.init(Arc::new(AliasTableIndex::from_capacities([(0, 2)], 5)));
        let mut scratch = WalkerScratch::new();
        table.build(SlotKey::Word(0), &model, &mut scratch).unwrap();
        table.build(SlotKey::Smoothing, &model, &mut scratch).unwrap();

        let proposals = table.proposals();
        let s = f64::from(proposals.word_mass(0));
        let d = f64::from(proposals.smoothing_mass());
        let mut rng = Pcg64Mcg::seed_from_u64(8);
        let draws = 200_000;
        let sparse = (0..draws)
            .filter(|_| proposals.propose_branch(0, &mut rng).0 == Branch::Word)
            .count();
        let frac = sparse as f64 / draws as f64;
        assert!((frac - s / (s + d)).abs() < 0.005, "frac={frac}");
    }

    #[test]
    fn dense_routed_word_accepts_every_topic() {
        // tf = [1, 5, 50], K = 10, load factor 2
        let tf = [1u64, 5, 50];
        let index = AliasTableIndex::from_term_frequencies(&[0, 1, 2], |w| tf[w as usize], 10, 2);
        let all: Vec<(TopicId, i32)> = (0..10).map(|k| (k, 5)).collect();
        let model = store(10, &[vec![(4, 1)], vec![(0, 1), (1, 2), (2, 2)], all]);
        let table = AliasTable::new(&config(10, 3));
        table.init(Arc::new(index));
        let mut scratch = WalkerScratch::new();
        for w in 0..3 {
            table.build(SlotKey::Word(w), &model, &mut scratch).unwrap();
        }
        assert_eq!(table.word_slot(2).unwrap().height(), 10);
        assert_eq!(table.word_slot(0).unwrap().bins()[0].primary, 4);
    }

    #[test]
    fn asymmetric_prior_tracks_topic_popularity() {
        let cfg = TrainerConfig {
            asymmetric_alpha: Some(0.2),
            ..config(4, 1)
        };
        let model = store(4, &[vec![(0, 9), (1, 3), (3, 1)]]);
        let table = AliasTable::new(&cfg);
        assert_eq!(table.alpha_at(2), 0.5);

        let mut scratch = WalkerScratch::new();
        table.init_asymmetric_alpha(&model, &mut scratch).unwrap();
        // alpha_k = 0.2 * 4 * (n_k + 1) / (13 + 4)
        let want = [10.0, 4.0, 1.0, 2.0].map(|c: f32| 0.8 * c / 17.0);
        for k in 0..4 {
            assert!((table.alpha_at(k) - want[k as usize]).abs() < 1e-6);
        }
        assert!((table.asy_alpha_sum() - 0.8).abs() < 1e-5);

        let mut rng = Pcg64Mcg::seed_from_u64(2);
        let proposals = table.proposals();
        let draws = 100_000;
        let mut counts = [0usize; 4];
        for _ in 0..draws {
            counts[proposals.propose_asymmetric_alpha(&mut rng) as usize] += 1;
        }
        for k in 0..4 {
            let emp = counts[k] as f64 / draws as f64;
            let p = f64::from(want[k]) / 0.8;
            assert!((emp - p).abs() < 0.01, "k={k} emp={emp} p={p}");
        }
    }

    #[test]
    fn clear_releases_pool() {
        let cfg = config(4, 1);
        let table = AliasTable::new(&cfg);
        table.init(Arc::new(AliasTableIndex::from_capacities([(0, 4)], 4)));
        assert!(table.pool_cells() > 0);
        table.clear();
        assert_eq!(table.pool_cells(), 0);
        assert!(table.word_slot(0).is_none());
        assert!(table.smoothing_slot().is_empty());
    }

    #[test]
    fn readers_never_see_partial_smoothing_slot() {
        const WORKERS: usize = 4;
        const K: usize = 512;
        let cfg = config(K, 1);
        let table = AliasTable::new(&cfg);
        let model = LocalStore::new(1, K);
        for k in 0..K as TopicId {
            model.add_summary(k, i64::from(k % 7));
        }
        let barrier = PhasedBarrier::new(WORKERS).unwrap();

        let mut reference = WalkerScratch::new();
        let expected = {
            let probe = AliasTable::new(&cfg);
            probe.build(SlotKey::Smoothing, &model, &mut reference).unwrap();
            probe.smoothing_slot()
        };

        std::thread::scope(|s| {
            for id in 0..WORKERS {
                let (table, model, barrier, expected) = (&table, &model, &barrier, &expected);
                s.spawn(move || {
                    let mut scratch = WalkerScratch::new();
                    for _round in 0..5 {
                        if id == 0 {
                            std::thread::sleep(std::time::Duration::from_millis(10));
                            table.build(SlotKey::Smoothing, model, &mut scratch).unwrap();
                        }
                        barrier.wait(Phase::SharedSlotsReady).unwrap();
                        assert_eq!(&table.smoothing_slot(), expected);
                        barrier.wait(Phase::SamplingDone).unwrap();
                        if id == 0 {
                            table.clear();
                        }
                        barrier.wait(Phase::EvaluationDone).unwrap();
                    }
                });
            }
        });
    }
}
