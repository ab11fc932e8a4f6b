//! # topictables
//!
//! Walker alias tables as the proposal engine of a Metropolis-Hastings
//! topic-model sampler, plus the barrier-synchronized trainer that drives it.
//!
//! The word proposal of the sampler is
//!
//! ```text
//! q_w(k) ∝ (n_kw + β) / (n_k + β̄)
//! ```
//!
//! which splits into a per-word part over the word's nonzero topics and a
//! dense smoothing part `β / (n_k + β̄)` shared by every word. Each part is an
//! alias table, so a draw is O(1): pick a component by mass, then draw a bin
//! and flip a biased coin.
//!
//! There are two layers:
//!
//! 1. **Tables**: [`AliasSlot`] for an owned table, [`AliasTable`] for the
//!    per-slice store of word slots (packed in an atomic arena sized by an
//!    [`AliasTableIndex`]) next to the smoothing slot and the optional
//!    asymmetric document prior.
//! 2. **Training**: [`LightLda`] initializes topics, then runs every
//!    (iteration, block, slice) on `num_local_workers` threads. Workers build
//!    slots in parallel, meet at a [`PhasedBarrier`], sample their documents
//!    with [`LightDocSampler`], and merge likelihoods.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use topictables::{DataBlock, Document, LightLda, TrainerConfig};
//!
//! # fn main() -> topictables::Result<()> {
//! let cfg = TrainerConfig::builder()
//!     .num_topics(16)
//!     .num_vocabs(1000)
//!     .num_iterations(10)
//!     .num_local_workers(4)
//!     .build()?;
//! let docs = vec![Document::new(vec![3, 17, 17, 256])];
//! let mut lda = LightLda::new(cfg, vec![DataBlock::new(docs)])?;
//! let report = lda.train()?;
//! println!("{} tokens in {:?}", report.tokens_sampled, report.elapsed);
//! lda.dump_doc_topic(0, std::io::stdout().lock())?;
//! # Ok(()) }
//! ```
//!
//! ## Performance
//! * **Build**: O(n) per slot from its `n` nonzero proportions.
//! * **Sample**: O(1) per draw (3 random numbers, 2 branches).
//! * **Space**: `2 + 3 * capacity` 32-bit cells per reserved word.
//!
//! ## Gotchas
//! * A word with more nonzero topics than its reservation fails the build
//!   with [`AliasError::CapacityExceeded`]; the run aborts.
//! * Slots are rebuilt from scratch every slice. Counts change while
//!   documents are sampled, so proposals are stale by design of the sampler;
//!   the acceptance test corrects for it.

mod alias;
mod barrier;
mod config;
mod corpus;
mod doc_sampler;
mod driver;
mod error;
mod eval;
mod index;
mod model;
mod pool;
mod sampler;
mod trainer;
mod walker;

pub use alias::{AliasTable, Proposals, SlotKey};
pub use barrier::{Phase, PhasedBarrier};
pub use config::{InitStrategy, TrainerBuilder, TrainerConfig};
pub use corpus::{DataBlock, Document, LocalVocab, Meta};
pub use doc_sampler::{DocSampler, LightDocSampler};
pub use driver::{LightLda, TrainReport};
pub use error::{AliasError, Result};
pub use eval::{
    LikelihoodAccumulator, LikelihoodKind, LikelihoodReport, doc_llh, normalize_word_llh, word_llh,
};
pub use index::{AliasTableIndex, IndexEntry, sparse_capacity};
pub use model::{LocalStore, Model};
pub use pool::{PooledSlot, SlotPool};
pub use sampler::{Branch, draw_mixture};
pub use trainer::{SliceTask, Trainer, TrainerContext, partition};
pub use walker::{AliasBin, AliasSlot, WalkerScratch};

use rand::Rng;

/// Vocabulary id.
pub type WordId = u32;
/// Topic id, `< num_topics`.
pub type TopicId = u32;

/// Read access to a built alias table.
///
/// Implemented by the owned [`AliasSlot`] and by the arena view
/// [`PooledSlot`].
pub trait TopicSampler {
    /// Number of bins.
    fn height(&self) -> usize;

    /// Unnormalized total mass the table was built from.
    fn mass(&self) -> f32;

    fn bin(&self, i: usize) -> AliasBin;

    /// One alias draw: a uniform bin, then a coin against its threshold.
    ///
    /// # Panics
    /// If the table is empty.
    #[inline]
    fn sample_topic<R: Rng + ?Sized>(&self, rng: &mut R) -> TopicId {
        let bin = self.bin(rng.random_range(0..self.height()));
        if rng.random::<f32>() < bin.threshold {
            bin.primary
        } else {
            bin.alternate
        }
    }
}
