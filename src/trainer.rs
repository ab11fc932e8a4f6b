//! Per-thread training protocol.
//!
//! Every local worker runs the same state machine for each slice:
//!
//! 1. worker 0 installs the slice's alias index; `IndexInstalled`
//! 2. each worker builds the word slots of its round-robin share of the
//!    slice's words; worker 0 then builds the smoothing slot and, if
//!    configured, the asymmetric prior; `SharedSlotsReady`
//! 3. each worker samples its round-robin share of the block's documents;
//!    `SamplingDone`
//! 4. on evaluation iterations, document and word likelihoods are merged
//!    and logged by one worker; `EvaluationDone`
//! 5. after the final slice of the final iteration, worker 0 clears the
//!    alias table.

use std::time::Instant;

use log::{debug, info};
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

use crate::alias::{AliasTable, SlotKey};
use crate::barrier::{Phase, PhasedBarrier};
use crate::config::{InitStrategy, TrainerConfig};
use crate::corpus::{Document, Meta};
use crate::doc_sampler::{DocSampler, LightDocSampler};
use crate::error::{AliasError, Result};
use crate::eval::{self, LikelihoodAccumulator, LikelihoodKind, LikelihoodReport};
use crate::model::Model;
use crate::walker::WalkerScratch;
use crate::{TopicId, WordId};

/// One unit of work pushed to every worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceTask {
    pub iteration: usize,
    pub block: usize,
    pub slice: usize,
    /// Last slice of the last iteration.
    pub is_final: bool,
}

/// Round-robin share of `items` for worker `id` of `count`.
#[inline]
pub fn partition<T>(items: &[T], id: usize, count: usize) -> impl Iterator<Item = &T> {
    items.iter().skip(id).step_by(count.max(1))
}

/// State shared by every worker of a run.
pub struct TrainerContext<'a, M: Model + ?Sized> {
    pub cfg: &'a TrainerConfig,
    pub meta: &'a Meta,
    pub model: &'a M,
    pub alias: &'a AliasTable,
    pub barrier: &'a PhasedBarrier,
    pub llh: &'a LikelihoodAccumulator,
}

impl<M: Model + ?Sized> Clone for TrainerContext<'_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: Model + ?Sized> Copy for TrainerContext<'_, M> {}

pub struct Trainer<'a, M: Model + ?Sized, S = LightDocSampler> {
    id: usize,
    count: usize,
    ctx: TrainerContext<'a, M>,
    sampler: S,
    scratch: WalkerScratch,
    rng: Pcg64Mcg,
    eval_row: Vec<(TopicId, i32)>,
    tokens: u64,
}

impl<'a, M: Model + ?Sized> Trainer<'a, M> {
    /// Worker `id` with the Metropolis-Hastings document sampler.
    pub fn light(id: usize, ctx: TrainerContext<'a, M>) -> Self {
        Self::new(id, ctx, LightDocSampler::new(ctx.cfg))
    }
}

impl<'a, M: Model + ?Sized, S: DocSampler> Trainer<'a, M, S> {
    pub fn new(id: usize, ctx: TrainerContext<'a, M>, sampler: S) -> Self {
        let seed = ctx.cfg.seed.wrapping_add(id as u64 + 1);
        Self {
            id,
            count: ctx.barrier.parties(),
            ctx,
            sampler,
            scratch: WalkerScratch::new(),
            rng: Pcg64Mcg::seed_from_u64(seed),
            eval_row: Vec::new(),
            tokens: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Tokens visited by this worker so far.
    pub fn tokens_sampled(&self) -> u64 {
        self.tokens
    }

    /// Run one slice. `docs` is this worker's round-robin share of the block:
    /// entry `i` is document `id + i * count`.
    ///
    /// # Errors
    /// Any build failure or invariant violation; the caller must abort the
    /// barrier so the other workers unwind too.
    pub fn train_iteration(&mut self, task: SliceTask, docs: &mut [&mut Document]) -> Result<usize> {
        let TrainerContext {
            cfg,
            meta,
            model,
            alias,
            barrier,
            ..
        } = self.ctx;
        let SliceTask {
            iteration,
            block,
            slice,
            is_final,
        } = task;
        let vocab = meta.local_vocab(block);
        let words = vocab.words(slice);

        let watch = Instant::now();
        if self.id == 0 {
            info!("Iter = {iteration}, Block = {block}, Slice = {slice}");
            for &w in words {
                model.request_row(w);
            }
            model.request_summary();
            debug!(
                "requested {} rows, words {:?}..{}",
                words.len(),
                words.first(),
                vocab.last_word(slice)
            );
            alias.init(meta.alias_index(block, slice).clone());
        }
        barrier.wait(Phase::IndexInstalled)?;

        for &w in partition(words, self.id, self.count) {
            alias.build(SlotKey::Word(w), model, &mut self.scratch)?;
        }
        if self.id == 0 {
            alias.build(SlotKey::Smoothing, model, &mut self.scratch)?;
            let non_zero = self.scratch.summary.iter().filter(|&&n| n > 0).count();
            info!("non_zero_topic = {non_zero}");
            if cfg.asymmetric_alpha.is_some() {
                alias.init_asymmetric_alpha(model, &mut self.scratch)?;
            }
        }
        barrier.wait(Phase::SharedSlotsReady)?;
        if self.id == 0 {
            info!("Alias Time used: {:.2} s", watch.elapsed().as_secs_f64());
        }

        let watch = Instant::now();
        let mut num_token = 0usize;
        {
            let proposals = alias.proposals();
            for (i, doc) in docs.iter_mut().enumerate() {
                if iteration == 0 && slice == 0 && !cfg.warm_start {
                    self.check_initial_topics(self.id + i * self.count, doc)?;
                }
                num_token += self.sampler.sample_one_doc(
                    doc,
                    vocab,
                    slice,
                    model,
                    &proposals,
                    &mut self.rng,
                );
            }
        }
        self.tokens += num_token as u64;
        if self.id == 0 {
            let secs = watch.elapsed().as_secs_f64();
            info!("Training Time used: {secs:.2} s");
            info!(
                "sampling throughput: {:.6} (tokens/thread/sec)",
                num_token as f64 / secs.max(f64::MIN_POSITIVE)
            );
        }
        barrier.wait(Phase::SamplingDone)?;

        if cfg.evaluates(iteration) {
            let watch = Instant::now();
            self.evaluate(task, docs)?;
            if self.id == 0 {
                info!("Evaluation Time used: {:.2} s", watch.elapsed().as_secs_f64());
            }
        }

        if is_final {
            if self.id == 0 {
                alias.clear();
            }
            self.scratch.release();
        }
        Ok(num_token)
    }

    fn evaluate(&mut self, task: SliceTask, docs: &[&mut Document]) -> Result<()> {
        let TrainerContext {
            cfg,
            meta,
            model,
            alias,
            barrier,
            llh,
        } = self.ctx;
        let report = |kind, value| LikelihoodReport {
            iteration: task.iteration,
            block: task.block,
            slice: task.slice,
            kind,
            value,
        };

        // document likelihood does not depend on the slice
        if task.slice == 0 {
            let mut partial = 0.0;
            {
                let prior = alias.proposals();
                let counts = self.sampler.doc_topic_counter();
                for doc in docs {
                    partial += eval::doc_llh(doc, counts, &prior);
                }
            }
            llh.add_doc(partial);
            if barrier.wait(Phase::DocLikelihoodMerged)? {
                let value = llh.take_doc();
                info!(
                    "iter={}, trainer={}, block={}, doc likelihood : {value:e}",
                    task.iteration, self.id, task.block
                );
                llh.record(report(LikelihoodKind::Document, value));
            }
        }

        // word likelihood does not depend on the block
        if task.block == 0 {
            let words = meta.local_vocab(task.block).words(task.slice);
            let mut partial = 0.0;
            for &w in partition(words, self.id, self.count) {
                partial += eval::word_llh(w, model, cfg.beta, &mut self.eval_row);
            }
            llh.add_word(partial);
            if barrier.wait(Phase::WordLikelihoodMerged)? {
                let value = llh.take_word();
                info!(
                    "iter={}, trainer={}, slice={}, word likelihood={value:e}",
                    task.iteration, self.id, task.slice
                );
                llh.record(report(LikelihoodKind::Word, value));
            }
            if self.id == 0 {
                let value = eval::normalize_word_llh(model, cfg.beta_sum());
                info!(
                    "iter={}, trainer={}, slice={}, Normalized likelihood : {value:e}",
                    task.iteration, self.id, task.slice
                );
                llh.record(report(LikelihoodKind::NormalizedWord, value));
            }
        }

        barrier.wait(Phase::EvaluationDone)?;
        Ok(())
    }

    /// Warm-start diagnostic: the assignment made by the initializer must
    /// still hold before the first sampling pass.
    fn check_initial_topics(&self, doc_id: usize, doc: &Document) -> Result<()> {
        let init = self.ctx.cfg.init;
        if matches!(init, InitStrategy::Uniform) {
            return Ok(());
        }
        let num_topics = self.ctx.cfg.num_topics as WordId;
        for i in 0..doc.len() {
            let want: TopicId = match init {
                InitStrategy::WordIdentity => doc.word(i) % num_topics,
                _ => doc.topic(0),
            };
            if doc.topic(i) != want {
                let err = AliasError::InvariantViolation {
                    doc: doc_id,
                    word: doc.word(i),
                    topic: doc.topic(i),
                    expected: want,
                };
                log::error!("{err}");
                return Err(err);
            }
        }
        Ok(())
    }
}
