//! In-process training driver: topic initialization, the worker pool and
//! the slice schedule.

use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

use crate::alias::AliasTable;
use crate::barrier::PhasedBarrier;
use crate::config::{InitStrategy, TrainerConfig};
use crate::corpus::{DataBlock, Document, Meta};
use crate::error::{AliasError, Result};
use crate::eval::{LikelihoodAccumulator, LikelihoodReport};
use crate::model::{LocalStore, Model};
use crate::trainer::{SliceTask, Trainer, TrainerContext};
use crate::TopicId;

/// Outcome of [`LightLda::train`].
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub tokens_sampled: u64,
    pub likelihoods: Vec<LikelihoodReport>,
    pub elapsed: Duration,
}

/// Aborts the barrier if the owning worker unwinds, so its peers do not wait
/// forever.
struct AbortOnPanic<'a>(&'a PhasedBarrier);

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abort();
        }
    }
}

pub struct LightLda {
    cfg: TrainerConfig,
    blocks: Vec<DataBlock>,
    meta: Meta,
    store: LocalStore,
    alias: AliasTable,
    initialized: bool,
}

impl LightLda {
    /// # Errors
    /// [`AliasError::InvalidConfig`] for a bad config or a word id outside
    /// `num_vocabs`.
    pub fn new(cfg: TrainerConfig, blocks: Vec<DataBlock>) -> Result<Self> {
        cfg.validate()?;
        let out_of_range = blocks
            .iter()
            .flat_map(|b| b.docs())
            .flat_map(|d| d.words())
            .find(|&&w| w as usize >= cfg.num_vocabs);
        if let Some(w) = out_of_range {
            return Err(AliasError::InvalidConfig(format!(
                "word {w} is outside num_vocabs = {}",
                cfg.num_vocabs
            )));
        }

        let meta = Meta::build(&blocks, &cfg);
        let store = LocalStore::from_term_frequencies(meta.term_frequencies(), cfg.num_topics, cfg.load_factor);
        let alias = AliasTable::new(&cfg);
        info!(
            "{} blocks, {} vocabs, {} topics, largest slice pool {} cells",
            meta.num_blocks(),
            cfg.num_vocabs,
            cfg.num_topics,
            meta.max_pool_cells()
        );
        Ok(Self {
            cfg,
            blocks,
            meta,
            store,
            alias,
            initialized: false,
        })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.cfg
    }

    pub fn blocks(&self) -> &[DataBlock] {
        &self.blocks
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Assign initial topics (unless warm starting) and push every token into
    /// the model. Idempotent.
    ///
    /// # Errors
    /// [`AliasError::InvalidConfig`] if a warm-start topic is out of range.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        let num_topics = self.cfg.num_topics as TopicId;
        let mut rng = Pcg64Mcg::seed_from_u64(self.cfg.seed);
        let num_blocks = self.blocks.len();
        for (b, block) in self.blocks.iter_mut().enumerate() {
            info!(
                "init block {}/{num_blocks}, num_slice = {}, data_block_size = {}",
                b + 1,
                self.meta.local_vocab(b).num_slices(),
                block.len()
            );
            for doc in block.docs_mut() {
                if !self.cfg.warm_start {
                    assign_topics(doc, self.cfg.init, num_topics, &mut rng);
                }
                for i in 0..doc.len() {
                    let topic = doc.topic(i);
                    if topic >= num_topics {
                        return Err(AliasError::InvalidConfig(format!(
                            "warm-start topic {topic} is outside num_topics = {num_topics}"
                        )));
                    }
                    self.store.add_word_topic(doc.word(i), topic, 1);
                    self.store.add_summary(topic, 1);
                }
            }
        }
        self.initialized = true;
        Ok(())
    }

    /// Every (iteration, block, slice) in execution order.
    pub fn schedule(&self) -> Vec<SliceTask> {
        let iterations = self.cfg.num_iterations;
        let num_blocks = self.meta.num_blocks();
        let mut tasks = Vec::new();
        for iteration in 0..iterations {
            for block in 0..num_blocks {
                let slices = self.meta.local_vocab(block).num_slices();
                for slice in 0..slices {
                    tasks.push(SliceTask {
                        iteration,
                        block,
                        slice,
                        is_final: iteration + 1 == iterations
                            && block + 1 == num_blocks
                            && slice + 1 == slices,
                    });
                }
            }
        }
        tasks
    }

    /// Run the full schedule on `num_local_workers` threads.
    ///
    /// # Errors
    /// The first worker failure. Errors that only report another worker's
    /// abort are never returned while the root cause is known.
    pub fn train(&mut self) -> Result<TrainReport> {
        self.initialize()?;
        let workers = self.cfg.num_local_workers;
        let schedule = self.schedule();
        let barrier = PhasedBarrier::new(workers)?;
        let llh = LikelihoodAccumulator::new();

        // docs[t][b]: worker t's round-robin share of block b
        let num_blocks = self.blocks.len();
        let mut shares: Vec<Vec<Vec<&mut Document>>> = (0..workers)
            .map(|_| (0..num_blocks).map(|_| Vec::new()).collect())
            .collect();
        for (b, block) in self.blocks.iter_mut().enumerate() {
            for (d, doc) in block.docs_mut().iter_mut().enumerate() {
                shares[d % workers][b].push(doc);
            }
        }

        let ctx = TrainerContext {
            cfg: &self.cfg,
            meta: &self.meta,
            model: &self.store,
            alias: &self.alias,
            barrier: &barrier,
            llh: &llh,
        };
        let started = Instant::now();
        let results: Vec<Result<u64>> = thread::scope(|s| {
            let handles: Vec<_> = shares
                .into_iter()
                .enumerate()
                .map(|(id, mut docs)| {
                    let schedule = &schedule;
                    s.spawn(move || {
                        let _guard = AbortOnPanic(ctx.barrier);
                        let mut trainer = Trainer::light(id, ctx);
                        for &task in schedule {
                            if let Err(e) = trainer.train_iteration(task, &mut docs[task.block]) {
                                if !e.is_secondary() {
                                    error!(
                                        "trainer {id} failed at iter {} block {} slice {}: {e}",
                                        task.iteration, task.block, task.slice
                                    );
                                }
                                ctx.barrier.abort();
                                return Err(e);
                            }
                        }
                        Ok(trainer.tokens_sampled())
                    })
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(id, h)| h.join().unwrap_or(Err(AliasError::WorkerPanicked(id))))
                .collect()
        });
        let elapsed = started.elapsed();

        let mut tokens = 0;
        let mut failure: Option<AliasError> = None;
        for result in results {
            match result {
                Ok(n) => tokens += n,
                Err(e) => match &failure {
                    Some(prev) if !prev.is_secondary() || e.is_secondary() => {}
                    _ => failure = Some(e),
                },
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
        if tokens == 0 {
            warn!("training visited no tokens");
        }
        info!("trained {tokens} tokens in {:.2} s", elapsed.as_secs_f64());
        Ok(TrainReport {
            tokens_sampled: tokens,
            likelihoods: llh.into_reports(),
            elapsed,
        })
    }

    /// Write one line per document of `block`: the document id followed by
    /// ` topic:count` pairs, topics ascending.
    ///
    /// # Errors
    /// Propagates write failures.
    pub fn dump_doc_topic<W: Write>(&self, block: usize, mut out: W) -> Result<()> {
        for (i, doc) in self.blocks[block].docs().iter().enumerate() {
            write!(out, "{i}")?;
            for (topic, count) in doc.topic_histogram() {
                write!(out, " {topic}:{count}")?;
            }
            writeln!(out)?;
        }
        out.flush()?;
        Ok(())
    }
}

fn assign_topics<R: Rng + ?Sized>(doc: &mut Document, init: InitStrategy, num_topics: TopicId, rng: &mut R) {
    match init {
        InitStrategy::DocumentMaxWord => {
            let Some(&max) = doc.words().iter().max() else {
                return;
            };
            for i in 0..doc.len() {
                doc.set_topic(i, max % num_topics);
            }
        }
        InitStrategy::WordIdentity => {
            for i in 0..doc.len() {
                doc.set_topic(i, doc.word(i) % num_topics);
            }
        }
        InitStrategy::Uniform => {
            for i in 0..doc.len() {
                doc.set_topic(i, rng.random_range(0..num_topics));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::LikelihoodKind;
    use rand::Rng;

    fn corpus(num_blocks: usize, docs_per_block: usize, num_vocabs: u32, seed: u64) -> Vec<DataBlock> {
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        (0..num_blocks)
            .map(|_| {
                let docs = (0..docs_per_block)
                    .map(|_| {
                        let len = rng.random_range(0..30);
                        // skewed vocabulary so some rows go dense
                        let words = (0..len)
                            .map(|_| {
                                let a = rng.random_range(0..num_vocabs);
                                let b = rng.random_range(0..num_vocabs);
                                a.min(b)
                            })
                            .collect();
                        Document::new(words)
                    })
                    .collect();
                DataBlock::new(docs)
            })
            .collect()
    }

    fn assert_counts_match(lda: &LightLda) {
        let cfg = lda.config();
        let mut expected = vec![vec![0i32; cfg.num_topics]; cfg.num_vocabs];
        let mut summary = vec![0i64; cfg.num_topics];
        for doc in lda.blocks().iter().flat_map(|b| b.docs()) {
            for i in 0..doc.len() {
                expected[doc.word(i) as usize][doc.topic(i) as usize] += 1;
                summary[doc.topic(i) as usize] += 1;
            }
        }
        for (w, row) in expected.iter().enumerate() {
            for (k, &n) in row.iter().enumerate() {
                assert_eq!(lda.store().word_topic_count(w as u32, k as TopicId), n, "word {w} topic {k}");
            }
        }
        let mut got = Vec::new();
        lda.store().summary_row(&mut got);
        assert_eq!(got, summary);
    }

    #[test]
    fn multi_worker_training_keeps_counts_consistent() {
        let cfg = TrainerConfig::builder()
            .num_topics(8)
            .num_vocabs(40)
            .num_iterations(3)
            .num_local_workers(3)
            .slice_capacity(64)
            .build()
            .unwrap();
        let blocks = corpus(2, 25, 40, 11);
        let total: usize = blocks.iter().flat_map(|b| b.docs()).map(|d| d.len()).sum();
        let mut lda = LightLda::new(cfg, blocks).unwrap();
        assert!(lda.meta().local_vocab(0).num_slices() > 1);

        let report = lda.train().unwrap();
        assert_eq!(report.tokens_sampled, 3 * total as u64);
        assert_counts_match(&lda);

        // iterations 0 and 2 evaluate
        let docs: Vec<_> = report
            .likelihoods
            .iter()
            .filter(|r| r.kind == LikelihoodKind::Document)
            .collect();
        assert_eq!(docs.len(), 2 * 2);
        assert!(report.likelihoods.iter().all(|r| r.value.is_finite()));
    }

    #[test]
    fn asymmetric_prior_run() {
        let cfg = TrainerConfig::builder()
            .num_topics(6)
            .num_vocabs(20)
            .num_iterations(2)
            .num_local_workers(2)
            .asymmetric_alpha(Some(0.2))
            .init(InitStrategy::Uniform)
            .build()
            .unwrap();
        let mut lda = LightLda::new(cfg, corpus(1, 30, 20, 5)).unwrap();
        lda.train().unwrap();
        assert_counts_match(&lda);
    }

    #[test]
    fn word_identity_initialization() {
        let cfg = TrainerConfig::builder()
            .num_topics(3)
            .num_vocabs(10)
            .init(InitStrategy::WordIdentity)
            .build()
            .unwrap();
        let blocks = vec![DataBlock::new(vec![Document::new(vec![1, 4, 9])])];
        let mut lda = LightLda::new(cfg, blocks).unwrap();
        lda.initialize().unwrap();
        assert_eq!(lda.blocks()[0].docs()[0].topics(), &[1, 1, 0]);
        // idempotent
        lda.initialize().unwrap();
        assert_eq!(lda.store().summary_count(1), 2);
    }

    #[test]
    fn inconsistent_warm_start_aborts_every_worker() {
        let cfg = TrainerConfig::builder()
            .num_topics(4)
            .num_vocabs(6)
            .num_local_workers(3)
            .num_iterations(1)
            .warm_start(true)
            .build()
            .unwrap();
        let docs = vec![
            Document::with_topics(vec![5, 1], vec![1, 1]).unwrap(),
            Document::with_topics(vec![0, 2], vec![3, 3]).unwrap(),
            Document::with_topics(vec![4, 3, 2], vec![0, 2, 0]).unwrap(),
        ];
        let mut lda = LightLda::new(cfg, vec![DataBlock::new(docs)]).unwrap();
        // warm start skips the check; running it again cold does not
        lda.train().unwrap();

        let cfg = TrainerConfig {
            warm_start: false,
            ..lda.config().clone()
        };
        let docs = vec![
            Document::with_topics(vec![5, 1], vec![1, 1]).unwrap(),
            Document::with_topics(vec![0, 2], vec![3, 3]).unwrap(),
            Document::with_topics(vec![4, 3, 2], vec![0, 2, 0]).unwrap(),
        ];
        let mut lda = LightLda::new(cfg, vec![DataBlock::new(docs)]).unwrap();
        // initialize with warm start semantics to keep the bad assignment
        lda.cfg.warm_start = true;
        lda.initialize().unwrap();
        lda.cfg.warm_start = false;
        let err = lda.train().unwrap_err();
        assert!(matches!(
            err,
            AliasError::InvariantViolation { doc: 2, word: 3, topic: 2, expected: 0 }
        ));
    }

    #[test]
    fn rejects_out_of_range_words() {
        let cfg = TrainerConfig::builder().num_topics(2).num_vocabs(3).build().unwrap();
        let blocks = vec![DataBlock::new(vec![Document::new(vec![0, 3])])];
        assert!(matches!(LightLda::new(cfg, blocks), Err(AliasError::InvalidConfig(_))));
    }

    #[test]
    fn dump_lists_topic_histograms() {
        let cfg = TrainerConfig::builder()
            .num_topics(5)
            .num_vocabs(8)
            .warm_start(true)
            .build()
            .unwrap();
        let docs = vec![
            Document::with_topics(vec![1, 2, 3], vec![4, 0, 4]).unwrap(),
            Document::default(),
        ];
        let lda = LightLda::new(cfg, vec![DataBlock::new(docs)]).unwrap();
        let mut out = Vec::new();
        lda.dump_doc_topic(0, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "0 0:1 4:2\n1\n");
    }

    #[test]
    fn schedule_marks_only_the_last_task_final() {
        let cfg = TrainerConfig::builder()
            .num_topics(4)
            .num_vocabs(10)
            .num_iterations(2)
            .slice_capacity(8)
            .build()
            .unwrap();
        let lda = LightLda::new(cfg, corpus(2, 10, 10, 1)).unwrap();
        let tasks = lda.schedule();
        let per_iter: usize = (0..2).map(|b| lda.meta().local_vocab(b).num_slices()).sum();
        assert_eq!(tasks.len(), 2 * per_iter);
        assert_eq!(tasks.iter().filter(|t| t.is_final).count(), 1);
        assert!(tasks.last().unwrap().is_final);
    }
}
