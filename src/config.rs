//! Training configuration.

use serde::{Deserialize, Serialize};

use crate::error::{AliasError, Result};

/// How topics are assigned before the first iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStrategy {
    /// Every token of a document gets `max_word_id(doc) mod num_topics`.
    #[default]
    DocumentMaxWord,
    /// Every token gets `word mod num_topics`.
    WordIdentity,
    /// Seeded uniform draw per token.
    Uniform,
}

/// Hyperparameters and run shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub num_topics: usize,
    pub num_vocabs: usize,
    /// Symmetric document-topic prior per topic.
    pub alpha: f32,
    /// Symmetric topic-word prior.
    pub beta: f32,
    /// When set, the document prior follows global topic popularity with
    /// this per-topic concentration.
    pub asymmetric_alpha: Option<f32>,
    pub mh_steps: usize,
    pub num_iterations: usize,
    pub num_local_workers: usize,
    /// Slack multiplier on a word's frequency when reserving its slot.
    pub load_factor: usize,
    /// Evaluate likelihood on iterations divisible by this; 0 disables it.
    pub eval_every: usize,
    /// Maximum bins reserved per slice.
    pub slice_capacity: usize,
    pub seed: u64,
    pub init: InitStrategy,
    /// Keep the topics already present in the documents.
    pub warm_start: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            num_topics: 100,
            num_vocabs: 0,
            alpha: 0.1,
            beta: 0.01,
            asymmetric_alpha: None,
            mh_steps: 2,
            num_iterations: 100,
            num_local_workers: 1,
            load_factor: 2,
            eval_every: 2,
            slice_capacity: 1 << 26,
            seed: 1,
            init: InitStrategy::default(),
            warm_start: false,
        }
    }
}

impl TrainerConfig {
    #[must_use]
    pub fn builder() -> TrainerBuilder {
        TrainerBuilder::default()
    }

    /// Sum of the symmetric prior over all topics.
    pub fn alpha_sum(&self) -> f32 {
        self.alpha * self.num_topics as f32
    }

    /// `beta * num_vocabs`.
    pub fn beta_sum(&self) -> f32 {
        self.beta * self.num_vocabs as f32
    }

    /// Whether iteration `iter` runs the evaluation phase.
    pub fn evaluates(&self, iter: usize) -> bool {
        self.eval_every != 0 && iter % self.eval_every == 0
    }

    /// # Errors
    /// [`AliasError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: &str) -> Result<()> {
            Err(AliasError::InvalidConfig(msg.into()))
        }
        if self.num_topics == 0 {
            return invalid("num_topics must be positive");
        }
        if self.num_topics > u32::MAX as usize {
            return invalid("num_topics must fit in u32");
        }
        if self.num_vocabs == 0 {
            return invalid("num_vocabs must be positive");
        }
        if self.num_local_workers == 0 {
            return invalid("num_local_workers must be positive");
        }
        if self.num_iterations == 0 {
            return invalid("num_iterations must be positive");
        }
        if self.load_factor == 0 {
            return invalid("load_factor must be positive");
        }
        if self.mh_steps == 0 {
            return invalid("mh_steps must be positive");
        }
        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            return invalid("alpha must be finite and positive");
        }
        if !(self.beta.is_finite() && self.beta > 0.0) {
            return invalid("beta must be finite and positive");
        }
        if let Some(a) = self.asymmetric_alpha {
            if !(a.is_finite() && a > 0.0) {
                return invalid("asymmetric_alpha must be finite and positive");
            }
        }
        if self.slice_capacity < self.num_topics {
            return invalid("slice_capacity must hold at least one dense slot");
        }
        Ok(())
    }
}

/// Chainable builder for [`TrainerConfig`].
#[derive(Debug, Clone, Default)]
pub struct TrainerBuilder {
    cfg: TrainerConfig,
}

impl TrainerBuilder {
    pub fn num_topics(mut self, n: usize) -> Self {
        self.cfg.num_topics = n;
        self
    }
    pub fn num_vocabs(mut self, n: usize) -> Self {
        self.cfg.num_vocabs = n;
        self
    }
    pub fn alpha(mut self, a: f32) -> Self {
        self.cfg.alpha = a;
        self
    }
    pub fn beta(mut self, b: f32) -> Self {
        self.cfg.beta = b;
        self
    }
    pub fn asymmetric_alpha(mut self, a: Option<f32>) -> Self {
        self.cfg.asymmetric_alpha = a;
        self
    }
    pub fn mh_steps(mut self, n: usize) -> Self {
        self.cfg.mh_steps = n;
        self
    }
    pub fn num_iterations(mut self, n: usize) -> Self {
        self.cfg.num_iterations = n;
        self
    }
    pub fn num_local_workers(mut self, n: usize) -> Self {
        self.cfg.num_local_workers = n;
        self
    }
    pub fn load_factor(mut self, n: usize) -> Self {
        self.cfg.load_factor = n;
        self
    }
    pub fn eval_every(mut self, n: usize) -> Self {
        self.cfg.eval_every = n;
        self
    }
    pub fn slice_capacity(mut self, n: usize) -> Self {
        self.cfg.slice_capacity = n;
        self
    }
    pub fn seed(mut self, seed: u64) -> Self {
        self.cfg.seed = seed;
        self
    }
    pub fn init(mut self, init: InitStrategy) -> Self {
        self.cfg.init = init;
        self
    }
    pub fn warm_start(mut self, on: bool) -> Self {
        self.cfg.warm_start = on;
        self
    }

    /// # Errors
    /// See [`TrainerConfig::validate`].
    pub fn build(self) -> Result<TrainerConfig> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}
