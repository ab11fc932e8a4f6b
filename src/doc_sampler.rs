//! Metropolis-Hastings document sampler driven by the alias proposals.

use rand::Rng;

use crate::alias::Proposals;
use crate::config::TrainerConfig;
use crate::corpus::{Document, LocalVocab};
use crate::model::Model;
use crate::{TopicId, WordId};

/// Per-document topic update run by each worker during the sampling phase.
pub trait DocSampler {
    /// Resample the tokens of `doc` whose word lies in `slice`, returning the
    /// number of tokens visited.
    fn sample_one_doc<M, R>(
        &mut self,
        doc: &mut Document,
        vocab: &LocalVocab,
        slice: usize,
        model: &M,
        proposals: &Proposals<'_>,
        rng: &mut R,
    ) -> usize
    where
        M: Model + ?Sized,
        R: Rng + ?Sized;

    /// Reusable document-topic counter, `num_topics` long.
    fn doc_topic_counter(&mut self) -> &mut [u32];
}

/// Cycles a word proposal and a document proposal `mh_steps` times per token.
#[derive(Debug, Clone)]
pub struct LightDocSampler {
    mh_steps: usize,
    beta: f32,
    beta_sum: f32,
    asymmetric: bool,
    doc_topic: Vec<u32>,
}

impl LightDocSampler {
    pub fn new(cfg: &TrainerConfig) -> Self {
        Self {
            mh_steps: cfg.mh_steps,
            beta: cfg.beta,
            beta_sum: cfg.beta_sum(),
            asymmetric: cfg.asymmetric_alpha.is_some(),
            doc_topic: vec![0; cfg.num_topics],
        }
    }

    /// Collapsed conditional of `topic` with the current token (topic `old`)
    /// removed from every count.
    fn target<M: Model + ?Sized>(
        &self,
        word: WordId,
        topic: TopicId,
        old: TopicId,
        model: &M,
        prior: &Proposals<'_>,
    ) -> f64 {
        let own = f64::from(u8::from(topic == old));
        let n_kd = (f64::from(self.doc_topic[topic as usize]) - own).max(0.0);
        let n_kw = (f64::from(model.word_topic_count(word, topic)) - own).max(0.0);
        let n_k = (model.summary_count(topic) as f64 - own).max(0.0);
        (n_kd + f64::from(prior.alpha_at(topic))) * (n_kw + f64::from(self.beta))
            / (n_k + f64::from(self.beta_sum))
    }

    fn word_proposal_mass<M: Model + ?Sized>(&self, word: WordId, topic: TopicId, model: &M) -> f64 {
        let n_kw = f64::from(model.word_topic_count(word, topic).max(0));
        let n_k = model.summary_count(topic).max(0) as f64;
        (n_kw + f64::from(self.beta)) / (n_k + f64::from(self.beta_sum))
    }

    fn doc_proposal_mass(&self, topic: TopicId, prior: &Proposals<'_>) -> f64 {
        f64::from(self.doc_topic[topic as usize]) + f64::from(prior.alpha_at(topic))
    }

    fn propose_from_doc<R: Rng + ?Sized>(&self, doc: &Document, prior: &Proposals<'_>, rng: &mut R) -> TopicId {
        let len = doc.len() as f32;
        let u = rng.random::<f32>() * (len + prior.asy_alpha_sum());
        if u < len {
            doc.topic(rng.random_range(0..doc.len()))
        } else if self.asymmetric {
            prior.propose_asymmetric_alpha(rng)
        } else {
            rng.random_range(0..prior.num_topics() as TopicId)
        }
    }
}

impl DocSampler for LightDocSampler {
    fn sample_one_doc<M, R>(
        &mut self,
        doc: &mut Document,
        vocab: &LocalVocab,
        slice: usize,
        model: &M,
        proposals: &Proposals<'_>,
        rng: &mut R,
    ) -> usize
    where
        M: Model + ?Sized,
        R: Rng + ?Sized,
    {
        if doc.is_empty() {
            return 0;
        }
        self.doc_topic.fill(0);
        doc.accumulate_topic_counts(&mut self.doc_topic);

        let mut visited = 0;
        for i in 0..doc.len() {
            let word = doc.word(i);
            if !vocab.contains(slice, word) {
                continue;
            }
            visited += 1;
            let old = doc.topic(i);
            let mut s = old;

            for _ in 0..self.mh_steps {
                let t = proposals.propose(word, rng);
                if t != s {
                    let ratio = self.target(word, t, old, model, proposals)
                        * self.word_proposal_mass(word, s, model)
                        / (self.target(word, s, old, model, proposals)
                            * self.word_proposal_mass(word, t, model));
                    if rng.random::<f64>() < ratio {
                        s = t;
                    }
                }

                let t = self.propose_from_doc(doc, proposals, rng);
                if t != s {
                    let ratio = self.target(word, t, old, model, proposals)
                        * self.doc_proposal_mass(s, proposals)
                        / (self.target(word, s, old, model, proposals)
                            * self.doc_proposal_mass(t, proposals));
                    if rng.random::<f64>() < ratio {
                        s = t;
                    }
                }
            }

            if s != old {
                self.doc_topic[old as usize] -= 1;
                self.doc_topic[s as usize] += 1;
                doc.set_topic(i, s);
                model.add_word_topic(word, old, -1);
                model.add_word_topic(word, s, 1);
                model.add_summary(old, -1);
                model.add_summary(s, 1);
            }
        }
        visited
    }

    fn doc_topic_counter(&mut self) -> &mut [u32] {
        &mut self.doc_topic
    }
}
