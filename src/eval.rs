//! Log-likelihood terms and the accumulator workers merge them into.

use parking_lot::Mutex;
use statrs::function::gamma::ln_gamma;

use crate::alias::Proposals;
use crate::corpus::Document;
use crate::model::Model;
use crate::{TopicId, WordId};

/// Document term:
/// `Σ_{n_dk>0} [lnΓ(n_dk + α_k) − lnΓ(α_k)] + lnΓ(Σα) − lnΓ(N_d + Σα)`.
///
/// `counts` is caller-owned scratch of length `num_topics`; it is zeroed here.
pub fn doc_llh(doc: &Document, counts: &mut [u32], prior: &Proposals<'_>) -> f64 {
    counts.fill(0);
    doc.accumulate_topic_counts(counts);
    let alpha_sum = f64::from(prior.asy_alpha_sum());
    let mut llh = 0.0;
    for (k, &n) in counts.iter().enumerate() {
        if n > 0 {
            let a = f64::from(prior.alpha_at(k as TopicId));
            llh += ln_gamma(f64::from(n) + a) - ln_gamma(a);
        }
    }
    llh + ln_gamma(alpha_sum) - ln_gamma(doc.len() as f64 + alpha_sum)
}

/// Word term: `Σ_{n_kw>0} [lnΓ(n_kw + β) − lnΓ(β)]`.
pub fn word_llh<M: Model + ?Sized>(
    word: WordId,
    model: &M,
    beta: f32,
    row: &mut Vec<(TopicId, i32)>,
) -> f64 {
    model.word_topic_row(word, row);
    let beta = f64::from(beta);
    let lg_beta = ln_gamma(beta);
    row.iter()
        .filter(|&&(_, c)| c > 0)
        .map(|&(_, c)| ln_gamma(f64::from(c) + beta) - lg_beta)
        .sum()
}

/// Normalizer of the word likelihood: `Σ_k [lnΓ(β̄) − lnΓ(n_k + β̄)]`.
pub fn normalize_word_llh<M: Model + ?Sized>(model: &M, beta_sum: f32) -> f64 {
    let beta_sum = f64::from(beta_sum);
    let mut summary = Vec::new();
    model.summary_row(&mut summary);
    let lg = ln_gamma(beta_sum);
    summary
        .iter()
        .map(|&n| lg - ln_gamma(n.max(0) as f64 + beta_sum))
        .sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LikelihoodKind {
    Document,
    Word,
    NormalizedWord,
}

/// One logged likelihood value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LikelihoodReport {
    pub iteration: usize,
    pub block: usize,
    pub slice: usize,
    pub kind: LikelihoodKind,
    pub value: f64,
}

#[derive(Debug, Default)]
struct Sums {
    doc: f64,
    word: f64,
}

/// Partial sums for one evaluation pass plus every value reported so far.
#[derive(Debug, Default)]
pub struct LikelihoodAccumulator {
    sums: Mutex<Sums>,
    reports: Mutex<Vec<LikelihoodReport>>,
}

impl LikelihoodAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_doc(&self, partial: f64) {
        self.sums.lock().doc += partial;
    }

    pub fn add_word(&self, partial: f64) {
        self.sums.lock().word += partial;
    }

    /// Merged document likelihood; resets it for the next pass.
    pub fn take_doc(&self) -> f64 {
        std::mem::take(&mut self.sums.lock().doc)
    }

    /// Merged word likelihood; resets it for the next pass.
    pub fn take_word(&self) -> f64 {
        std::mem::take(&mut self.sums.lock().word)
    }

    pub fn record(&self, report: LikelihoodReport) {
        self.reports.lock().push(report);
    }

    pub fn reports(&self) -> Vec<LikelihoodReport> {
        self.reports.lock().clone()
    }

    pub fn into_reports(self) -> Vec<LikelihoodReport> {
        self.reports.into_inner()
    }
}
