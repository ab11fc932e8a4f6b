//! Walker's Alias Method for O(1) sampling from a discrete distribution over topics.
//!
//! Construction works on a caller-owned [`WalkerScratch`] so that a worker can
//! build thousands of slots per slice without reallocating its work stacks.

use crate::error::{AliasError, Result};
use crate::{TopicId, TopicSampler};

/// One bin of an alias slot.
///
/// A draw that lands in this bin returns `primary` when its uniform threshold
/// falls under `threshold`, and `alternate` otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AliasBin {
    pub threshold: f32,
    pub primary: TopicId,
    pub alternate: TopicId,
}

impl AliasBin {
    /// A bin that always yields `topic`.
    #[inline]
    pub const fn solid(topic: TopicId) -> Self {
        Self {
            threshold: 1.0,
            primary: topic,
            alternate: topic,
        }
    }
}

/// Per-worker reusable build state.
///
/// Holds the proportion array, the low/high work stacks and the output bins of
/// the most recent construction, plus row buffers used to read counts out of
/// the model. Never shared between threads.
#[derive(Debug, Default)]
pub struct WalkerScratch {
    pub(crate) proportions: Vec<(TopicId, f32)>,
    low: Vec<(TopicId, f64)>,
    high: Vec<(TopicId, f64)>,
    pub(crate) bins: Vec<AliasBin>,
    pub(crate) row: Vec<(TopicId, i32)>,
    pub(crate) summary: Vec<i64>,
}

impl WalkerScratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every buffer's storage.
    pub fn release(&mut self) {
        *self = Self::default();
    }

    /// Bins produced by the last [`build_bins`] call.
    pub fn bins(&self) -> &[AliasBin] {
        &self.bins
    }
}

/// Runs the Walker construction over `scratch.proportions`, leaving the bins in
/// `scratch.bins` and returning the total mass.
///
/// An empty or all-zero proportion array yields zero bins and zero mass; the
/// caller decides whether that is an error.
///
/// # Errors
/// * [`AliasError::NonFinite`] if a weight is `NaN` or infinite.
/// * [`AliasError::Negative`] if a weight is negative.
pub(crate) fn build_bins(scratch: &mut WalkerScratch) -> Result<f32> {
    let WalkerScratch {
        proportions,
        low,
        high,
        bins,
        ..
    } = scratch;
    bins.clear();
    low.clear();
    high.clear();

    let mut mass = 0.0f64;
    for (index, &(_, w)) in proportions.iter().enumerate() {
        if !w.is_finite() {
            return Err(AliasError::NonFinite { index });
        }
        if w.is_sign_negative() && w != 0.0 {
            return Err(AliasError::Negative { index, value: w });
        }
        mass += f64::from(w);
    }
    let k = proportions.len();
    if k == 0 || mass <= 0.0 {
        return Ok(0.0);
    }

    // Scale so average is 1.
    let scale = k as f64 / mass;
    for &(topic, w) in proportions.iter() {
        let share = f64::from(w) * scale;
        if share < 1.0 {
            low.push((topic, share));
        } else {
            high.push((topic, share));
        }
    }

    loop {
        match (low.pop(), high.pop()) {
            (Some((lt, ls)), Some((ht, hs))) => {
                bins.push(AliasBin {
                    threshold: ls as f32,
                    primary: lt,
                    alternate: ht,
                });
                // an exhausted entry still owns a bin, with threshold 0
                let rest = (hs - (1.0 - ls)).max(0.0);
                if rest < 1.0 {
                    low.push((ht, rest));
                } else {
                    high.push((ht, rest));
                }
            }
            // leftovers hold a share of 1 up to rounding
            (Some((topic, _)), None) | (None, Some((topic, _))) => {
                bins.push(AliasBin::solid(topic));
            }
            (None, None) => break,
        }
    }

    Ok(mass as f32)
}

/// An owned alias slot: the bins of one distribution and its total mass.
///
/// Used for the shared smoothing slot and the asymmetric prior; per-word
/// slots live in the [`SlotPool`](crate::pool::SlotPool) instead.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AliasSlot {
    bins: Vec<AliasBin>,
    mass: f32,
}

impl AliasSlot {
    /// Construct a slot from non-negative weights, topic `i` having weight
    /// `weights[i]`. O(n).
    ///
    /// # Errors
    /// * [`AliasError::Empty`] if `weights` is empty.
    /// * [`AliasError::Negative`] / [`AliasError::NonFinite`] for bad entries.
    /// * [`AliasError::ZeroSum`] if every weight is zero.
    pub fn new(weights: &[f32]) -> Result<Self> {
        if weights.is_empty() {
            return Err(AliasError::Empty);
        }
        let mut scratch = WalkerScratch::new();
        scratch.proportions.extend(
            weights
                .iter()
                .enumerate()
                .map(|(k, &w)| (k as TopicId, w)),
        );
        let mut slot = Self::default();
        slot.rebuild(&mut scratch)?;
        if slot.mass <= 0.0 {
            return Err(AliasError::ZeroSum);
        }
        Ok(slot)
    }

    /// Rebuild in place from `scratch.proportions`, reusing the bin storage.
    pub(crate) fn rebuild(&mut self, scratch: &mut WalkerScratch) -> Result<()> {
        self.mass = build_bins(scratch)?;
        self.bins.clone_from(&scratch.bins);
        Ok(())
    }

    pub fn bins(&self) -> &[AliasBin] {
        &self.bins
    }

    pub(crate) fn from_parts(bins: Vec<AliasBin>, mass: f32) -> Self {
        Self { bins, mass }
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn clear(&mut self) {
        self.bins = Vec::new();
        self.mass = 0.0;
    }

    /// Draw k samples, returning counts per topic (useful for checks).
    #[cfg(test)]
    pub fn sample_counts<R: rand::Rng + ?Sized>(
        &self,
        rng: &mut R,
        num_topics: usize,
        draws: usize,
    ) -> Vec<usize> {
        let mut counts = vec![0usize; num_topics];
        for _ in 0..draws {
            counts[self.sample_topic(rng) as usize] += 1;
        }
        counts
    }
}

impl TopicSampler for AliasSlot {
    #[inline]
    fn height(&self) -> usize {
        self.bins.len()
    }
    #[inline]
    fn mass(&self) -> f32 {
        self.mass
    }
    #[inline]
    fn bin(&self, i: usize) -> AliasBin {
        self.bins[i]
    }
}
