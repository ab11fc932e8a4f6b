use rand::Rng;

use crate::pool::PooledSlot;
use crate::walker::AliasBin;
use crate::{TopicId, TopicSampler};

/// Which component of a word proposal produced a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// The word's own sparse slot.
    Word,
    /// The shared dense smoothing slot.
    Smoothing,
}

/// `PooledSlot` is the per-word sampler; wire it into the trait.
impl TopicSampler for PooledSlot<'_> {
    #[inline]
    fn height(&self) -> usize {
        self.load_height()
    }
    #[inline]
    fn mass(&self) -> f32 {
        self.load_mass()
    }
    #[inline]
    fn bin(&self, i: usize) -> AliasBin {
        self.load_bin(i)
    }
}

/// Draw from the mixture of `word` and `smoothing`, weighted by their masses.
///
/// A uniform value in `[0, word_mass + smoothing_mass)` picks the component;
/// the component then does its own alias draw. An empty word slot always
/// resolves to the smoothing slot.
#[inline]
pub fn draw_mixture<A, B, R>(word: &A, smoothing: &B, rng: &mut R) -> (Branch, TopicId)
where
    A: TopicSampler + ?Sized,
    B: TopicSampler + ?Sized,
    R: Rng + ?Sized,
{
    let word_mass = if word.height() == 0 {
        0.0
    } else {
        word.mass().max(0.0)
    };
    let u = rng.random::<f32>() * (word_mass + smoothing.mass());
    if u < word_mass {
        (Branch::Word, word.sample_topic(rng))
    } else {
        (Branch::Smoothing, smoothing.sample_topic(rng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walker::AliasSlot;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    #[test]
    fn mixture_branch_frequency_follows_masses() {
        // S = 3, D = 9
        let word = AliasSlot::new(&[1.0, 2.0]).unwrap();
        let smoothing = AliasSlot::new(&[3.0; 3]).unwrap();
        let mut rng = Pcg64Mcg::seed_from_u64(5);

        let draws = 200_000;
        let mut via_word = 0usize;
        for _ in 0..draws {
            if draw_mixture(&word, &smoothing, &mut rng).0 == Branch::Word {
                via_word += 1;
            }
        }
        let frac = via_word as f64 / draws as f64;
        assert!((frac - 0.25).abs() < 0.005, "frac={frac}");
    }

    #[test]
    fn mixture_matches_combined_distribution() {
        let word = AliasSlot::new(&[0.0, 4.0, 0.0, 1.0]).unwrap();
        let smoothing = AliasSlot::new(&[1.0, 1.0, 1.0, 2.0]).unwrap();
        let combined = [1.0, 5.0, 1.0, 3.0];
        let total: f64 = combined.iter().sum();
        let mut rng = Pcg64Mcg::seed_from_u64(17);

        let draws = 200_000;
        let mut counts = [0usize; 4];
        for _ in 0..draws {
            counts[draw_mixture(&word, &smoothing, &mut rng).1 as usize] += 1;
        }
        for (k, &c) in counts.iter().enumerate() {
            let emp = c as f64 / draws as f64;
            let want = combined[k] / total;
            assert!((emp - want).abs() < 0.006, "k={k} emp={emp} want={want}");
        }
    }

    #[test]
    fn empty_word_slot_uses_smoothing() {
        let word = AliasSlot::default();
        let smoothing = AliasSlot::new(&[1.0, 1.0]).unwrap();
        let mut rng = Pcg64Mcg::seed_from_u64(1);
        for _ in 0..1000 {
            assert_eq!(draw_mixture(&word, &smoothing, &mut rng).0, Branch::Smoothing);
        }
    }
}
