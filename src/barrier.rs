//! Phase-labelled barrier shared by the local workers.
//!
//! Every worker names the phase it is closing when it waits, so a worker that
//! drifts out of step is caught at the barrier instead of reading a half-built
//! table. A failing worker calls [`PhasedBarrier::abort`], which releases every
//! waiter with [`AliasError::BarrierAborted`].

use parking_lot::{Condvar, Mutex};

use crate::error::{AliasError, Result};

/// Synchronization points of one slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// The slice's alias index is installed; per-word builds may start.
    IndexInstalled,
    /// Per-word, smoothing and prior slots are built; sampling may start.
    SharedSlotsReady,
    /// Every worker finished sampling the slice.
    SamplingDone,
    /// Partial document likelihoods are merged.
    DocLikelihoodMerged,
    /// Partial word likelihoods are merged.
    WordLikelihoodMerged,
    /// Evaluation finished.
    EvaluationDone,
}

#[derive(Debug)]
struct State {
    arrived: usize,
    generation: u64,
    phase: Option<Phase>,
    aborted: bool,
}

#[derive(Debug)]
pub struct PhasedBarrier {
    parties: usize,
    state: Mutex<State>,
    cvar: Condvar,
}

impl PhasedBarrier {
    /// # Errors
    /// [`AliasError::InvalidConfig`] if `parties` is zero.
    pub fn new(parties: usize) -> Result<Self> {
        if parties == 0 {
            return Err(AliasError::InvalidConfig("barrier needs at least one party".into()));
        }
        Ok(Self {
            parties,
            state: Mutex::new(State {
                arrived: 0,
                generation: 0,
                phase: None,
                aborted: false,
            }),
            cvar: Condvar::new(),
        })
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Block until all parties arrive at `phase`.
    ///
    /// Returns `Ok(true)` on exactly one caller per release (the last to
    /// arrive). Writes made before the wait are visible to every caller after
    /// it returns.
    ///
    /// # Errors
    /// * [`AliasError::BarrierAborted`] if the barrier was aborted.
    /// * [`AliasError::PhaseMismatch`] if another party is waiting at a
    ///   different phase; the barrier is aborted as well.
    pub fn wait(&self, phase: Phase) -> Result<bool> {
        let mut st = self.state.lock();
        if st.aborted {
            return Err(AliasError::BarrierAborted);
        }
        match st.phase {
            None => st.phase = Some(phase),
            Some(expected) if expected != phase => {
                st.aborted = true;
                self.cvar.notify_all();
                return Err(AliasError::PhaseMismatch {
                    expected,
                    found: phase,
                });
            }
            Some(_) => {}
        }

        st.arrived += 1;
        if st.arrived == self.parties {
            st.arrived = 0;
            st.phase = None;
            st.generation = st.generation.wrapping_add(1);
            self.cvar.notify_all();
            return Ok(true);
        }

        let generation = st.generation;
        while st.generation == generation && !st.aborted {
            self.cvar.wait(&mut st);
        }
        if st.generation == generation {
            return Err(AliasError::BarrierAborted);
        }
        Ok(false)
    }

    /// Release every current and future waiter with an error.
    pub fn abort(&self) {
        let mut st = self.state.lock();
        st.aborted = true;
        self.cvar.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }
}
