use crate::barrier::Phase;
use crate::{TopicId, WordId};

pub type Result<T, E = AliasError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum AliasError {
    #[error("weights slice is empty")]
    Empty,

    #[error("weights contain a negative value at index {index}: {value}")]
    Negative { index: usize, value: f32 },

    #[error("weights contain a non-finite value at index {index}")]
    NonFinite { index: usize },

    #[error("sum of weights is zero")]
    ZeroSum,

    /// A word has more nonzero topics than the index reserved for it.
    #[error("word {word} has {needed} nonzero topics but only {capacity} slots are reserved")]
    CapacityExceeded {
        word: WordId,
        needed: usize,
        capacity: usize,
    },

    #[error("word {word} has no reserved slot in the active alias index")]
    UnindexedWord { word: WordId },

    #[error("alias index was not installed before build")]
    IndexNotInstalled,

    #[error(
        "initial topic assignment is inconsistent: doc {doc}, word {word}, topic {topic}, expected {expected}"
    )]
    InvariantViolation {
        doc: usize,
        word: WordId,
        topic: TopicId,
        expected: TopicId,
    },

    #[error("barrier aborted by a failing worker")]
    BarrierAborted,

    #[error("barrier phase mismatch: waiting at {expected:?}, arrived at {found:?}")]
    PhaseMismatch { expected: Phase, found: Phase },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("worker {0} panicked")]
    WorkerPanicked(usize),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AliasError {
    /// Whether this error only reflects another worker's failure.
    pub fn is_secondary(&self) -> bool {
        matches!(self, AliasError::BarrierAborted)
    }
}
