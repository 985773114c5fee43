use bindplace_ir::BlockId;
use thiserror::Error;

/// Errors detected before a dataflow problem is solved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    #[error("scope `{0}` has no entry block")]
    MissingEntry(String),

    #[error("cfg entry `{cfg}` differs from layout entry `{layout}`")]
    EntryMismatch { cfg: BlockId, layout: BlockId },

    #[error("`{0}` is not reachable from the entry block")]
    UnreachableBlock(BlockId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RewriteError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error("invariant violated in scope `{scope}`: {violation}")]
    InvariantViolation { scope: String, violation: Violation },
}

/// A rule broken by a rewritten scope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("insertion point of `{0}` is not in the layout")]
    MissingInsertionPoint(&'static str),

    #[error("`{0}` branches to a block missing from the layout")]
    BranchToMissingBlock(BlockId),

    #[error("handler of `{0}` is missing from the layout")]
    HandlerNotInLayout(BlockId),

    #[error("instruction positions of `{0}` are not increasing")]
    PositionNotIncreasing(BlockId),

    #[error("terminator in the middle of `{0}`")]
    TerminatorNotLast(BlockId),

    #[error("binding instruction without a frame allocation")]
    MissingAlloc,

    #[error("frame allocated more than once")]
    DuplicateAlloc,

    #[error("frame allocated outside the entry block in `{0}`")]
    AllocOutsideEntry(BlockId),

    #[error("binding instruction before the frame allocation")]
    BindingBeforeAlloc,

    #[error("binding instruction on a temporary")]
    BindingOfTemporary,
}
