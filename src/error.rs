//! Error types for the back-end core.
//!
//! Every stage surfaces failures through the single [`Error`] enum so
//! callers get block ids, instruction indices and variable ids for
//! diagnosis. Nothing here is recoverable: these conditions indicate a bug
//! in a consumer or in the pipeline itself.

use crate::cfg::{BlockId, CfgForm};
use crate::ir::LabelId;
use thiserror::Error;

/// Fatal conditions reported by the pipeline stages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("cannot build a control flow graph from an empty instruction stream")]
    EmptyStream,

    #[error("branch at instruction {index} still carries unresolved label {label}")]
    UnresolvedLabel { index: usize, label: LabelId },

    #[error("branch at instruction {index} does not carry an offset operand")]
    BadBranchOperand { index: usize },

    #[error("branch at instruction {index} targets {target}, outside the instruction stream")]
    BranchTargetOutOfRange { index: usize, target: isize },

    #[error("control flow graph is in {found:?} form, expected {expected:?}")]
    WrongCfgForm { expected: CfgForm, found: CfgForm },

    #[error("block {block} has no immediate dominator")]
    NoImmediateDominator { block: BlockId },

    #[error("block {block} has more than one immediate dominator candidate")]
    MultipleImmediateDominators { block: BlockId },

    #[error("use of variable t{base} before any definition")]
    UseBeforeDef { base: u32 },

    #[error("phi in block {block} has {args} arguments for {preds} predecessors")]
    PhiArityMismatch {
        block: BlockId,
        args: usize,
        preds: usize,
    },

    #[error("graph node {id} already exists")]
    DuplicateNode { id: usize },

    #[error("graph node {id} does not exist")]
    MissingNode { id: usize },

    #[error("self edge on graph node {id}")]
    SelfEdge { id: usize },

    #[error("register allocation requires at least one color")]
    NoColors,

    #[error("out of registers: live range {live_range} cannot be colored with {colors} colors")]
    OutOfRegisters { live_range: usize, colors: usize },
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
