//! tacback - SSA-based back-end core for a three-address IR.
//!
//! The crate takes a linear three-address instruction stream and carries
//! it through the middle of a native back-end: control-flow construction,
//! data-flow analysis, SSA conversion and graph-coloring register
//! allocation. Instruction selection, encoding and object-file layout are
//! consumers of the allocated graph and live elsewhere.
//!
//! # Primary Usage
//!
//! ```
//! use tacback::{allocate, build_cfg, to_ssa, Assembler, Operand, VarId};
//!
//! let mut asm = Assembler::new();
//! asm.emit_assign(Operand::Var(VarId::new(1)), Operand::Const(5));
//! asm.emit_ret(Operand::Var(VarId::new(1)));
//! asm.fix_labels();
//!
//! let mut cfg = build_cfg(asm.instructions()).unwrap();
//! to_ssa(&mut cfg).unwrap();
//! let coloring = allocate(&mut cfg, 4).unwrap();
//! assert_eq!(coloring.color_of(VarId::ssa(1, 1)), Some(0));
//! ```
//!
//! # Architecture
//!
//! - [`ir`] - opcodes, operands, instructions and identifier types
//! - [`assembler`] - stream building and label resolution
//! - [`cfg`] - basic blocks and control-flow construction
//! - [`analysis`] - reaching definitions, dominance and liveness over a
//!   shared fixed-point solver
//! - [`ssa`] - phi placement and renaming
//! - [`regalloc`] - live ranges, interference and coloring with spilling
//! - [`printer`] - debug rendering of instructions and blocks

pub mod analysis;
pub mod assembler;
pub mod cfg;
pub mod error;
pub mod ir;
pub mod printer;
pub mod regalloc;
pub mod ssa;

pub use analysis::{dominance, liveness, reaching_definitions, DomInfo, Liveness, ReachingDefs};
pub use assembler::Assembler;
pub use cfg::{build_cfg, BasicBlock, BlockId, Cfg, CfgForm};
pub use error::{Error, Result};
pub use ir::{
    has_extra, is_assign, operand_count, Instruction, LabelId, NameId, Opcode, OpcodeClass,
    Operand, VarId,
};
pub use printer::Printer;
pub use regalloc::{allocate, Coloring, UndirectedGraph};
pub use ssa::to_ssa;
