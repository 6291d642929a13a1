//! Debug pretty-printer for instructions and basic blocks.
//!
//! Instruction indices in a block listing are stream positions (the
//! block's base plus the offset inside the block), and a resolved branch
//! is shown with its absolute target index rather than the raw delta.

use crate::cfg::{BasicBlock, BlockId};
use crate::ir::{Instruction, Opcode, Operand};
use std::fmt::Write;

/// Renders instructions and blocks for diagnostics and tests.
#[derive(Debug, Default)]
pub struct Printer;

impl Printer {
    pub fn new() -> Self {
        Self
    }

    /// Renders a single instruction. Branch offsets print as raw deltas
    /// since there is no stream position to resolve them against.
    pub fn print_instruction(&self, inst: &Instruction) -> String {
        self.render_instruction(inst, None)
    }

    /// Renders a block: header, instructions at their stream positions,
    /// and predecessor/successor footers.
    pub fn print_basic_block(&self, block: &BasicBlock) -> String {
        let mut out = String::new();
        let header = format!("Basic Block {}", block.id());
        writeln!(out, "{header}").unwrap();
        let rule = "-".repeat(header.len());
        writeln!(out, "{rule}").unwrap();
        for (i, inst) in block.instructions().iter().enumerate() {
            let at = block.base() + i;
            writeln!(out, "{at}: {}", self.render_instruction(inst, Some(at))).unwrap();
        }
        writeln!(out, "{rule}").unwrap();
        writeln!(out, "Prev: {}", render_links(block.predecessors())).unwrap();
        write!(out, "Next: {}", render_links(block.successors())).unwrap();
        out
    }

    fn render_instruction(&self, inst: &Instruction, at: Option<usize>) -> String {
        let opr = |slot: usize| self.render_operand(inst.oprs[slot].as_ref(), at);
        match inst.op {
            Opcode::Assign => format!("{} = {}", opr(0), opr(1)),
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                format!("{} = {} {} {}", opr(0), opr(1), mnemonic(inst.op), opr(2))
            }
            Opcode::Phi => format!("{} = phi({})", opr(0), self.render_extra(inst, at)),
            Opcode::AssignCall => {
                format!("{} = call {}({})", opr(0), opr(1), self.render_extra(inst, at))
            }
            Opcode::Call => format!("call {}({})", opr(0), self.render_extra(inst, at)),
            Opcode::Cmp => format!("cmp {}, {}", opr(0), opr(1)),
            Opcode::Jmp
            | Opcode::Je
            | Opcode::Jne
            | Opcode::Jl
            | Opcode::Jle
            | Opcode::Jg
            | Opcode::Jge => format!("{} {}", mnemonic(inst.op), opr(0)),
            Opcode::Ret => format!("ret {}", opr(0)),
            Opcode::Load => format!("load {}", opr(0)),
            Opcode::Store => format!("store {}", opr(0)),
            Opcode::Unload => format!("unload {}", opr(0)),
        }
    }

    fn render_extra(&self, inst: &Instruction, at: Option<usize>) -> String {
        inst.extra
            .iter()
            .map(|opr| self.render_operand(Some(opr), at))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn render_operand(&self, opr: Option<&Operand>, at: Option<usize>) -> String {
        match opr {
            Some(Operand::Const(value)) => value.to_string(),
            Some(Operand::Var(var)) => var.to_string(),
            Some(Operand::Label(label)) => label.to_string(),
            Some(Operand::Offset(delta)) => match at {
                // The delta is anchored after the branch.
                Some(at) => (at as isize + 1 + *delta as isize).to_string(),
                None => delta.to_string(),
            },
            Some(Operand::Name(name)) => name.to_string(),
            None => "?".to_string(),
        }
    }
}

fn render_links(ids: &[BlockId]) -> String {
    if ids.is_empty() {
        "none".to_string()
    } else {
        ids.iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn mnemonic(op: Opcode) -> &'static str {
    match op {
        Opcode::Add => "+",
        Opcode::Sub => "-",
        Opcode::Mul => "*",
        Opcode::Div => "/",
        Opcode::Mod => "%",
        Opcode::Jmp => "jmp",
        Opcode::Je => "je",
        Opcode::Jne => "jne",
        Opcode::Jl => "jl",
        Opcode::Jle => "jle",
        Opcode::Jg => "jg",
        Opcode::Jge => "jge",
        _ => unreachable!("no mnemonic for {op:?}"),
    }
}
