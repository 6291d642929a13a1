// The assembler builds the linear instruction stream the CFG builder consumes. Branch
// targets are written symbolically as labels; the assembler records every label use and
// definition, and fix_labels later rewrites resolved uses into signed instruction deltas
// measured from the instruction after the branch. Unresolved uses are left as label
// operands for downstream stages to reject. Emission is positional: the cursor normally
// sits at the end of the stream, but it can be rewound to overwrite already-emitted
// instructions when a consumer patches code in place.

use crate::ir::{is_branch, Instruction, LabelId, NameId, Opcode, Operand, VarId};
use log::trace;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct LabelUse {
    label: LabelId,
    pos: usize,
}

/// Builder for a linear instruction stream with forward label references.
#[derive(Default)]
pub struct Assembler {
    insts: Vec<Instruction>,
    pos: usize,
    next_label: u32,
    label_defs: HashMap<LabelId, usize>,
    label_uses: Vec<LabelUse>,
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            insts: Vec::new(),
            pos: 0,
            next_label: 1,
            label_defs: HashMap::new(),
            label_uses: Vec::new(),
        }
    }

    /// The emitted stream.
    pub fn instructions(&self) -> &[Instruction] {
        &self.insts
    }

    /// Current emission position.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Rewinds or advances the emission position; emitting at a position
    /// inside the stream overwrites the instruction there.
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Resets the stream and all label state.
    pub fn clear(&mut self) {
        self.insts.clear();
        self.pos = 0;
        self.next_label = 1;
        self.label_defs.clear();
        self.label_uses.clear();
    }

    /// Creates a new unique label id.
    pub fn make_label(&mut self) -> LabelId {
        let id = LabelId(self.next_label);
        self.next_label += 1;
        id
    }

    /// Sets the definition of a label to the current stream position.
    pub fn mark_label(&mut self, id: LabelId) {
        self.label_defs.insert(id, self.pos);
    }

    /// `make_label` and `mark_label` in one step.
    pub fn make_and_mark_label(&mut self) -> LabelId {
        let id = self.make_label();
        self.mark_label(id);
        id
    }

    /// Rewrites every use of a defined label into an offset operand:
    /// the signed delta from the instruction after the branch to the
    /// definition. Uses of undefined labels are kept as label operands.
    /// Running this twice is the same as running it once.
    pub fn fix_labels(&mut self) {
        let defs = &self.label_defs;
        let insts = &mut self.insts;
        self.label_uses.retain(|use_| {
            if let Some(&def_pos) = defs.get(&use_.label) {
                let delta = def_pos as i32 - (use_.pos as i32 + 1);
                insts[use_.pos].oprs[0] = Some(Operand::Offset(delta));
                trace!("label {} at {} resolved to {delta:+}", use_.label, use_.pos);
                false
            } else {
                true
            }
        });
    }

    fn put(&mut self, inst: Instruction) {
        if self.pos < self.insts.len() {
            self.insts[self.pos] = inst;
        } else {
            self.insts.push(inst);
        }
        self.pos += 1;
    }

    fn emit_basic3(&mut self, op: Opcode, r: Operand, a: Operand, b: Operand) {
        assert!(
            matches!(r, Operand::Var(_)),
            "destination of {op:?} must be a variable"
        );
        let mut inst = Instruction::new(op);
        inst.oprs[0] = Some(r);
        inst.oprs[1] = Some(a);
        inst.oprs[2] = Some(b);
        self.put(inst);
    }

    fn emit_basic2(&mut self, op: Opcode, a: Operand, b: Operand) {
        let mut inst = Instruction::new(op);
        inst.oprs[0] = Some(a);
        inst.oprs[1] = Some(b);
        self.put(inst);
    }

    fn emit_basic1(&mut self, op: Opcode, opr: Operand) {
        if is_branch(op) {
            match opr {
                Operand::Label(label) => {
                    self.label_uses.push(LabelUse {
                        label,
                        pos: self.pos,
                    });
                }
                Operand::Offset(_) => {}
                other => panic!("branch operand must be a label or offset, got {other:?}"),
            }
        }
        let mut inst = Instruction::new(op);
        inst.oprs[0] = Some(opr);
        self.put(inst);
    }

    /// `dest = src`
    pub fn emit_assign(&mut self, dest: Operand, src: Operand) {
        assert!(
            matches!(dest, Operand::Var(_)),
            "assignment destination must be a variable"
        );
        self.emit_basic2(Opcode::Assign, dest, src);
    }

    /// `r = a + b`
    pub fn emit_assign_add(&mut self, r: Operand, a: Operand, b: Operand) {
        self.emit_basic3(Opcode::Add, r, a, b);
    }

    /// `r = a - b`
    pub fn emit_assign_sub(&mut self, r: Operand, a: Operand, b: Operand) {
        self.emit_basic3(Opcode::Sub, r, a, b);
    }

    /// `r = a * b`
    pub fn emit_assign_mul(&mut self, r: Operand, a: Operand, b: Operand) {
        self.emit_basic3(Opcode::Mul, r, a, b);
    }

    /// `r = a / b`
    pub fn emit_assign_div(&mut self, r: Operand, a: Operand, b: Operand) {
        self.emit_basic3(Opcode::Div, r, a, b);
    }

    /// `r = a % b`
    pub fn emit_assign_mod(&mut self, r: Operand, a: Operand, b: Operand) {
        self.emit_basic3(Opcode::Mod, r, a, b);
    }

    /// `cmp a, b`
    pub fn emit_cmp(&mut self, a: Operand, b: Operand) {
        self.emit_basic2(Opcode::Cmp, a, b);
    }

    pub fn emit_jmp(&mut self, target: Operand) {
        self.emit_basic1(Opcode::Jmp, target);
    }

    pub fn emit_je(&mut self, target: Operand) {
        self.emit_basic1(Opcode::Je, target);
    }

    pub fn emit_jne(&mut self, target: Operand) {
        self.emit_basic1(Opcode::Jne, target);
    }

    pub fn emit_jl(&mut self, target: Operand) {
        self.emit_basic1(Opcode::Jl, target);
    }

    pub fn emit_jle(&mut self, target: Operand) {
        self.emit_basic1(Opcode::Jle, target);
    }

    pub fn emit_jg(&mut self, target: Operand) {
        self.emit_basic1(Opcode::Jg, target);
    }

    pub fn emit_jge(&mut self, target: Operand) {
        self.emit_basic1(Opcode::Jge, target);
    }

    /// `ret x`
    pub fn emit_ret(&mut self, opr: Operand) {
        self.emit_basic1(Opcode::Ret, opr);
    }

    /// `call f(...)`; arguments go in via [`Instruction::push_extra`] on the
    /// returned instruction.
    pub fn emit_call(&mut self, target: NameId) -> &mut Instruction {
        let mut inst = Instruction::new(Opcode::Call);
        inst.oprs[0] = Some(Operand::Name(target));
        self.put(inst);
        let pos = self.pos - 1;
        &mut self.insts[pos]
    }

    /// `dest = call f(...)`
    pub fn emit_assign_call(&mut self, dest: VarId, target: NameId) -> &mut Instruction {
        let mut inst = Instruction::new(Opcode::AssignCall);
        inst.oprs[0] = Some(Operand::Var(dest));
        inst.oprs[1] = Some(Operand::Name(target));
        self.put(inst);
        let pos = self.pos - 1;
        &mut self.insts[pos]
    }

    /// `dest = phi(...)`
    pub fn emit_assign_phi(&mut self, dest: VarId) -> &mut Instruction {
        let mut inst = Instruction::new(Opcode::Phi);
        inst.oprs[0] = Some(Operand::Var(dest));
        self.put(inst);
        let pos = self.pos - 1;
        &mut self.insts[pos]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_and_backward_labels_resolve_to_deltas() {
        let mut asm = Assembler::new();
        let top = asm.make_and_mark_label();
        asm.emit_assign_add(
            Operand::Var(VarId::new(1)),
            Operand::Var(VarId::new(1)),
            Operand::Const(1),
        );
        asm.emit_cmp(Operand::Var(VarId::new(1)), Operand::Const(10));
        let done = asm.make_label();
        asm.emit_jge(Operand::Label(done));
        asm.emit_jmp(Operand::Label(top));
        asm.mark_label(done);
        asm.emit_ret(Operand::Var(VarId::new(1)));

        asm.fix_labels();
        // jge at 2 jumps to 4, jmp at 3 back to 0.
        assert_eq!(asm.instructions()[2].oprs[0], Some(Operand::Offset(1)));
        assert_eq!(asm.instructions()[3].oprs[0], Some(Operand::Offset(-4)));
    }

    #[test]
    fn fix_labels_is_idempotent_and_keeps_unresolved_uses() {
        let mut asm = Assembler::new();
        let never = asm.make_label();
        let here = asm.make_label();
        asm.emit_jmp(Operand::Label(never));
        asm.mark_label(here);
        asm.emit_jmp(Operand::Label(here));

        asm.fix_labels();
        let after_once = asm.instructions().to_vec();
        asm.fix_labels();
        assert_eq!(asm.instructions(), &after_once[..]);

        assert_eq!(after_once[0].oprs[0], Some(Operand::Label(never)));
        assert_eq!(after_once[1].oprs[0], Some(Operand::Offset(-1)));
    }

    #[test]
    fn set_pos_overwrites_in_place() {
        let mut asm = Assembler::new();
        asm.emit_assign(Operand::Var(VarId::new(1)), Operand::Const(1));
        asm.emit_assign(Operand::Var(VarId::new(2)), Operand::Const(2));
        asm.set_pos(0);
        asm.emit_assign(Operand::Var(VarId::new(1)), Operand::Const(9));
        assert_eq!(asm.instructions().len(), 2);
        assert_eq!(asm.instructions()[0].oprs[1], Some(Operand::Const(9)));
    }

    #[test]
    fn clear_resets_labels() {
        let mut asm = Assembler::new();
        let a = asm.make_label();
        assert_eq!(a, LabelId(1));
        asm.clear();
        assert_eq!(asm.make_label(), LabelId(1));
    }

    #[test]
    #[should_panic(expected = "branch operand")]
    fn branches_reject_variable_targets() {
        let mut asm = Assembler::new();
        asm.emit_jmp(Operand::Var(VarId::new(1)));
    }

    #[test]
    fn calls_carry_their_arguments_in_the_extra_list() {
        let mut asm = Assembler::new();
        asm.emit_assign(Operand::Var(VarId::new(1)), Operand::Const(3));
        asm.emit_call(NameId(2)).push_extra(Operand::Var(VarId::new(1)));
        asm.emit_assign_call(VarId::new(2), NameId(7))
            .push_extra(Operand::Var(VarId::new(1)))
            .push_extra(Operand::Const(5));

        let call = &asm.instructions()[1];
        assert_eq!(call.op, Opcode::Call);
        assert_eq!(call.oprs[0], Some(Operand::Name(NameId(2))));
        assert_eq!(call.def_var(), None);
        assert_eq!(call.used_vars(), vec![VarId::new(1)]);

        let assign_call = &asm.instructions()[2];
        assert_eq!(assign_call.op, Opcode::AssignCall);
        assert_eq!(assign_call.oprs[1], Some(Operand::Name(NameId(7))));
        assert_eq!(assign_call.def_var(), Some(VarId::new(2)));
        // The callee name and the constant argument are not variable uses.
        assert_eq!(assign_call.used_vars(), vec![VarId::new(1)]);
    }
}
