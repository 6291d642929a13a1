// This suite drives SSA construction end to end: phi placement at the join of an
// if/then/else, loop-carried names around a back edge, and the failure path for a use
// without any definition. The if/then/else expectations are golden renderings, so they pin
// down the complete naming scheme: subscripts count up from one per base, the join's phi
// takes one argument per predecessor in predecessor order, and uses reach back to the
// name on top of the stack at their position in the dominator tree.

use tacback::{
    build_cfg, to_ssa, Assembler, BlockId, Cfg, CfgForm, Error, NameId, Opcode, Operand, Printer,
    VarId,
};

fn var(base: u32) -> Operand {
    Operand::Var(VarId::new(base))
}

/// t1=5; t2=7; t3=t1+t2; cmp t3,8; jle else; t3=t3+3; jmp end;
/// else: t3=t3*2; end: t4=1; t5=t3+t4
fn if_then_else() -> Cfg {
    let mut asm = Assembler::new();
    asm.emit_assign(var(1), Operand::Const(5));
    asm.emit_assign(var(2), Operand::Const(7));
    asm.emit_assign_add(var(3), var(1), var(2));

    let lbl_else = asm.make_label();
    asm.emit_cmp(var(3), Operand::Const(8));
    asm.emit_jle(Operand::Label(lbl_else));

    asm.emit_assign_add(var(3), var(3), Operand::Const(3));
    let lbl_end = asm.make_label();
    asm.emit_jmp(Operand::Label(lbl_end));

    asm.mark_label(lbl_else);
    asm.emit_assign_mul(var(3), var(3), Operand::Const(2));

    asm.mark_label(lbl_end);
    asm.emit_assign(var(4), Operand::Const(1));
    asm.emit_assign_add(var(5), var(3), var(4));

    asm.fix_labels();
    build_cfg(asm.instructions()).unwrap()
}

#[test]
fn if_then_else_gets_a_phi_at_the_join() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut cfg = if_then_else();
    to_ssa(&mut cfg).unwrap();
    assert_eq!(cfg.form(), CfgForm::Ssa);

    let p = Printer::new();
    assert_eq!(
        p.print_basic_block(cfg.block(BlockId(1))),
        "Basic Block #1\n\
         --------------\n\
         0: t1_1 = 5\n\
         1: t2_1 = 7\n\
         2: t3_1 = t1_1 + t2_1\n\
         3: cmp t3_1, 8\n\
         4: jle 7\n\
         --------------\n\
         Prev: none\n\
         Next: #3 #2"
    );

    assert_eq!(
        p.print_basic_block(cfg.block(BlockId(2))),
        "Basic Block #2\n\
         --------------\n\
         5: t3_4 = t3_1 + 3\n\
         6: jmp 8\n\
         --------------\n\
         Prev: #1\n\
         Next: #4"
    );

    assert_eq!(
        p.print_basic_block(cfg.block(BlockId(3))),
        "Basic Block #3\n\
         --------------\n\
         7: t3_3 = t3_1 * 2\n\
         --------------\n\
         Prev: #1\n\
         Next: #4"
    );

    assert_eq!(
        p.print_basic_block(cfg.block(BlockId(4))),
        "Basic Block #4\n\
         --------------\n\
         8: t3_2 = phi(t3_3, t3_4)\n\
         9: t4_1 = 1\n\
         10: t5_1 = t3_2 + t4_1\n\
         --------------\n\
         Prev: #3 #2\n\
         Next: none"
    );
}

#[test]
fn every_ssa_name_has_exactly_one_definition() {
    let mut cfg = if_then_else();
    to_ssa(&mut cfg).unwrap();

    let mut defs = Vec::new();
    for block in cfg.blocks() {
        for inst in block.instructions() {
            if let Some(def) = inst.def_var() {
                assert!(def.subscript() > 0, "{def} kept a pre-ssa subscript");
                defs.push(def);
            }
        }
    }
    let total = defs.len();
    defs.sort();
    defs.dedup();
    assert_eq!(defs.len(), total, "some name was defined twice");
}

#[test]
fn phi_arity_matches_predecessor_count() {
    let mut cfg = if_then_else();
    to_ssa(&mut cfg).unwrap();

    for block in cfg.blocks() {
        for inst in block.instructions() {
            if inst.op == Opcode::Phi {
                assert_eq!(inst.extra.len(), block.predecessors().len());
            }
        }
    }
}

#[test]
fn loop_header_merges_entry_and_back_edge() {
    // t1=0; top: t1=t1+1; cmp t1,10; jl top; ret t1
    let mut asm = Assembler::new();
    asm.emit_assign(var(1), Operand::Const(0));
    let top = asm.make_and_mark_label();
    asm.emit_assign_add(var(1), var(1), Operand::Const(1));
    asm.emit_cmp(var(1), Operand::Const(10));
    asm.emit_jl(Operand::Label(top));
    asm.emit_ret(var(1));
    asm.fix_labels();

    let mut cfg = build_cfg(asm.instructions()).unwrap();
    to_ssa(&mut cfg).unwrap();

    let header = cfg.block(BlockId(2));
    assert_eq!(header.predecessors(), &[BlockId(2), BlockId(1)]);

    let p = Printer::new();
    assert_eq!(
        p.print_basic_block(header),
        "Basic Block #2\n\
         --------------\n\
         1: t1_2 = phi(t1_3, t1_1)\n\
         2: t1_3 = t1_2 + 1\n\
         3: cmp t1_3, 10\n\
         4: jl 2\n\
         --------------\n\
         Prev: #2 #1\n\
         Next: #2 #3"
    );
}

#[test]
fn call_arguments_are_renamed_like_other_uses() {
    // t1=3; jle skip; t1=4; skip: t2=call n7(t1); ret t2
    let mut asm = Assembler::new();
    asm.emit_assign(var(1), Operand::Const(3));
    let skip = asm.make_label();
    asm.emit_jle(Operand::Label(skip));
    asm.emit_assign(var(1), Operand::Const(4));
    asm.mark_label(skip);
    asm.emit_assign_call(VarId::new(2), NameId(7)).push_extra(var(1));
    asm.emit_ret(var(2));
    asm.fix_labels();

    let mut cfg = build_cfg(asm.instructions()).unwrap();
    to_ssa(&mut cfg).unwrap();

    // The call's argument picks up the phi-merged name at the join.
    let p = Printer::new();
    assert_eq!(
        p.print_basic_block(cfg.block(BlockId(3))),
        "Basic Block #3\n\
         --------------\n\
         3: t1_2 = phi(t1_3, t1_1)\n\
         4: t2_1 = call n7(t1_2)\n\
         5: ret t2_1\n\
         --------------\n\
         Prev: #2 #1\n\
         Next: none"
    );
}

#[test]
fn use_without_any_definition_fails_renaming() {
    let mut asm = Assembler::new();
    asm.emit_ret(var(9));
    let mut cfg = build_cfg(asm.instructions()).unwrap();

    let err = to_ssa(&mut cfg).unwrap_err();
    assert_eq!(err, Error::UseBeforeDef { base: 9 });
}

#[test]
fn ssa_form_is_a_precondition_violation_for_to_ssa() {
    let mut cfg = if_then_else();
    to_ssa(&mut cfg).unwrap();

    let err = to_ssa(&mut cfg).unwrap_err();
    assert_eq!(
        err,
        Error::WrongCfgForm {
            expected: CfgForm::Normal,
            found: CfgForm::Ssa,
        }
    );
}
