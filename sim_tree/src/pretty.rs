// Copyright 2026 the Sim Tree Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Plain-text rendering of a program's node tree for diagnostics.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write;

use crate::program::{FuncId, Node, NodeId, NodeKind, Program};

/// Renders every function and global of `program` as an indented tree.
#[must_use]
pub fn program_to_text(program: &Program) -> String {
    let mut out = String::new();
    for (i, g) in program.globals().iter().enumerate() {
        let _ = writeln!(
            out,
            "global {} \"{}\" size={}",
            i,
            program.name_str(g.name),
            g.size
        );
        if let Some(init) = g.init {
            write_node(&mut out, program, init, 1);
        }
    }
    for (i, f) in program.functions().iter().enumerate() {
        let _ = writeln!(
            out,
            "fn {} \"{}\" frame={}",
            i,
            program.name_str(f.name),
            f.stack_size
        );
        write_node(&mut out, program, f.code, 1);
    }
    out
}

/// Renders one function's body as an indented tree.
#[must_use]
pub fn function_to_text(program: &Program, func: FuncId) -> String {
    let mut out = String::new();
    write_node(&mut out, program, program.function(func).code, 0);
    out
}

fn write_node(out: &mut String, program: &Program, id: NodeId, depth: usize) {
    let node = program.node(id);
    for _ in 0..depth {
        out.push_str("  ");
    }
    out.push_str(&label(program, node));
    out.push('\n');
    let mut children = Vec::new();
    node.kind.collect_children(&mut children);
    for child in children {
        write_node(out, program, child, depth + 1);
    }
}

fn label(program: &Program, node: &Node) -> String {
    match &node.kind {
        NodeKind::Const(c) => {
            format!("const {:#x}:{:#x}", c.u64_pair(0), c.u64_pair(1))
        }
        NodeKind::GetLocal { offset } => format!("local @{offset}"),
        NodeKind::GetLocalR2V { offset, ty } => format!("local.{} @{offset}", ty.name()),
        NodeKind::GetLocalRef { offset } => format!("local.ref @{offset}"),
        NodeKind::GetLocalRefR2V { offset, ty } => {
            format!("local.ref.{} @{offset}", ty.name())
        }
        NodeKind::InitLocal { offset, size } => format!("init.local @{offset} size={size}"),
        NodeKind::GetArgument { index } => format!("arg {index}"),
        NodeKind::GetArgumentRef { index } => format!("arg.ref {index}"),
        NodeKind::GetArgumentR2V { index, ty } => format!("arg.{} {index}", ty.name()),
        NodeKind::GetBlockArgument { index, offset } => {
            format!("block.arg {index} @{offset}")
        }
        NodeKind::GetBlockArgumentR2V { index, offset, ty } => {
            format!("block.arg.{} {index} @{offset}", ty.name())
        }
        NodeKind::GetGlobal { index } => {
            format!("global \"{}\"", program.name_str(program.global(*index).name))
        }
        NodeKind::GetGlobalR2V { index, ty } => format!(
            "global.{} \"{}\"",
            ty.name(),
            program.name_str(program.global(*index).name)
        ),
        NodeKind::FieldDeref { offset, .. } => format!("field +{offset}"),
        NodeKind::FieldDerefR2V { offset, ty, .. } => {
            format!("field.{} +{offset}", ty.name())
        }
        NodeKind::PtrFieldDeref { offset, .. } => format!("ptr.field +{offset}"),
        NodeKind::PtrFieldDerefR2V { offset, ty, .. } => {
            format!("ptr.field.{} +{offset}", ty.name())
        }
        NodeKind::SafeFieldDeref { offset, .. } => format!("safe.field +{offset}"),
        NodeKind::SafeFieldDerefPtr { offset, .. } => format!("safe.ptr.field +{offset}"),
        NodeKind::At { stride, range, .. } => format!("at stride={stride} range={range}"),
        NodeKind::Ref2Value { ty, .. } => format!("ref2value.{}", ty.name()),
        NodeKind::Ptr2Ref { .. } => String::from("ptr2ref"),
        NodeKind::NullCoalescing { ty, .. } => format!("coalesce.{}", ty.name()),
        NodeKind::NullCoalescingRef { .. } => String::from("coalesce.ref"),
        NodeKind::CopyValue { ty, .. } => format!("copy.{}", ty.name()),
        NodeKind::CopyRefValue { size, .. } => format!("copy.ref size={size}"),
        NodeKind::MoveRefValue { size, .. } => format!("move.ref size={size}"),
        NodeKind::Block { .. } => String::from("block"),
        NodeKind::ClosureBlock { need_result, .. } => {
            format!("closure.block result={need_result}")
        }
        NodeKind::Let { .. } => String::from("let"),
        NodeKind::IfThenElse { .. } => String::from("if"),
        NodeKind::While { .. } => String::from("while"),
        NodeKind::For { sources, .. } => format!("for x{}", sources.len()),
        NodeKind::Break => String::from("break"),
        NodeKind::Return { .. } => String::from("return"),
        NodeKind::Yield { .. } => String::from("yield"),
        NodeKind::TryCatch { .. } => String::from("try/catch"),
        NodeKind::Call { func, .. } => {
            format!("call \"{}\"", program.name_str(program.function(*func).name))
        }
        NodeKind::Invoke { .. } => String::from("invoke"),
        NodeKind::HostCall { symbol, .. } => {
            format!("host.call \"{}\"", program.name_str(*symbol))
        }
        NodeKind::MakeBlock { args_slot, .. } => format!("make.block @{args_slot}"),
        NodeKind::Cast { from, to, .. } => format!("cast {}->{}", from.name(), to.name()),
        NodeKind::LexicalCast { ty, .. } => format!("lexical.cast {}", ty.name()),
        NodeKind::VecCtorFloat { args } => format!("float{}", args.len()),
        NodeKind::VecCtorInt { args } => format!("int{}", args.len()),
        NodeKind::New { bytes } => format!("new {bytes}"),
        NodeKind::Debug { .. } => String::from("debug"),
        NodeKind::Assert { message, .. } => {
            format!("assert \"{}\"", program.name_str(*message))
        }
        NodeKind::MakeRangeIterator { .. } => String::from("iter.range"),
        NodeKind::MakeURangeIterator { .. } => String::from("iter.urange"),
        NodeKind::MakeFixedArrayIterator { stride, count, .. } => {
            format!("iter.array stride={stride} count={count}")
        }
        NodeKind::Op1 { op, ty, .. } => format!("{op:?}.{}", ty.name()).to_lowercase(),
        NodeKind::Op2 { op, ty, .. } => format!("{op:?}.{}", ty.name()).to_lowercase(),
        NodeKind::BoolAnd { .. } => String::from("and"),
        NodeKind::BoolOr { .. } => String::from("or"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::ProgramBuilder;
    use crate::cell::{CellCast, ValueKind};
    use crate::program::{BinOp, LineInfo};

    #[test]
    fn renders_a_function_tree() {
        let mut pb = ProgramBuilder::new();
        let at = LineInfo::default();
        let a = pb.node(NodeKind::GetArgument { index: 0 }, at);
        let b = pb.node(NodeKind::Const(2i32.into_cell()), at);
        let mul = pb.node(
            NodeKind::Op2 { op: BinOp::Mul, ty: ValueKind::Int, l: a, r: b },
            at,
        );
        let ret = pb.node(NodeKind::Return { subexpr: Some(mul) }, at);
        let f = pb.function("double", ret, 48).unwrap();
        let p = pb.finish().unwrap();

        let text = function_to_text(&p, f);
        assert!(text.contains("return"));
        assert!(text.contains("mul.int"));
        assert!(text.contains("arg 0"));

        let all = program_to_text(&p);
        assert!(all.contains("fn 0 \"double\" frame=48"));
    }
}
