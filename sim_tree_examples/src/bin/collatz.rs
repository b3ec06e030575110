// Copyright 2026 the Sim Tree Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Embedding demo: builds a Collatz step-counter as a node tree, binds a
//! reporting intrinsic, and drives it through the host surface.
//!
//! Run with `cargo run --bin collatz -- 27`.

use anyhow::{Context as _, Result, bail};

use sim_tree::build::ProgramBuilder;
use sim_tree::cell::{Cell, CellCast, ValueKind};
use sim_tree::context::{Config, Context, PROLOGUE_BYTES};
use sim_tree::host::{Host, HostValue, IntrinsicError};
use sim_tree::program::{BinOp, FuncId, LineInfo, NodeKind, Program};
use sim_tree::pretty;

const AT: LineInfo = LineInfo { line: 0, column: 0 };
const N_SLOT: u32 = PROLOGUE_BYTES;
const STEPS_SLOT: u32 = PROLOGUE_BYTES + 16;

/// Host that prints every value the script reports.
struct TraceHost;

impl Host for TraceHost {
    fn to_out(&mut self, message: &str) {
        println!("{message}");
    }

    fn to_err(&mut self, message: &str) {
        eprintln!("{message}");
    }

    fn intrinsic(&mut self, symbol: &str, args: &[Cell]) -> Result<HostValue, IntrinsicError> {
        match symbol {
            "report" => {
                println!("  n = {}", i32::from_cell(args[0]));
                Ok(HostValue::Cell(Cell::ZERO))
            }
            _ => Err(IntrinsicError::UnknownSymbol),
        }
    }
}

/// collatz(n):
///   steps = 0
///   while (n != 1) { report(n); n = (n % 2 == 0) ? n / 2 : 3 * n + 1; steps += 1 }
///   return steps
fn build_collatz() -> Result<(Program, FuncId)> {
    let mut pb = ProgramBuilder::new();
    let report = pb.intern("report");

    let n_slot = pb.node(NodeKind::GetLocal { offset: N_SLOT }, AT);
    let n = pb.node(NodeKind::GetLocalR2V { offset: N_SLOT, ty: ValueKind::Int }, AT);
    let steps_slot = pb.node(NodeKind::GetLocal { offset: STEPS_SLOT }, AT);
    let steps = pb.node(
        NodeKind::GetLocalR2V { offset: STEPS_SLOT, ty: ValueKind::Int },
        AT,
    );

    let init_steps = pb.node(NodeKind::InitLocal { offset: N_SLOT, size: 32 }, AT);
    let arg = pb.node(NodeKind::GetArgument { index: 0 }, AT);
    let seed = pb.node(
        NodeKind::CopyValue { left: n_slot, right: arg, ty: ValueKind::Int },
        AT,
    );

    let one = pb.node(NodeKind::Const(1i32.into_cell()), AT);
    let two = pb.node(NodeKind::Const(2i32.into_cell()), AT);
    let three = pb.node(NodeKind::Const(3i32.into_cell()), AT);
    let cond = pb.node(
        NodeKind::Op2 { op: BinOp::Ne, ty: ValueKind::Int, l: n, r: one },
        AT,
    );

    let tell = pb.node(NodeKind::HostCall { symbol: report, args: vec![n] }, AT);
    let rem = pb.node(
        NodeKind::Op2 { op: BinOp::Mod, ty: ValueKind::Int, l: n, r: two },
        AT,
    );
    let zero = pb.node(NodeKind::Const(0i32.into_cell()), AT);
    let even = pb.node(
        NodeKind::Op2 { op: BinOp::Eq, ty: ValueKind::Int, l: rem, r: zero },
        AT,
    );
    let halved = pb.node(
        NodeKind::Op2 { op: BinOp::Div, ty: ValueKind::Int, l: n, r: two },
        AT,
    );
    let tripled = pb.node(
        NodeKind::Op2 { op: BinOp::Mul, ty: ValueKind::Int, l: three, r: n },
        AT,
    );
    let grown = pb.node(
        NodeKind::Op2 { op: BinOp::Add, ty: ValueKind::Int, l: tripled, r: one },
        AT,
    );
    let next = pb.node(
        NodeKind::IfThenElse { cond: even, if_true: halved, if_false: Some(grown) },
        AT,
    );
    let advance = pb.node(
        NodeKind::CopyValue { left: n_slot, right: next, ty: ValueKind::Int },
        AT,
    );
    let count = pb.node(
        NodeKind::Op2 { op: BinOp::SetAdd, ty: ValueKind::Int, l: steps_slot, r: one },
        AT,
    );
    let loop_body = pb.node(NodeKind::Block { list: vec![tell, advance, count] }, AT);
    let w = pb.node(NodeKind::While { cond, body: loop_body }, AT);
    let ret = pb.node(NodeKind::Return { subexpr: Some(steps) }, AT);
    let body = pb.node(
        NodeKind::Let { list: vec![init_steps, seed, w], subexpr: Some(ret) },
        AT,
    );

    let f = pb.function("collatz", body, PROLOGUE_BYTES + 32)?;
    let program = pb.finish()?;
    Ok((program, f))
}

fn main() -> Result<()> {
    let seed: i32 = std::env::args()
        .nth(1)
        .unwrap_or_else(|| String::from("27"))
        .parse()
        .context("seed must be an integer")?;
    if seed < 1 {
        bail!("seed must be positive");
    }

    let (program, collatz) = build_collatz()?;
    println!("{}", pretty::program_to_text(&program));

    let mut host = TraceHost;
    let mut ctx = Context::new(&program, &mut host, Config::default());
    let out = ctx.call(collatz, &[seed.into_cell()], 0);
    if let Some(message) = ctx.get_exception() {
        bail!("script failed: {message}");
    }
    println!("collatz({seed}) took {} steps", i32::from_cell(out));
    Ok(())
}
