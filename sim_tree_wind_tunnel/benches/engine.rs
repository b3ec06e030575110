// Copyright 2026 the Sim Tree Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use sim_tree::build::ProgramBuilder;
use sim_tree::cell::{CellCast, Range, ValueKind};
use sim_tree::context::{Config, Context, PROLOGUE_BYTES};
use sim_tree::host::NullHost;
use sim_tree::program::{BinOp, FuncId, LineInfo, NodeKind, Program};

const AT: LineInfo = LineInfo { line: 0, column: 0 };
const L0: u32 = PROLOGUE_BYTES;
const L1: u32 = PROLOGUE_BYTES + 16;

fn bench_engine(c: &mut Criterion) {
    bench_call_overhead(c);
    bench_count_loop(c);
    bench_range_for(c);
}

/// f(x) = x + 1, called repeatedly from the host.
fn build_inc() -> (Program, FuncId) {
    let mut pb = ProgramBuilder::new();
    let a = pb.node(NodeKind::GetArgument { index: 0 }, AT);
    let one = pb.node(NodeKind::Const(1i32.into_cell()), AT);
    let add = pb.node(
        NodeKind::Op2 { op: BinOp::Add, ty: ValueKind::Int, l: a, r: one },
        AT,
    );
    let ret = pb.node(NodeKind::Return { subexpr: Some(add) }, AT);
    let f = pb.function("inc", ret, PROLOGUE_BYTES).unwrap();
    (pb.finish().unwrap(), f)
}

fn bench_call_overhead(c: &mut Criterion) {
    let (p, f) = build_inc();
    let mut host = NullHost;
    let mut ctx = Context::new(&p, &mut host, Config::default());
    c.bench_function("call_overhead", |b| {
        b.iter(|| {
            let out = ctx.call(f, &[7i32.into_cell()], 0);
            ctx.restart();
            black_box(out);
        });
    });
}

/// while (n < limit) { n += 1 } return n
fn build_count(limit: i32) -> (Program, FuncId) {
    let mut pb = ProgramBuilder::new();
    let init = pb.node(NodeKind::InitLocal { offset: L0, size: 4 }, AT);
    let slot = pb.node(NodeKind::GetLocal { offset: L0 }, AT);
    let n = pb.node(NodeKind::GetLocalR2V { offset: L0, ty: ValueKind::Int }, AT);
    let lim = pb.node(NodeKind::Const(limit.into_cell()), AT);
    let cond = pb.node(
        NodeKind::Op2 { op: BinOp::Lt, ty: ValueKind::Int, l: n, r: lim },
        AT,
    );
    let one = pb.node(NodeKind::Const(1i32.into_cell()), AT);
    let bump = pb.node(
        NodeKind::Op2 { op: BinOp::SetAdd, ty: ValueKind::Int, l: slot, r: one },
        AT,
    );
    let w = pb.node(NodeKind::While { cond, body: bump }, AT);
    let ret = pb.node(NodeKind::Return { subexpr: Some(n) }, AT);
    let body = pb.node(NodeKind::Let { list: vec![init, w], subexpr: Some(ret) }, AT);
    let f = pb.function("count", body, PROLOGUE_BYTES + 16).unwrap();
    (pb.finish().unwrap(), f)
}

fn bench_count_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("count_loop");
    for &limit in &[10i32, 100, 1000] {
        let (p, f) = build_count(limit);
        let mut host = NullHost;
        let mut ctx = Context::new(&p, &mut host, Config::default());
        group.bench_with_input(BenchmarkId::from_parameter(limit), &limit, |b, _| {
            b.iter(|| {
                let out = ctx.call(f, &[], 0);
                ctx.restart();
                black_box(out);
            });
        });
    }
    group.finish();
}

/// for (i in 0..limit) { sum += i } return sum
fn build_range_sum(limit: i32) -> (Program, FuncId) {
    let mut pb = ProgramBuilder::new();
    let init = pb.node(NodeKind::InitLocal { offset: L0, size: 4 }, AT);
    let range = pb.node(
        NodeKind::Const(Range { from: 0, to: limit }.into_cell()),
        AT,
    );
    let src = pb.node(NodeKind::MakeRangeIterator { subexpr: range }, AT);
    let slot = pb.node(NodeKind::GetLocal { offset: L0 }, AT);
    let v = pb.node(NodeKind::GetLocalR2V { offset: L1, ty: ValueKind::Int }, AT);
    let add = pb.node(
        NodeKind::Op2 { op: BinOp::SetAdd, ty: ValueKind::Int, l: slot, r: v },
        AT,
    );
    let looped = pb.node(
        NodeKind::For { sources: vec![src], slots: vec![L1], body: add },
        AT,
    );
    let sum = pb.node(NodeKind::GetLocalR2V { offset: L0, ty: ValueKind::Int }, AT);
    let ret = pb.node(NodeKind::Return { subexpr: Some(sum) }, AT);
    let body = pb.node(NodeKind::Let { list: vec![init, looped], subexpr: Some(ret) }, AT);
    let f = pb.function("range_sum", body, PROLOGUE_BYTES + 32).unwrap();
    (pb.finish().unwrap(), f)
}

fn bench_range_for(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_for");
    for &limit in &[10i32, 100, 1000] {
        let (p, f) = build_range_sum(limit);
        let mut host = NullHost;
        let mut ctx = Context::new(&p, &mut host, Config::default());
        group.bench_with_input(BenchmarkId::from_parameter(limit), &limit, |b, _| {
            b.iter(|| {
                let out = ctx.call(f, &[], 0);
                ctx.restart();
                black_box(out);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_engine);
criterion_main!(benches);
