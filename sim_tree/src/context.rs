// Copyright 2026 the Sim Tree Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The execution context: per-run state and the embedding entry points.
//!
//! A [`Context`] binds one immutable [`Program`] to one linear region and
//! one [`Host`]. Several contexts may execute the same program
//! independently; nothing is shared between them.
//!
//! Non-local control is a four-bit [`StopFlags`] set checked between child
//! evaluations. `throw_error` records a message and raises the throw flag;
//! no unwinding happens. The nearest try–catch consumes the flag, or the
//! top-level call returns a zero cell with [`Context::get_exception`] set.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::cell::{CELL_SIZE, Cell, CellCast, Ptr, StrRef};
use crate::host::Host;
use crate::iterator::{IterRef, SimIterator};
use crate::program::{BlockDescriptor, FuncId, GlobalId, NAME_POOL_BASE, Program};
use crate::region::LinearRegion;

/// Byte size of the frame prologue: result cell, arguments pointer,
/// debug info + caller line. Cell-aligned by construction.
pub const PROLOGUE_BYTES: u32 = 3 * CELL_SIZE;

/// The non-local control bitset.
///
/// Every composite node checks these between child evaluations and
/// short-circuits to its typed zero when any is set.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StopFlags(u32);

impl core::ops::BitOr for StopFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for StopFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl StopFlags {
    /// Nothing pending.
    pub const NONE: Self = Self(0);
    /// The innermost loop must terminate.
    pub const BREAK: Self = Self(1 << 0);
    /// The innermost function must return.
    pub const RETURN: Self = Self(1 << 1);
    /// An exception is in flight.
    pub const THROW: Self = Self(1 << 2);
    /// The host requested a hard stop.
    pub const TERMINATE: Self = Self(1 << 3);

    /// Returns `true` if this set includes all bits of `other`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub(crate) fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub(crate) fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

/// Region sizing for a context.
#[derive(Copy, Clone, Debug)]
pub struct Config {
    /// Total linear-region size in bytes (arena + scratch + stack).
    pub region_size: u32,
    /// Call-stack sub-buffer size in bytes.
    pub stack_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            region_size: 4 * 1024 * 1024,
            stack_size: 16 * 1024,
        }
    }
}

/// Execution state for one program.
pub struct Context<'a> {
    pub(crate) program: &'a Program,
    pub(crate) host: &'a mut dyn Host,
    pub(crate) region: LinearRegion,
    pub(crate) globals: Vec<Cell>,
    pub(crate) stop: StopFlags,
    pub(crate) exception: Option<String>,
    pub(crate) iterators: Vec<Option<Box<dyn SimIterator>>>,
    pub(crate) invoke_stack_top: u32,
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("stop", &self.stop)
            .field("exception", &self.exception)
            .finish_non_exhaustive()
    }
}

impl<'a> Context<'a> {
    /// Creates a context over `program`.
    ///
    /// Interns the program's name pool, allocates backing for out-of-line
    /// globals, and seals the arena; the program is immutable from here
    /// on.
    #[must_use]
    pub fn new(program: &'a Program, host: &'a mut dyn Host, config: Config) -> Self {
        let mut region = LinearRegion::new(config.region_size, config.stack_size);
        if !program.name_pool.is_empty() {
            let len = u32::try_from(program.name_pool.len()).expect("name pool too large");
            let pool = region.allocate(len);
            debug_assert_eq!(pool.0, NAME_POOL_BASE);
            region.write_bytes(pool.0, &program.name_pool);
        }
        let mut globals = Vec::with_capacity(program.globals().len());
        for g in program.globals() {
            if g.size > CELL_SIZE {
                let backing = region.allocate(g.size);
                globals.push(backing.into_cell());
            } else {
                globals.push(Cell::ZERO);
            }
        }
        region.mark_exec_base();
        Self {
            program,
            host,
            region,
            globals,
            stop: StopFlags::NONE,
            exception: None,
            iterators: Vec::new(),
            invoke_stack_top: 0,
        }
    }

    /// The program this context executes.
    #[must_use]
    pub fn program(&self) -> &'a Program {
        self.program
    }

    /// Discards runtime scratch, rewinds the stack, clears stop flags,
    /// the exception, live iterators and the invoke marker. The arena
    /// (names, globals backing) survives; global values are untouched.
    pub fn restart(&mut self) {
        self.region.reset();
        self.stop = StopFlags::NONE;
        self.exception = None;
        self.iterators.clear();
        self.invoke_stack_top = 0;
    }

    /// Re-initialises every global: zeroes its storage, then evaluates its
    /// init node (writing the result into the value cell, or through the
    /// backing pointer for out-of-line globals).
    pub fn run_init_script(&mut self) {
        for i in 0..self.globals.len() {
            if self.stopped() {
                break;
            }
            let g = self.program.global(GlobalId(i as u32));
            if g.size > CELL_SIZE {
                let backing = Ptr::from_cell(self.globals[i]);
                self.region.zero(backing.0, g.size);
                if let Some(init) = g.init {
                    self.eval_node(init);
                }
            } else {
                self.globals[i] = Cell::ZERO;
                if let Some(init) = g.init {
                    self.globals[i] = self.eval_node(init);
                }
            }
        }
    }

    /// Reads the `index`-th global's value cell.
    ///
    /// Panics when `index` is out of range; the index space is fixed by
    /// the program.
    #[must_use]
    pub fn get_variable(&self, index: GlobalId) -> Cell {
        self.globals[index.0 as usize]
    }

    /// Finds a function descriptor by name (linear scan).
    #[must_use]
    pub fn find_function(&self, name: &str) -> Option<FuncId> {
        self.program
            .functions()
            .iter()
            .position(|f| self.region.name_str(f.name) == name)
            .map(|i| FuncId(i as u32))
    }

    /// Finds a global descriptor by name (linear scan).
    #[must_use]
    pub fn find_variable(&self, name: &str) -> Option<GlobalId> {
        self.program
            .globals()
            .iter()
            .position(|g| self.region.name_str(g.name) == name)
            .map(|i| GlobalId(i as u32))
    }

    /// Convenience wrapper: [`Self::call`] with caller line 0.
    pub fn eval(&mut self, fn_index: FuncId, args: &[Cell]) -> Cell {
        self.call(fn_index, args, 0)
    }

    /// Calls a function by index with host-supplied argument cells.
    ///
    /// Returns the harvested result cell; on an unhandled throw the result
    /// is zero and [`Self::get_exception`] carries the message.
    pub fn call(&mut self, fn_index: FuncId, args: &[Cell], line: u32) -> Cell {
        self.call_ex(fn_index, args, line, |_| {})
    }

    /// Like [`Self::call`], with a hook run after the prologue is written
    /// and before the body evaluates.
    pub fn call_ex(
        &mut self,
        fn_index: FuncId,
        args: &[Cell],
        line: u32,
        when: impl FnOnce(&mut Self),
    ) -> Cell {
        let argp = self.copy_args_to_scratch(args);
        self.call_with_args_ex(fn_index, argp, line, when)
    }

    /// Invokes a block descriptor produced by make-block.
    pub fn invoke(&mut self, block: BlockDescriptor, args: &[Cell]) -> Cell {
        self.invoke_ex(block, args, |_| {})
    }

    /// Like [`Self::invoke`], with a pre-body hook.
    pub fn invoke_ex(
        &mut self,
        block: BlockDescriptor,
        args: &[Cell],
        when: impl FnOnce(&mut Self),
    ) -> Cell {
        let argp = self.copy_args_to_scratch(args);
        self.invoke_with_args_ex(block, argp, when)
    }

    /// Records `message` and raises the throw flag. No unwinding happens;
    /// callers observe the flag at their next check.
    pub fn throw_error(&mut self, message: &str) {
        self.exception = Some(String::from(message));
        self.stop.insert(StopFlags::THROW);
        #[cfg(feature = "panic_throw")]
        panic!("{message}");
    }

    /// The exception in flight, if the throw flag is set.
    #[must_use]
    pub fn get_exception(&self) -> Option<&str> {
        if self.stop.contains(StopFlags::THROW) {
            self.exception.as_deref()
        } else {
            None
        }
    }

    /// Raises the terminate flag; evaluation unwinds at the next check.
    pub fn terminate(&mut self) {
        self.stop.insert(StopFlags::TERMINATE);
    }

    /// Current stop flags.
    #[must_use]
    pub fn stop_flags(&self) -> StopFlags {
        self.stop
    }

    /// Reports every live frame to the host's `to_err`, innermost first.
    #[cfg(feature = "stack_walk")]
    pub fn stack_walk(&mut self) {
        let high = self.region.stack_high();
        let mut sp = self.region.stack_top();
        while sp < high {
            let info = self.region.read_cell(sp + 2 * CELL_SIZE);
            let Some(f) = self.program.functions().get(info.u32_lane(0) as usize) else {
                break;
            };
            let report = {
                let name = self.region.name_str(f.name);
                alloc::format!("{name} at line {}", info.u32_lane(1))
            };
            self.host.to_err(&report);
            sp += f.stack_size;
        }
    }

    /// Bumps the scratch allocator by a cell-aligned `size`.
    pub fn allocate(&mut self, size: u32) -> Ptr {
        self.region.allocate(size)
    }

    /// Grows the most recent allocation in place, or allocates and copies.
    pub fn reallocate(&mut self, old: Ptr, old_size: u32, new_size: u32) -> Ptr {
        self.region.reallocate(old, old_size, new_size)
    }

    /// Copies `name` into the region as a nul-terminated string.
    pub fn allocate_name(&mut self, name: &str) -> StrRef {
        self.region.allocate_name(name)
    }

    /// Resolves a string cell (interned or runtime-allocated).
    #[must_use]
    pub fn get_str(&self, r: StrRef) -> &str {
        self.region.name_str(r)
    }

    pub(crate) fn stopped(&self) -> bool {
        self.stop != StopFlags::NONE
    }

    pub(crate) fn abi_arguments(&self) -> Ptr {
        Ptr::from_cell(self.region.read_cell(self.region.stack_top() + CELL_SIZE))
    }

    pub(crate) fn abi_result(&self) -> Cell {
        self.region.read_cell(self.region.stack_top())
    }

    pub(crate) fn set_abi_result(&mut self, value: Cell) {
        let sp = self.region.stack_top();
        self.region.write_cell(sp, value);
    }

    pub(crate) fn register_iterator(&mut self, iterator: Box<dyn SimIterator>) -> IterRef {
        self.iterators.push(Some(iterator));
        IterRef(self.iterators.len() as u32)
    }

    pub(crate) fn take_iterator(&mut self, r: IterRef) -> Option<Box<dyn SimIterator>> {
        if r.is_null() {
            return None;
        }
        self.iterators.get_mut((r.0 - 1) as usize)?.take()
    }

    pub(crate) fn copy_args_to_scratch(&mut self, args: &[Cell]) -> Ptr {
        if args.is_empty() {
            return Ptr::NULL;
        }
        let p = self.region.allocate(args.len() as u32 * CELL_SIZE);
        for (i, a) in args.iter().enumerate() {
            self.region.write_cell(p.0 + i as u32 * CELL_SIZE, *a);
        }
        p
    }

    pub(crate) fn call_with_args(&mut self, func: FuncId, argp: Ptr, line: u32) -> Cell {
        self.call_with_args_ex(func, argp, line, |_| {})
    }

    /// The calling convention. Saves the stack top, descends by the
    /// callee's frame size, writes the prologue, evaluates the body,
    /// clears the return flag (only), harvests the result from the
    /// prologue and restores the stack top.
    pub(crate) fn call_with_args_ex(
        &mut self,
        func: FuncId,
        argp: Ptr,
        line: u32,
        when: impl FnOnce(&mut Self),
    ) -> Cell {
        let f = self.program.function(func);
        let saved = self.region.stack_top();
        let Some(frame) = self.region.push_frame(f.stack_size) else {
            self.throw_error("stack overflow");
            return Cell::ZERO;
        };
        self.region.write_cell(frame, Cell::ZERO);
        self.region.write_cell(frame + CELL_SIZE, argp.into_cell());
        let mut info = Cell::ZERO;
        info.set_u32_lane(0, func.0);
        info.set_u32_lane(1, line);
        self.region.write_cell(frame + 2 * CELL_SIZE, info);
        when(self);
        self.eval_node(f.code);
        self.stop.remove(StopFlags::RETURN);
        let result = self.region.read_cell(frame);
        self.region.set_stack_top(saved);
        result
    }

    pub(crate) fn invoke_with_args(&mut self, block: BlockDescriptor, argp: Ptr) -> Cell {
        self.invoke_with_args_ex(block, argp, |_| {})
    }

    /// Block invocation: restores the captured frame, publishes the
    /// arguments pointer at the captured slot, evaluates the body, clears
    /// the return flag and restores the caller's frame and invoke marker.
    pub(crate) fn invoke_with_args_ex(
        &mut self,
        block: BlockDescriptor,
        argp: Ptr,
        when: impl FnOnce(&mut Self),
    ) -> Cell {
        if block.frame_base == 0 {
            self.throw_error("invoking null block");
            return Cell::ZERO;
        }
        let saved_sp = self.region.stack_top();
        let saved_invoke = self.invoke_stack_top;
        self.invoke_stack_top = saved_sp;
        self.region.set_stack_top(block.frame_base);
        if !argp.is_null() {
            self.region
                .write_cell(block.frame_base + block.args_slot, argp.into_cell());
        }
        when(self);
        let result = self.eval_node(block.body);
        self.stop.remove(StopFlags::RETURN);
        self.region.set_stack_top(saved_sp);
        self.invoke_stack_top = saved_invoke;
        result
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::build::ProgramBuilder;
    use crate::cell::{CellCast, ValueKind};
    use crate::host::NullHost;
    use crate::program::{BinOp, LineInfo, NodeKind, UnOp};

    const AT: LineInfo = LineInfo { line: 0, column: 0 };
    const LOCAL0: u32 = PROLOGUE_BYTES;

    fn run(pb: ProgramBuilder, entry: FuncId, args: &[Cell]) -> (Cell, Option<String>) {
        let program = pb.finish().unwrap();
        let mut host = NullHost;
        let mut ctx = Context::new(&program, &mut host, Config::default());
        let out = ctx.call(entry, args, 0);
        (out, ctx.get_exception().map(String::from))
    }

    #[test]
    fn call_harvests_the_prologue_result() {
        let mut pb = ProgramBuilder::new();
        let c = pb.node(NodeKind::Const(42i32.into_cell()), AT);
        let ret = pb.node(NodeKind::Return { subexpr: Some(c) }, AT);
        let f = pb.function("f", ret, PROLOGUE_BYTES).unwrap();
        let (out, exc) = run(pb, f, &[]);
        assert_eq!(i32::from_cell(out), 42);
        assert_eq!(exc, None);
    }

    #[test]
    fn flags_are_clean_after_a_top_level_call() {
        let mut pb = ProgramBuilder::new();
        let c = pb.node(NodeKind::Const(1i32.into_cell()), AT);
        let ret = pb.node(NodeKind::Return { subexpr: Some(c) }, AT);
        let f = pb.function("f", ret, PROLOGUE_BYTES).unwrap();
        let program = pb.finish().unwrap();
        let mut host = NullHost;
        let mut ctx = Context::new(&program, &mut host, Config::default());
        ctx.call(f, &[], 0);
        assert_eq!(ctx.stop_flags(), StopFlags::NONE);
        assert_eq!(ctx.get_exception(), None);
    }

    #[test]
    fn locals_round_trip_through_the_frame() {
        let mut pb = ProgramBuilder::new();
        let init = pb.node(NodeKind::InitLocal { offset: LOCAL0, size: 16 }, AT);
        let slot = pb.node(NodeKind::GetLocal { offset: LOCAL0 }, AT);
        let seven = pb.node(NodeKind::Const(7i32.into_cell()), AT);
        let store = pb.node(
            NodeKind::CopyValue { left: slot, right: seven, ty: ValueKind::Int },
            AT,
        );
        let load = pb.node(
            NodeKind::GetLocalR2V { offset: LOCAL0, ty: ValueKind::Int },
            AT,
        );
        let ret = pb.node(NodeKind::Return { subexpr: Some(load) }, AT);
        let body = pb.node(NodeKind::Let { list: vec![init, store], subexpr: Some(ret) }, AT);
        let f = pb.function("f", body, PROLOGUE_BYTES + 16).unwrap();
        let (out, exc) = run(pb, f, &[]);
        assert_eq!(exc, None);
        assert_eq!(i32::from_cell(out), 7);
    }

    #[test]
    fn while_loop_counts_and_clears_break() {
        // let n = 0; while (n < 5) { n += 1 } return n
        let mut pb = ProgramBuilder::new();
        let init = pb.node(NodeKind::InitLocal { offset: LOCAL0, size: 4 }, AT);
        let slot = pb.node(NodeKind::GetLocal { offset: LOCAL0 }, AT);
        let n = pb.node(
            NodeKind::GetLocalR2V { offset: LOCAL0, ty: ValueKind::Int },
            AT,
        );
        let five = pb.node(NodeKind::Const(5i32.into_cell()), AT);
        let cond = pb.node(
            NodeKind::Op2 { op: BinOp::Lt, ty: ValueKind::Int, l: n, r: five },
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
        let (out, exc) = run(pb, f, &[]);
        assert_eq!(exc, None);
        assert_eq!(i32::from_cell(out), 5);
    }

    #[test]
    fn pre_and_post_increment_differ() {
        let mut pb = ProgramBuilder::new();
        let init = pb.node(NodeKind::InitLocal { offset: LOCAL0, size: 4 }, AT);
        let slot = pb.node(NodeKind::GetLocal { offset: LOCAL0 }, AT);
        let post = pb.node(
            NodeKind::Op1 { op: UnOp::IncPost, ty: ValueKind::Int, x: slot },
            AT,
        );
        let drop_post = pb.node(NodeKind::Block { list: vec![post] }, AT);
        let pre = pb.node(
            NodeKind::Op1 { op: UnOp::Inc, ty: ValueKind::Int, x: slot },
            AT,
        );
        let ret = pb.node(NodeKind::Return { subexpr: Some(pre) }, AT);
        let body = pb.node(
            NodeKind::Let { list: vec![init, drop_post], subexpr: Some(ret) },
            AT,
        );
        let f = pb.function("inc2", body, PROLOGUE_BYTES + 16).unwrap();
        let (out, exc) = run(pb, f, &[]);
        assert_eq!(exc, None);
        // Post-increment left 1 behind; pre-increment returns the new 2.
        assert_eq!(i32::from_cell(out), 2);
    }

    #[test]
    fn deep_recursion_throws_stack_overflow() {
        let mut pb = ProgramBuilder::new();
        let call = pb.node(NodeKind::Call { func: FuncId(0), args: vec![] }, AT);
        let ret = pb.node(NodeKind::Return { subexpr: Some(call) }, AT);
        let f = pb.function("spin", ret, 64).unwrap();
        let (out, exc) = run(pb, f, &[]);
        assert_eq!(exc.as_deref(), Some("stack overflow"));
        assert_eq!(out, Cell::ZERO);
    }

    #[test]
    fn restart_is_idempotent() {
        let mut pb = ProgramBuilder::new();
        let c = pb.node(NodeKind::Const(3i32.into_cell()), AT);
        let ret = pb.node(NodeKind::Return { subexpr: Some(c) }, AT);
        let f = pb.function("f", ret, PROLOGUE_BYTES).unwrap();
        let program = pb.finish().unwrap();
        let mut host = NullHost;
        let mut ctx = Context::new(&program, &mut host, Config::default());
        ctx.call(f, &[], 0);
        ctx.restart();
        let a = ctx.allocate(16);
        ctx.restart();
        ctx.restart();
        let b = ctx.allocate(16);
        assert_eq!(a, b);
        assert_eq!(i32::from_cell(ctx.call(f, &[], 0)), 3);
    }

    #[test]
    fn allocations_stay_cell_aligned() {
        let pb = ProgramBuilder::new();
        let program = pb.finish().unwrap();
        let mut host = NullHost;
        let mut ctx = Context::new(&program, &mut host, Config::default());
        for size in [1, 5, 17, 100] {
            assert_eq!(ctx.allocate(size).0 % CELL_SIZE, 0);
        }
    }

    #[test]
    fn globals_initialise_and_survive_restart() {
        let mut pb = ProgramBuilder::new();
        let c = pb.node(NodeKind::Const(11i32.into_cell()), AT);
        let g = pb.global("gravity", 4, Some(c), None);
        let program = pb.finish().unwrap();
        let mut host = NullHost;
        let mut ctx = Context::new(&program, &mut host, Config::default());
        assert_eq!(ctx.get_variable(g), Cell::ZERO);
        ctx.run_init_script();
        assert_eq!(i32::from_cell(ctx.get_variable(g)), 11);
        assert_eq!(ctx.find_variable("gravity"), Some(g));
        ctx.restart();
        assert_eq!(i32::from_cell(ctx.get_variable(g)), 11);
        ctx.run_init_script();
        assert_eq!(i32::from_cell(ctx.get_variable(g)), 11);
    }

    #[test]
    fn find_function_scans_by_name() {
        let mut pb = ProgramBuilder::new();
        let ret = pb.node(NodeKind::Return { subexpr: None }, AT);
        let f = pb.function("noop", ret, PROLOGUE_BYTES).unwrap();
        let program = pb.finish().unwrap();
        let mut host = NullHost;
        let ctx = Context::new(&program, &mut host, Config::default());
        assert_eq!(ctx.find_function("noop"), Some(f));
        assert_eq!(ctx.find_function("missing"), None);
    }
}
