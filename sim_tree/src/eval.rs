// Copyright 2026 the Sim Tree Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Node evaluation.
//!
//! `eval_node` is the universal entry: every node yields a cell. The typed
//! fast paths (`eval_bool`, `eval_int`, …) are observationally equivalent
//! to `eval_node` followed by the cast bridge; they exist so data-access
//! nodes can skip the cast round-trip.
//!
//! Every composite node checks the stop flags between children and
//! short-circuits to its typed zero: a value node returns the zero cell, a
//! pointer node null, a bool node false. The `for` node is the one
//! exception in shape: on any interruption it falls through to its
//! iterator-close phase before unwinding.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::cell::{CELL_SIZE, Cell, CellCast, Ptr, Range, StrRef, URange, ValueKind};
use crate::context::{Context, StopFlags};
use crate::format::render_value;
use crate::host::{HostValue, IntrinsicError};
use crate::iterator::{FixedArrayIterator, IterRef, RangeIterator, SimIterator, URangeIterator};
use crate::policy::{IntPolicy, SimPolicy, VecOp, vector_lanes};
use crate::policy::{scalar_vec_binop, vec_binop, vec_eq, vec_neg, vec_scalar_binop};
use crate::program::{BinOp, BlockDescriptor, MAX_FOR_ITERATORS, NodeId, NodeKind, UnOp};

macro_rules! typed_eval {
    ($name:ident, $t:ty, $kind:path) => {
        pub(crate) fn $name(&mut self, id: NodeId) -> $t {
            let node = self.program.node(id);
            match &node.kind {
                NodeKind::Const(c) => <$t>::from_cell(*c),
                NodeKind::GetLocalR2V { offset, ty } if *ty == $kind => <$t>::from_cell(
                    self.region
                        .read_value(self.local_addr(*offset), size_of::<$t>() as u32),
                ),
                NodeKind::GetLocalRefR2V { offset, ty } if *ty == $kind => {
                    let p = self.read_slot_ptr(*offset);
                    <$t>::from_cell(self.region.read_value(p.0, size_of::<$t>() as u32))
                }
                NodeKind::GetArgument { index } => {
                    <$t>::from_cell(self.region.read_cell(self.arg_addr(*index)))
                }
                NodeKind::GetArgumentR2V { index, ty } if *ty == $kind => {
                    let p = Ptr::from_cell(self.region.read_cell(self.arg_addr(*index)));
                    <$t>::from_cell(self.region.read_value(p.0, size_of::<$t>() as u32))
                }
                NodeKind::GetBlockArgument { index, offset } => {
                    let bp = self.read_slot_ptr(*offset);
                    <$t>::from_cell(self.region.read_cell(bp.0 + *index * CELL_SIZE))
                }
                NodeKind::FieldDerefR2V { value, offset, ty } if *ty == $kind => {
                    let p = self.eval_ptr(*value);
                    if self.stopped() {
                        return Default::default();
                    }
                    <$t>::from_cell(
                        self.region
                            .read_value(p.0 + *offset, size_of::<$t>() as u32),
                    )
                }
                NodeKind::Ref2Value { subexpr, ty } if *ty == $kind => {
                    let p = self.eval_ptr(*subexpr);
                    if self.stopped() {
                        return Default::default();
                    }
                    <$t>::from_cell(self.region.read_value(p.0, size_of::<$t>() as u32))
                }
                _ => <$t>::from_cell(self.eval_node(id)),
            }
        }
    };
}

macro_rules! int_op1 {
    ($self:ident, $op:expr, $x:expr, $eval:ident, $t:ty) => {{
        match $op {
            UnOp::Plus => {
                let v = $self.$eval($x);
                if $self.stopped() {
                    return Cell::ZERO;
                }
                v.into_cell()
            }
            UnOp::Minus => {
                let v = $self.$eval($x);
                if $self.stopped() {
                    return Cell::ZERO;
                }
                <$t as SimPolicy>::neg(v).into_cell()
            }
            UnOp::BinNot => {
                let v = $self.$eval($x);
                if $self.stopped() {
                    return Cell::ZERO;
                }
                <$t as IntPolicy>::bnot(v).into_cell()
            }
            UnOp::Inc | UnOp::Dec | UnOp::IncPost | UnOp::DecPost => {
                let p = $self.eval_ptr($x);
                if $self.stopped() {
                    return Cell::ZERO;
                }
                let cur = <$t>::from_cell($self.region.read_value(p.0, size_of::<$t>() as u32));
                let one = <$t as SimPolicy>::one();
                let new = if matches!($op, UnOp::Inc | UnOp::IncPost) {
                    <$t as SimPolicy>::add(cur, one)
                } else {
                    <$t as SimPolicy>::sub(cur, one)
                };
                $self
                    .region
                    .write_value(p.0, new.into_cell(), size_of::<$t>() as u32);
                if matches!($op, UnOp::Inc | UnOp::Dec) {
                    new.into_cell()
                } else {
                    cur.into_cell()
                }
            }
            UnOp::BoolNot => Cell::ZERO,
        }
    }};
}

macro_rules! int_op2 {
    ($self:ident, $op:expr, $l:expr, $r:expr, $eval:ident, $t:ty) => {{
        match $op {
            BinOp::Add
            | BinOp::Sub
            | BinOp::Mul
            | BinOp::BinAnd
            | BinOp::BinOr
            | BinOp::BinXor
            | BinOp::Shl
            | BinOp::Shr => {
                let a = $self.$eval($l);
                if $self.stopped() {
                    return Cell::ZERO;
                }
                let b = $self.$eval($r);
                if $self.stopped() {
                    return Cell::ZERO;
                }
                let v = match $op {
                    BinOp::Add => <$t as SimPolicy>::add(a, b),
                    BinOp::Sub => <$t as SimPolicy>::sub(a, b),
                    BinOp::Mul => <$t as SimPolicy>::mul(a, b),
                    BinOp::BinAnd => <$t as IntPolicy>::band(a, b),
                    BinOp::BinOr => <$t as IntPolicy>::bor(a, b),
                    BinOp::BinXor => <$t as IntPolicy>::bxor(a, b),
                    BinOp::Shl => <$t as IntPolicy>::shl(a, b),
                    _ => <$t as IntPolicy>::shr(a, b),
                };
                v.into_cell()
            }
            BinOp::Div | BinOp::Mod => {
                let a = $self.$eval($l);
                if $self.stopped() {
                    return Cell::ZERO;
                }
                let b = $self.$eval($r);
                if $self.stopped() {
                    return Cell::ZERO;
                }
                let v = if matches!($op, BinOp::Div) {
                    <$t as SimPolicy>::div(a, b)
                } else {
                    <$t as SimPolicy>::rem(a, b)
                };
                match v {
                    Ok(v) => v.into_cell(),
                    Err(_) => {
                        $self.throw_error("divide by zero");
                        Cell::ZERO
                    }
                }
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let a = $self.$eval($l);
                if $self.stopped() {
                    return Cell::ZERO;
                }
                let b = $self.$eval($r);
                if $self.stopped() {
                    return Cell::ZERO;
                }
                let v = match $op {
                    BinOp::Eq => a == b,
                    BinOp::Ne => a != b,
                    BinOp::Lt => a < b,
                    BinOp::Le => a <= b,
                    BinOp::Gt => a > b,
                    _ => a >= b,
                };
                v.into_cell()
            }
            BinOp::SetAdd
            | BinOp::SetSub
            | BinOp::SetMul
            | BinOp::SetDiv
            | BinOp::SetMod
            | BinOp::SetBinAnd
            | BinOp::SetBinOr
            | BinOp::SetBinXor
            | BinOp::SetShl
            | BinOp::SetShr => {
                let p = $self.eval_ptr($l);
                if $self.stopped() {
                    return Cell::ZERO;
                }
                let b = $self.$eval($r);
                if $self.stopped() {
                    return Cell::ZERO;
                }
                let cur = <$t>::from_cell($self.region.read_value(p.0, size_of::<$t>() as u32));
                let v = match $op {
                    BinOp::SetAdd => <$t as SimPolicy>::add(cur, b),
                    BinOp::SetSub => <$t as SimPolicy>::sub(cur, b),
                    BinOp::SetMul => <$t as SimPolicy>::mul(cur, b),
                    BinOp::SetDiv | BinOp::SetMod => {
                        let v = if matches!($op, BinOp::SetDiv) {
                            <$t as SimPolicy>::div(cur, b)
                        } else {
                            <$t as SimPolicy>::rem(cur, b)
                        };
                        match v {
                            Ok(v) => v,
                            Err(_) => {
                                $self.throw_error("divide by zero");
                                return Cell::ZERO;
                            }
                        }
                    }
                    BinOp::SetBinAnd => <$t as IntPolicy>::band(cur, b),
                    BinOp::SetBinOr => <$t as IntPolicy>::bor(cur, b),
                    BinOp::SetBinXor => <$t as IntPolicy>::bxor(cur, b),
                    BinOp::SetShl => <$t as IntPolicy>::shl(cur, b),
                    _ => <$t as IntPolicy>::shr(cur, b),
                };
                $self
                    .region
                    .write_value(p.0, v.into_cell(), size_of::<$t>() as u32);
                Cell::ZERO
            }
            _ => Cell::ZERO,
        }
    }};
}

impl Context<'_> {
    pub(crate) fn local_addr(&self, offset: u32) -> u32 {
        self.region.stack_top() + offset
    }

    pub(crate) fn arg_addr(&self, index: u32) -> u32 {
        self.abi_arguments().0 + index * CELL_SIZE
    }

    /// Reads the pointer stored in a frame slot.
    pub(crate) fn read_slot_ptr(&self, offset: u32) -> Ptr {
        Ptr::from_cell(self.region.read_value(self.local_addr(offset), 4))
    }

    typed_eval!(eval_int, i32, ValueKind::Int);
    typed_eval!(eval_uint, u32, ValueKind::UInt);
    typed_eval!(eval_int64, i64, ValueKind::Int64);
    typed_eval!(eval_uint64, u64, ValueKind::UInt64);
    typed_eval!(eval_float, f32, ValueKind::Float);

    pub(crate) fn eval_bool(&mut self, id: NodeId) -> bool {
        let node = self.program.node(id);
        match &node.kind {
            NodeKind::Const(c) => bool::from_cell(*c),
            NodeKind::BoolAnd { l, r } => self.bool_and(*l, *r),
            NodeKind::BoolOr { l, r } => self.bool_or(*l, *r),
            NodeKind::GetLocalR2V { offset, ty } if *ty == ValueKind::Bool => {
                bool::from_cell(self.region.read_value(self.local_addr(*offset), 1))
            }
            NodeKind::GetArgument { index } => {
                bool::from_cell(self.region.read_cell(self.arg_addr(*index)))
            }
            NodeKind::Op1 { op: UnOp::BoolNot, ty: ValueKind::Bool, x } => {
                let v = self.eval_bool(*x);
                if self.stopped() {
                    return false;
                }
                !v
            }
            _ => bool::from_cell(self.eval_node(id)),
        }
    }

    pub(crate) fn eval_ptr(&mut self, id: NodeId) -> Ptr {
        let node = self.program.node(id);
        match &node.kind {
            NodeKind::GetLocal { offset } => Ptr(self.local_addr(*offset)),
            NodeKind::GetLocalRef { offset } => self.read_slot_ptr(*offset),
            NodeKind::GetArgumentRef { index } => Ptr(self.arg_addr(*index)),
            NodeKind::GetGlobal { index } => Ptr::from_cell(self.globals[index.0 as usize]),
            NodeKind::FieldDeref { value, offset } => {
                let p = self.eval_ptr(*value);
                if self.stopped() {
                    return Ptr::NULL;
                }
                p.offset(*offset)
            }
            _ => Ptr::from_cell(self.eval_node(id)),
        }
    }

    fn bool_and(&mut self, l: NodeId, r: NodeId) -> bool {
        // If the left side is false the right side never runs.
        if !self.eval_bool(l) {
            false
        } else if self.stopped() {
            false
        } else {
            self.eval_bool(r)
        }
    }

    fn bool_or(&mut self, l: NodeId, r: NodeId) -> bool {
        if self.eval_bool(l) {
            true
        } else if self.stopped() {
            false
        } else {
            self.eval_bool(r)
        }
    }

    /// Evaluates one node to a cell.
    #[allow(clippy::too_many_lines, reason = "one arm per node kind")]
    pub(crate) fn eval_node(&mut self, id: NodeId) -> Cell {
        let node = self.program.node(id);
        match &node.kind {
            NodeKind::Const(c) => *c,

            NodeKind::GetLocal { offset } => Ptr(self.local_addr(*offset)).into_cell(),
            NodeKind::GetLocalR2V { offset, ty } => self
                .region
                .read_value(self.local_addr(*offset), ty.size_bytes()),
            NodeKind::GetLocalRef { offset } => {
                self.region.read_value(self.local_addr(*offset), 4)
            }
            NodeKind::GetLocalRefR2V { offset, ty } => {
                let p = self.read_slot_ptr(*offset);
                self.region.read_value(p.0, ty.size_bytes())
            }
            NodeKind::InitLocal { offset, size } => {
                let at = self.local_addr(*offset);
                self.region.zero(at, *size);
                Cell::ZERO
            }

            NodeKind::GetArgument { index } => self.region.read_cell(self.arg_addr(*index)),
            NodeKind::GetArgumentRef { index } => Ptr(self.arg_addr(*index)).into_cell(),
            NodeKind::GetArgumentR2V { index, ty } => {
                let p = Ptr::from_cell(self.region.read_cell(self.arg_addr(*index)));
                self.region.read_value(p.0, ty.size_bytes())
            }

            NodeKind::GetBlockArgument { index, offset } => {
                let bp = self.read_slot_ptr(*offset);
                self.region.read_cell(bp.0 + *index * CELL_SIZE)
            }
            NodeKind::GetBlockArgumentR2V { index, offset, ty } => {
                let bp = self.read_slot_ptr(*offset);
                let p = Ptr::from_cell(self.region.read_cell(bp.0 + *index * CELL_SIZE));
                self.region.read_value(p.0, ty.size_bytes())
            }

            NodeKind::GetGlobal { index } => self.globals[index.0 as usize],
            NodeKind::GetGlobalR2V { index, ty } => {
                let p = Ptr::from_cell(self.globals[index.0 as usize]);
                self.region.read_value(p.0, ty.size_bytes())
            }

            NodeKind::FieldDeref { value, offset } => {
                let p = self.eval_ptr(*value);
                if self.stopped() {
                    return Cell::ZERO;
                }
                p.offset(*offset).into_cell()
            }
            NodeKind::FieldDerefR2V { value, offset, ty } => {
                let p = self.eval_ptr(*value);
                if self.stopped() {
                    return Cell::ZERO;
                }
                self.region.read_value(p.0 + *offset, ty.size_bytes())
            }
            NodeKind::PtrFieldDeref { value, offset } => {
                let p = self.eval_ptr(*value);
                if self.stopped() {
                    return Cell::ZERO;
                }
                if p.is_null() {
                    self.throw_error("dereferencing null pointer");
                    return Cell::ZERO;
                }
                p.offset(*offset).into_cell()
            }
            NodeKind::PtrFieldDerefR2V { value, offset, ty } => {
                let p = self.eval_ptr(*value);
                if self.stopped() {
                    return Cell::ZERO;
                }
                if p.is_null() {
                    self.throw_error("dereferencing null pointer");
                    return Cell::ZERO;
                }
                self.region.read_value(p.0 + *offset, ty.size_bytes())
            }
            NodeKind::SafeFieldDeref { value, offset } => {
                let p = self.eval_ptr(*value);
                if self.stopped() || p.is_null() {
                    return Cell::ZERO;
                }
                p.offset(*offset).into_cell()
            }
            NodeKind::SafeFieldDerefPtr { value, offset } => {
                let p = self.eval_ptr(*value);
                if self.stopped() || p.is_null() {
                    return Cell::ZERO;
                }
                self.region.read_value(p.0 + *offset, 4)
            }

            NodeKind::At { value, index, stride, range } => {
                let p = self.eval_ptr(*value);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let idx = self.eval_uint(*index);
                if self.stopped() {
                    return Cell::ZERO;
                }
                if idx >= *range {
                    self.throw_error("index out of range");
                    return Cell::ZERO;
                }
                p.offset(idx * stride).into_cell()
            }

            NodeKind::Ref2Value { subexpr, ty } => {
                let p = self.eval_ptr(*subexpr);
                if self.stopped() {
                    return Cell::ZERO;
                }
                self.region.read_value(p.0, ty.size_bytes())
            }
            NodeKind::Ptr2Ref { subexpr } => {
                let p = self.eval_ptr(*subexpr);
                if self.stopped() {
                    return Cell::ZERO;
                }
                if p.is_null() {
                    self.throw_error("dereferencing null pointer");
                    return Cell::ZERO;
                }
                p.into_cell()
            }
            NodeKind::NullCoalescing { subexpr, default, ty } => {
                let p = self.eval_ptr(*subexpr);
                if self.stopped() {
                    return Cell::ZERO;
                }
                if p.is_null() {
                    self.eval_node(*default)
                } else {
                    self.region.read_value(p.0, ty.size_bytes())
                }
            }
            NodeKind::NullCoalescingRef { subexpr, default } => {
                let p = self.eval_ptr(*subexpr);
                if self.stopped() {
                    return Cell::ZERO;
                }
                if p.is_null() {
                    self.eval_ptr(*default).into_cell()
                } else {
                    p.into_cell()
                }
            }

            NodeKind::CopyValue { left, right, ty } => {
                let p = self.eval_ptr(*left);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let v = self.eval_node(*right);
                if self.stopped() {
                    return Cell::ZERO;
                }
                self.region.write_value(p.0, v, ty.size_bytes());
                Cell::ZERO
            }
            NodeKind::CopyRefValue { left, right, size } => {
                let dst = self.eval_ptr(*left);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let src = self.eval_ptr(*right);
                if self.stopped() {
                    return Cell::ZERO;
                }
                self.region.copy(dst, src, *size);
                Cell::ZERO
            }
            NodeKind::MoveRefValue { left, right, size } => {
                let dst = self.eval_ptr(*left);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let src = self.eval_ptr(*right);
                if self.stopped() {
                    return Cell::ZERO;
                }
                self.region.copy(dst, src, *size);
                self.region.zero(src.0, *size);
                Cell::ZERO
            }

            NodeKind::Block { list } => {
                for n in list {
                    self.eval_node(*n);
                    if self.stopped() {
                        break;
                    }
                }
                Cell::ZERO
            }
            NodeKind::ClosureBlock { list, need_result, .. } => {
                for n in list {
                    self.eval_node(*n);
                    if self.stopped() {
                        break;
                    }
                }
                if *need_result {
                    self.abi_result()
                } else {
                    Cell::ZERO
                }
            }
            NodeKind::Let { list, subexpr } => {
                for n in list {
                    self.eval_node(*n);
                    if self.stopped() {
                        return Cell::ZERO;
                    }
                }
                match subexpr {
                    Some(s) => self.eval_node(*s),
                    None => Cell::ZERO,
                }
            }

            NodeKind::IfThenElse { cond, if_true, if_false } => {
                let c = self.eval_bool(*cond);
                if self.stopped() {
                    return Cell::ZERO;
                }
                if c {
                    self.eval_node(*if_true)
                } else if let Some(f) = if_false {
                    self.eval_node(*f)
                } else {
                    Cell::ZERO
                }
            }
            NodeKind::While { cond, body } => {
                loop {
                    let c = self.eval_bool(*cond);
                    if self.stopped() || !c {
                        break;
                    }
                    self.eval_node(*body);
                    if self.stopped() {
                        break;
                    }
                }
                // Break terminates the loop but does not propagate.
                self.stop.remove(StopFlags::BREAK);
                Cell::ZERO
            }
            NodeKind::For { sources, slots, body } => self.eval_for(sources, slots, *body),

            NodeKind::Break => {
                self.stop.insert(StopFlags::BREAK);
                Cell::ZERO
            }
            NodeKind::Return { subexpr } => {
                if let Some(s) = subexpr {
                    let v = self.eval_node(*s);
                    self.set_abi_result(v);
                }
                self.stop.insert(StopFlags::RETURN);
                Cell::ZERO
            }
            NodeKind::Yield { subexpr } => {
                let v = self.eval_node(*subexpr);
                self.set_abi_result(v);
                self.stop.insert(StopFlags::RETURN);
                Cell::ZERO
            }
            NodeKind::TryCatch { try_block, catch_block } => {
                self.eval_node(*try_block);
                if self.stop.contains(StopFlags::THROW)
                    && !self.stop.contains(StopFlags::TERMINATE)
                {
                    self.stop.remove(StopFlags::THROW);
                    self.exception = None;
                    self.eval_node(*catch_block);
                }
                Cell::ZERO
            }

            NodeKind::Call { func, args } => {
                let argp = self.eval_args_to_scratch(args);
                if self.stopped() {
                    return Cell::ZERO;
                }
                self.call_with_args(*func, argp, node.at.line)
            }
            NodeKind::Invoke { block, args } => {
                let b = self.eval_node(*block);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let desc = BlockDescriptor::from_cell(b);
                let argp = self.eval_args_to_scratch(args);
                if self.stopped() {
                    return Cell::ZERO;
                }
                self.invoke_with_args(desc, argp)
            }
            NodeKind::HostCall { symbol, args } => self.eval_host_call(*symbol, args),
            NodeKind::MakeBlock { body, args_slot } => BlockDescriptor {
                body: *body,
                frame_base: self.region.stack_top(),
                args_slot: *args_slot,
            }
            .into_cell(),

            NodeKind::Cast { subexpr, from, to } => {
                let v = self.eval_node(*subexpr);
                if self.stopped() {
                    return Cell::ZERO;
                }
                cast_numeric(v, *from, *to)
            }
            NodeKind::LexicalCast { subexpr, ty } => {
                let v = self.eval_node(*subexpr);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let text = lexical_text(v, *ty);
                self.region.allocate_name(&text).into_cell()
            }
            NodeKind::VecCtorFloat { args } => {
                let mut out = Cell::ZERO;
                for (i, a) in args.iter().enumerate() {
                    let v = self.eval_float(*a);
                    if self.stopped() {
                        return Cell::ZERO;
                    }
                    out.set_f32_lane(i, v);
                }
                out
            }
            NodeKind::VecCtorInt { args } => {
                let mut out = Cell::ZERO;
                for (i, a) in args.iter().enumerate() {
                    let v = self.eval_int(*a);
                    if self.stopped() {
                        return Cell::ZERO;
                    }
                    out.set_i32_lane(i, v);
                }
                out
            }
            NodeKind::New { bytes } => {
                let p = self.region.allocate(*bytes);
                self.region.zero(p.0, *bytes);
                p.into_cell()
            }
            NodeKind::Debug { subexpr, type_info, message } => {
                let v = self.eval_node(*subexpr);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let ti = self.program.type_info(*type_info);
                let text = {
                    let rendered = render_value(&self.region, ti.ty, v);
                    match message {
                        Some(m) => {
                            format!("{} {} = {rendered}", self.region.name_str(*m), ti.ty.name())
                        }
                        None => format!("{} = {rendered}", ti.ty.name()),
                    }
                };
                self.host.to_out(&text);
                v
            }
            NodeKind::Assert { subexpr, message } => {
                let ok = self.eval_bool(*subexpr);
                if self.stopped() {
                    return Cell::ZERO;
                }
                if !ok {
                    let msg = {
                        let s = self.region.name_str(*message);
                        if s.is_empty() {
                            String::from("assert failed")
                        } else {
                            String::from(s)
                        }
                    };
                    self.throw_error(&msg);
                }
                Cell::ZERO
            }

            NodeKind::MakeRangeIterator { subexpr } => {
                let r = Range::from_cell(self.eval_node(*subexpr));
                if self.stopped() {
                    return Cell::ZERO;
                }
                self.register_iterator(Box::new(RangeIterator::new(r)))
                    .into_cell()
            }
            NodeKind::MakeURangeIterator { subexpr } => {
                let r = URange::from_cell(self.eval_node(*subexpr));
                if self.stopped() {
                    return Cell::ZERO;
                }
                self.register_iterator(Box::new(URangeIterator::new(r)))
                    .into_cell()
            }
            NodeKind::MakeFixedArrayIterator { subexpr, stride, count } => {
                let p = self.eval_ptr(*subexpr);
                if self.stopped() {
                    return Cell::ZERO;
                }
                self.register_iterator(Box::new(FixedArrayIterator::new(p, *stride, *count)))
                    .into_cell()
            }

            NodeKind::Op1 { op, ty, x } => self.op1(*op, *ty, *x),
            NodeKind::Op2 { op, ty, l, r } => self.op2(*op, *ty, *l, *r),
            NodeKind::BoolAnd { l, r } => self.bool_and(*l, *r).into_cell(),
            NodeKind::BoolOr { l, r } => self.bool_or(*l, *r).into_cell(),
        }
    }

    fn eval_args_to_scratch(&mut self, args: &[NodeId]) -> Ptr {
        if args.is_empty() {
            return Ptr::NULL;
        }
        let argp = self.region.allocate(args.len() as u32 * CELL_SIZE);
        for (i, a) in args.iter().enumerate() {
            let v = self.eval_node(*a);
            if self.stopped() {
                return argp;
            }
            self.region.write_cell(argp.0 + i as u32 * CELL_SIZE, v);
        }
        argp
    }

    fn eval_host_call(&mut self, symbol: StrRef, args: &[NodeId]) -> Cell {
        let mut argv: Vec<Cell> = Vec::with_capacity(args.len());
        for a in args {
            let v = self.eval_node(*a);
            if self.stopped() {
                return Cell::ZERO;
            }
            argv.push(v);
        }
        let symbol = String::from(self.region.name_str(symbol));
        match self.host.intrinsic(&symbol, &argv) {
            Ok(HostValue::Cell(c)) => c,
            Ok(HostValue::Str(s)) => self.region.allocate_name(&s).into_cell(),
            Ok(HostValue::Iterator(it)) => self.register_iterator(it).into_cell(),
            Err(IntrinsicError::UnknownSymbol) => {
                let msg = format!("unknown intrinsic: {symbol}");
                self.throw_error(&msg);
                Cell::ZERO
            }
            Err(IntrinsicError::Failed(m)) => {
                self.throw_error(&m);
                Cell::ZERO
            }
            Err(IntrinsicError::Terminate) => {
                self.stop.insert(StopFlags::TERMINATE);
                Cell::ZERO
            }
        }
    }

    /// The lockstep multi-iterator loop.
    ///
    /// Every iterator obtained in the setup phase is closed exactly once,
    /// whichever way the loop exits.
    fn eval_for(&mut self, sources: &[NodeId], slots: &[u32], body: NodeId) -> Cell {
        let total = sources.len().min(MAX_FOR_ITERATORS);
        let mut slot_addr = [0u32; MAX_FOR_ITERATORS];
        for t in 0..total {
            slot_addr[t] = self.local_addr(slots[t]);
        }

        let mut iters: [Option<Box<dyn SimIterator>>; MAX_FOR_ITERATORS] =
            [const { None }; MAX_FOR_ITERATORS];
        let mut need_loop = true;
        for (t, source) in sources.iter().take(total).enumerate() {
            let cell = self.eval_node(*source);
            if self.stopped() {
                need_loop = false;
                break;
            }
            match self.take_iterator(IterRef::from_cell(cell)) {
                Some(it) => iters[t] = Some(it),
                None => {
                    self.throw_error("not an iterator");
                    need_loop = false;
                    break;
                }
            }
        }

        if need_loop {
            for it in iters.iter_mut().take(total) {
                let Some(it) = it.as_mut() else { break };
                need_loop = it.first(self) && need_loop;
                if self.stopped() {
                    need_loop = false;
                    break;
                }
            }
        }

        if need_loop {
            'iteration: loop {
                for (t, it) in iters.iter().take(total).enumerate() {
                    if let Some(it) = it.as_ref() {
                        let v = it.value();
                        self.region.write_cell(slot_addr[t], v);
                    }
                }
                self.eval_node(body);
                if self.stopped() {
                    break;
                }
                for it in iters.iter_mut().take(total) {
                    let Some(it) = it.as_mut() else {
                        break 'iteration;
                    };
                    if !it.next(self) {
                        break 'iteration;
                    }
                    if self.stopped() {
                        break 'iteration;
                    }
                }
            }
        }

        for it in iters.iter_mut().take(total) {
            if let Some(mut iterator) = it.take() {
                iterator.close(self);
            }
        }
        self.stop.remove(StopFlags::BREAK);
        Cell::ZERO
    }

    fn op1(&mut self, op: UnOp, ty: ValueKind, x: NodeId) -> Cell {
        match ty {
            ValueKind::Int => int_op1!(self, op, x, eval_int, i32),
            ValueKind::UInt => int_op1!(self, op, x, eval_uint, u32),
            ValueKind::Int64 => int_op1!(self, op, x, eval_int64, i64),
            ValueKind::UInt64 => int_op1!(self, op, x, eval_uint64, u64),
            ValueKind::Float => self.float_op1(op, x),
            ValueKind::Bool => {
                if matches!(op, UnOp::BoolNot) {
                    let v = self.eval_bool(x);
                    if self.stopped() {
                        return Cell::ZERO;
                    }
                    (!v).into_cell()
                } else {
                    Cell::ZERO
                }
            }
            _ => self.vec_op1(op, ty, x),
        }
    }

    fn float_op1(&mut self, op: UnOp, x: NodeId) -> Cell {
        match op {
            UnOp::Plus => {
                let v = self.eval_float(x);
                if self.stopped() {
                    return Cell::ZERO;
                }
                v.into_cell()
            }
            UnOp::Minus => {
                let v = self.eval_float(x);
                if self.stopped() {
                    return Cell::ZERO;
                }
                (-v).into_cell()
            }
            UnOp::Inc | UnOp::Dec | UnOp::IncPost | UnOp::DecPost => {
                let p = self.eval_ptr(x);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let cur = f32::from_cell(self.region.read_value(p.0, 4));
                let new = if matches!(op, UnOp::Inc | UnOp::IncPost) {
                    cur + 1.0
                } else {
                    cur - 1.0
                };
                self.region.write_value(p.0, new.into_cell(), 4);
                if matches!(op, UnOp::Inc | UnOp::Dec) {
                    new.into_cell()
                } else {
                    cur.into_cell()
                }
            }
            UnOp::BinNot | UnOp::BoolNot => Cell::ZERO,
        }
    }

    fn vec_op1(&mut self, op: UnOp, ty: ValueKind, x: NodeId) -> Cell {
        let Some((lane, lanes)) = vector_lanes(ty) else {
            return Cell::ZERO;
        };
        let v = self.eval_node(x);
        if self.stopped() {
            return Cell::ZERO;
        }
        match op {
            UnOp::Plus => v,
            UnOp::Minus => vec_neg(lane, lanes, v),
            _ => Cell::ZERO,
        }
    }

    fn op2(&mut self, op: BinOp, ty: ValueKind, l: NodeId, r: NodeId) -> Cell {
        match ty {
            ValueKind::Int => int_op2!(self, op, l, r, eval_int, i32),
            ValueKind::UInt => int_op2!(self, op, l, r, eval_uint, u32),
            ValueKind::Int64 => int_op2!(self, op, l, r, eval_int64, i64),
            ValueKind::UInt64 => int_op2!(self, op, l, r, eval_uint64, u64),
            ValueKind::Float => self.float_op2(op, l, r),
            ValueKind::Bool => self.bool_op2(op, l, r),
            ValueKind::Str => self.str_op2(op, l, r),
            ValueKind::Range | ValueKind::URange | ValueKind::Pointer | ValueKind::Block => {
                self.cell_eq_op2(op, l, r)
            }
            _ => self.vec_op2(op, ty, l, r),
        }
    }

    fn float_op2(&mut self, op: BinOp, l: NodeId, r: NodeId) -> Cell {
        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                let a = self.eval_float(l);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let b = self.eval_float(r);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let v = match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    _ => a % b,
                };
                v.into_cell()
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let a = self.eval_float(l);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let b = self.eval_float(r);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let v = match op {
                    BinOp::Eq => a == b,
                    BinOp::Ne => a != b,
                    BinOp::Lt => a < b,
                    BinOp::Le => a <= b,
                    BinOp::Gt => a > b,
                    _ => a >= b,
                };
                v.into_cell()
            }
            BinOp::SetAdd | BinOp::SetSub | BinOp::SetMul | BinOp::SetDiv | BinOp::SetMod => {
                let p = self.eval_ptr(l);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let b = self.eval_float(r);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let cur = f32::from_cell(self.region.read_value(p.0, 4));
                let v = match op {
                    BinOp::SetAdd => cur + b,
                    BinOp::SetSub => cur - b,
                    BinOp::SetMul => cur * b,
                    BinOp::SetDiv => cur / b,
                    _ => cur % b,
                };
                self.region.write_value(p.0, v.into_cell(), 4);
                Cell::ZERO
            }
            _ => Cell::ZERO,
        }
    }

    fn bool_op2(&mut self, op: BinOp, l: NodeId, r: NodeId) -> Cell {
        match op {
            BinOp::Eq | BinOp::Ne | BinOp::BoolXor => {
                let a = self.eval_bool(l);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let b = self.eval_bool(r);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let v = match op {
                    BinOp::Eq => a == b,
                    BinOp::Ne => a != b,
                    _ => a ^ b,
                };
                v.into_cell()
            }
            BinOp::SetBoolAnd | BinOp::SetBoolOr | BinOp::SetBoolXor => {
                let p = self.eval_ptr(l);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let b = self.eval_bool(r);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let cur = bool::from_cell(self.region.read_value(p.0, 1));
                let v = match op {
                    BinOp::SetBoolAnd => cur && b,
                    BinOp::SetBoolOr => cur || b,
                    _ => cur ^ b,
                };
                self.region.write_value(p.0, v.into_cell(), 1);
                Cell::ZERO
            }
            _ => Cell::ZERO,
        }
    }

    fn str_op2(&mut self, op: BinOp, l: NodeId, r: NodeId) -> Cell {
        match op {
            BinOp::Eq | BinOp::Ne => {
                let a = StrRef::from_cell(self.eval_node(l));
                if self.stopped() {
                    return Cell::ZERO;
                }
                let b = StrRef::from_cell(self.eval_node(r));
                if self.stopped() {
                    return Cell::ZERO;
                }
                let eq = self.region.name_str(a) == self.region.name_str(b);
                let v = if matches!(op, BinOp::Eq) { eq } else { !eq };
                v.into_cell()
            }
            _ => Cell::ZERO,
        }
    }

    fn cell_eq_op2(&mut self, op: BinOp, l: NodeId, r: NodeId) -> Cell {
        match op {
            BinOp::Eq | BinOp::Ne => {
                let a = self.eval_node(l);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let b = self.eval_node(r);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let eq = a == b;
                let v = if matches!(op, BinOp::Eq) { eq } else { !eq };
                v.into_cell()
            }
            _ => Cell::ZERO,
        }
    }

    fn vec_op2(&mut self, op: BinOp, ty: ValueKind, l: NodeId, r: NodeId) -> Cell {
        let Some((lane, lanes)) = vector_lanes(ty) else {
            return Cell::ZERO;
        };
        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                let a = self.eval_node(l);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let b = self.eval_node(r);
                if self.stopped() {
                    return Cell::ZERO;
                }
                self.vec_result(vec_binop(vec_op_of(op), lane, lanes, a, b))
            }
            BinOp::Eq | BinOp::Ne => {
                let a = self.eval_node(l);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let b = self.eval_node(r);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let eq = vec_eq(lane, lanes, a, b);
                let v = if matches!(op, BinOp::Eq) { eq } else { !eq };
                v.into_cell()
            }
            BinOp::MulVecScal | BinOp::DivVecScal => {
                let a = self.eval_node(l);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let b = self.eval_node(r);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let vop = if matches!(op, BinOp::MulVecScal) { VecOp::Mul } else { VecOp::Div };
                self.vec_result(vec_scalar_binop(vop, lane, lanes, a, b))
            }
            BinOp::MulScalVec | BinOp::DivScalVec => {
                let a = self.eval_node(l);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let b = self.eval_node(r);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let vop = if matches!(op, BinOp::MulScalVec) { VecOp::Mul } else { VecOp::Div };
                self.vec_result(scalar_vec_binop(vop, lane, lanes, a, b))
            }
            BinOp::SetAdd | BinOp::SetSub | BinOp::SetMul | BinOp::SetDiv | BinOp::SetMod => {
                let p = self.eval_ptr(l);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let b = self.eval_node(r);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let cur = self.region.read_value(p.0, ty.size_bytes());
                let v = vec_binop(set_vec_op_of(op), lane, lanes, cur, b);
                let v = match v {
                    Ok(v) => v,
                    Err(_) => {
                        self.throw_error("divide by zero");
                        return Cell::ZERO;
                    }
                };
                self.region.write_value(p.0, v, ty.size_bytes());
                Cell::ZERO
            }
            BinOp::SetMulScal | BinOp::SetDivScal => {
                let p = self.eval_ptr(l);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let b = self.eval_node(r);
                if self.stopped() {
                    return Cell::ZERO;
                }
                let cur = self.region.read_value(p.0, ty.size_bytes());
                let vop = if matches!(op, BinOp::SetMulScal) { VecOp::Mul } else { VecOp::Div };
                let v = match vec_scalar_binop(vop, lane, lanes, cur, b) {
                    Ok(v) => v,
                    Err(_) => {
                        self.throw_error("divide by zero");
                        return Cell::ZERO;
                    }
                };
                self.region.write_value(p.0, v, ty.size_bytes());
                Cell::ZERO
            }
            _ => Cell::ZERO,
        }
    }

    fn vec_result(&mut self, v: Result<Cell, crate::policy::ArithError>) -> Cell {
        match v {
            Ok(v) => v,
            Err(_) => {
                self.throw_error("divide by zero");
                Cell::ZERO
            }
        }
    }
}

const fn vec_op_of(op: BinOp) -> VecOp {
    match op {
        BinOp::Add => VecOp::Add,
        BinOp::Sub => VecOp::Sub,
        BinOp::Mul => VecOp::Mul,
        BinOp::Div => VecOp::Div,
        _ => VecOp::Rem,
    }
}

const fn set_vec_op_of(op: BinOp) -> VecOp {
    match op {
        BinOp::SetAdd => VecOp::Add,
        BinOp::SetSub => VecOp::Sub,
        BinOp::SetMul => VecOp::Mul,
        BinOp::SetDiv => VecOp::Div,
        _ => VecOp::Rem,
    }
}

fn cast_numeric(v: Cell, from: ValueKind, to: ValueKind) -> Cell {
    use ValueKind as K;
    macro_rules! cast_arms {
        ($x:expr) => {
            match to {
                K::Int => (($x) as i32).into_cell(),
                K::UInt => (($x) as u32).into_cell(),
                K::Int64 => (($x) as i64).into_cell(),
                K::UInt64 => (($x) as u64).into_cell(),
                K::Float => (($x) as f32).into_cell(),
                _ => Cell::ZERO,
            }
        };
    }
    match from {
        K::Int => cast_arms!(i32::from_cell(v)),
        K::UInt => cast_arms!(u32::from_cell(v)),
        K::Int64 => cast_arms!(i64::from_cell(v)),
        K::UInt64 => cast_arms!(u64::from_cell(v)),
        K::Float => cast_arms!(f32::from_cell(v)),
        K::Bool => cast_arms!(u32::from(bool::from_cell(v))),
        _ => Cell::ZERO,
    }
}

fn lexical_text(v: Cell, ty: ValueKind) -> String {
    match ty {
        ValueKind::Bool => format!("{}", bool::from_cell(v)),
        ValueKind::Int => format!("{}", i32::from_cell(v)),
        ValueKind::UInt => format!("{}", u32::from_cell(v)),
        ValueKind::Int64 => format!("{}", i64::from_cell(v)),
        ValueKind::UInt64 => format!("{}", u64::from_cell(v)),
        ValueKind::Float => format!("{}", f32::from_cell(v)),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::build::ProgramBuilder;
    use crate::cell::Int2;
    use crate::context::{Config, Context, PROLOGUE_BYTES};
    use crate::host::NullHost;
    use crate::program::{FuncId, LineInfo};

    const AT: LineInfo = LineInfo { line: 0, column: 0 };
    const L0: u32 = PROLOGUE_BYTES;

    fn run(pb: ProgramBuilder, entry: FuncId) -> Cell {
        let program = pb.finish().unwrap();
        let mut host = NullHost;
        let mut ctx = Context::new(&program, &mut host, Config::default());
        let out = ctx.call(entry, &[], 0);
        assert_eq!(ctx.get_exception(), None);
        out
    }

    #[test]
    fn numeric_casts_convert_between_kinds() {
        let mut pb = ProgramBuilder::new();
        let c = pb.node(NodeKind::Const((-3i32).into_cell()), AT);
        let as_float = pb.node(
            NodeKind::Cast { subexpr: c, from: ValueKind::Int, to: ValueKind::Float },
            AT,
        );
        let ret = pb.node(NodeKind::Return { subexpr: Some(as_float) }, AT);
        let f = pb.function("f", ret, PROLOGUE_BYTES).unwrap();
        let out = run(pb, f);
        assert_eq!(f32::from_cell(out), -3.0);

        let mut pb = ProgramBuilder::new();
        let c = pb.node(NodeKind::Const(2.9f32.into_cell()), AT);
        let as_int = pb.node(
            NodeKind::Cast { subexpr: c, from: ValueKind::Float, to: ValueKind::Int },
            AT,
        );
        let ret = pb.node(NodeKind::Return { subexpr: Some(as_int) }, AT);
        let f = pb.function("f", ret, PROLOGUE_BYTES).unwrap();
        let out = run(pb, f);
        assert_eq!(i32::from_cell(out), 2);
    }

    #[test]
    fn new_storage_reads_back_through_field_nodes() {
        // let p = new(32); p.8 = 5; return p.8
        let mut pb = ProgramBuilder::new();
        let init = pb.node(NodeKind::InitLocal { offset: L0, size: 4 }, AT);
        let slot = pb.node(NodeKind::GetLocal { offset: L0 }, AT);
        let fresh = pb.node(NodeKind::New { bytes: 32 }, AT);
        let hold = pb.node(
            NodeKind::CopyValue { left: slot, right: fresh, ty: ValueKind::Pointer },
            AT,
        );
        let base = pb.node(NodeKind::GetLocalRef { offset: L0 }, AT);
        let field = pb.node(NodeKind::FieldDeref { value: base, offset: 8 }, AT);
        let five = pb.node(NodeKind::Const(5i32.into_cell()), AT);
        let store = pb.node(
            NodeKind::CopyValue { left: field, right: five, ty: ValueKind::Int },
            AT,
        );
        let base2 = pb.node(NodeKind::GetLocalRef { offset: L0 }, AT);
        let load = pb.node(
            NodeKind::FieldDerefR2V { value: base2, offset: 8, ty: ValueKind::Int },
            AT,
        );
        let ret = pb.node(NodeKind::Return { subexpr: Some(load) }, AT);
        let body = pb.node(
            NodeKind::Let { list: vec![init, hold, store], subexpr: Some(ret) },
            AT,
        );
        let f = pb.function("f", body, PROLOGUE_BYTES + 16).unwrap();
        assert_eq!(i32::from_cell(run(pb, f)), 5);
    }

    #[test]
    fn vector_arithmetic_is_elementwise_over_cells() {
        let mut pb = ProgramBuilder::new();
        let a = pb.node(NodeKind::Const(Int2 { x: 6, y: 9 }.into_cell()), AT);
        let b = pb.node(NodeKind::Const(Int2 { x: 3, y: 3 }.into_cell()), AT);
        let div = pb.node(
            NodeKind::Op2 { op: BinOp::Div, ty: ValueKind::Int2, l: a, r: b },
            AT,
        );
        let ret = pb.node(NodeKind::Return { subexpr: Some(div) }, AT);
        let f = pb.function("f", ret, PROLOGUE_BYTES).unwrap();
        assert_eq!(Int2::from_cell(run(pb, f)), Int2 { x: 2, y: 3 });
    }

    #[test]
    fn vector_division_by_zero_lane_throws() {
        let mut pb = ProgramBuilder::new();
        let a = pb.node(NodeKind::Const(Int2 { x: 6, y: 9 }.into_cell()), AT);
        let b = pb.node(NodeKind::Const(Int2 { x: 3, y: 0 }.into_cell()), AT);
        let div = pb.node(
            NodeKind::Op2 { op: BinOp::Div, ty: ValueKind::Int2, l: a, r: b },
            AT,
        );
        let ret = pb.node(NodeKind::Return { subexpr: Some(div) }, AT);
        let f = pb.function("f", ret, PROLOGUE_BYTES).unwrap();
        let program = pb.finish().unwrap();
        let mut host = NullHost;
        let mut ctx = Context::new(&program, &mut host, Config::default());
        let out = ctx.call(f, &[], 0);
        assert_eq!(out, Cell::ZERO);
        assert_eq!(ctx.get_exception(), Some("divide by zero"));
    }

    #[test]
    fn shift_counts_wrap_in_node_arithmetic() {
        let mut pb = ProgramBuilder::new();
        let one = pb.node(NodeKind::Const(1u32.into_cell()), AT);
        let count = pb.node(NodeKind::Const(33u32.into_cell()), AT);
        let shl = pb.node(
            NodeKind::Op2 { op: BinOp::Shl, ty: ValueKind::UInt, l: one, r: count },
            AT,
        );
        let ret = pb.node(NodeKind::Return { subexpr: Some(shl) }, AT);
        let f = pb.function("f", ret, PROLOGUE_BYTES).unwrap();
        assert_eq!(u32::from_cell(run(pb, f)), 2);
    }
}
