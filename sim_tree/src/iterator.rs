// Copyright 2026 the Sim Tree Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The iterator protocol driving `for` loops.
//!
//! An iterator is anything implementing [`SimIterator`]: a `first`/`next`/
//! `close` triple plus a `value` accessor for the current element cell.
//! The engine composes up to [`crate::program::MAX_FOR_ITERATORS`] of them
//! in lockstep and guarantees that every iterator it obtained is closed
//! exactly once, on every exit path.
//!
//! Iterators are registered with the context and travel through cells as
//! opaque [`IterRef`] handles, so host intrinsics can hand out custom
//! iterators with no special plumbing.

use crate::cell::{Cell, CellCast, Ptr, Range, URange};
use crate::context::Context;

/// A cell-borne handle to a registered iterator. 0 is the null handle.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct IterRef(pub u32);

impl IterRef {
    /// The null handle.
    pub const NULL: Self = Self(0);

    /// Returns `true` for the null handle.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl CellCast for IterRef {
    fn from_cell(cell: Cell) -> Self {
        Self(u32::from_cell(cell))
    }

    fn into_cell(self) -> Cell {
        self.0.into_cell()
    }
}

/// One iterable source of a `for` loop.
///
/// `first` positions the iterator on its first element and returns whether
/// one exists; `next` advances and returns whether an element remains;
/// `value` reads the current element cell and is meaningful only after
/// `first`/`next` returned `true`. `close` must be safe on every exit path
/// and must not throw.
pub trait SimIterator {
    /// Positions on the first element.
    fn first(&mut self, ctx: &mut Context<'_>) -> bool;

    /// Advances to the next element.
    fn next(&mut self, ctx: &mut Context<'_>) -> bool;

    /// Releases whatever the iterator holds.
    fn close(&mut self, ctx: &mut Context<'_>);

    /// The current element cell.
    fn value(&self) -> Cell;
}

/// Iterates a signed half-open range, yielding `int` cells.
#[derive(Copy, Clone, Debug)]
pub struct RangeIterator {
    range: Range,
    current: i32,
}

impl RangeIterator {
    /// Creates an iterator over `range`.
    #[must_use]
    pub fn new(range: Range) -> Self {
        Self { range, current: range.from }
    }
}

impl SimIterator for RangeIterator {
    fn first(&mut self, _ctx: &mut Context<'_>) -> bool {
        self.current = self.range.from;
        self.current < self.range.to
    }

    fn next(&mut self, _ctx: &mut Context<'_>) -> bool {
        self.current += 1;
        self.current < self.range.to
    }

    fn close(&mut self, _ctx: &mut Context<'_>) {}

    fn value(&self) -> Cell {
        self.current.into_cell()
    }
}

/// Iterates an unsigned half-open range, yielding `uint` cells.
#[derive(Copy, Clone, Debug)]
pub struct URangeIterator {
    range: URange,
    current: u32,
}

impl URangeIterator {
    /// Creates an iterator over `range`.
    #[must_use]
    pub fn new(range: URange) -> Self {
        Self { range, current: range.from }
    }
}

impl SimIterator for URangeIterator {
    fn first(&mut self, _ctx: &mut Context<'_>) -> bool {
        self.current = self.range.from;
        self.current < self.range.to
    }

    fn next(&mut self, _ctx: &mut Context<'_>) -> bool {
        self.current += 1;
        self.current < self.range.to
    }

    fn close(&mut self, _ctx: &mut Context<'_>) {}

    fn value(&self) -> Cell {
        self.current.into_cell()
    }
}

/// Iterates a fixed array, yielding the address of each element.
///
/// The loop slot receives a reference; bodies read elements through
/// ref-to-value nodes.
#[derive(Copy, Clone, Debug)]
pub struct FixedArrayIterator {
    base: Ptr,
    stride: u32,
    count: u32,
    index: u32,
}

impl FixedArrayIterator {
    /// Creates an iterator over `count` elements of `stride` bytes at
    /// `base`.
    #[must_use]
    pub fn new(base: Ptr, stride: u32, count: u32) -> Self {
        Self { base, stride, count, index: 0 }
    }
}

impl SimIterator for FixedArrayIterator {
    fn first(&mut self, _ctx: &mut Context<'_>) -> bool {
        self.index = 0;
        self.count > 0 && !self.base.is_null()
    }

    fn next(&mut self, _ctx: &mut Context<'_>) -> bool {
        self.index += 1;
        self.index < self.count
    }

    fn close(&mut self, _ctx: &mut Context<'_>) {}

    fn value(&self) -> Cell {
        self.base.offset(self.index * self.stride).into_cell()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Config, Context};
    use crate::host::NullHost;
    use crate::program::Program;

    fn drain(it: &mut dyn SimIterator, ctx: &mut Context<'_>) -> alloc::vec::Vec<Cell> {
        let mut out = alloc::vec::Vec::new();
        if it.first(ctx) {
            loop {
                out.push(it.value());
                if !it.next(ctx) {
                    break;
                }
            }
        }
        it.close(ctx);
        out
    }

    #[test]
    fn range_iterator_walks_the_half_open_interval() {
        let program = Program::default();
        let mut host = NullHost;
        let mut ctx = Context::new(&program, &mut host, Config::default());

        let mut it = RangeIterator::new(Range { from: 1, to: 5 });
        let values = drain(&mut it, &mut ctx);
        let ints: alloc::vec::Vec<i32> = values.into_iter().map(i32::from_cell).collect();
        assert_eq!(ints, [1, 2, 3, 4]);

        let mut empty = RangeIterator::new(Range { from: 3, to: 3 });
        assert!(!empty.first(&mut ctx));
    }

    #[test]
    fn fixed_array_iterator_yields_element_addresses() {
        let program = Program::default();
        let mut host = NullHost;
        let mut ctx = Context::new(&program, &mut host, Config::default());

        let mut it = FixedArrayIterator::new(Ptr(64), 4, 3);
        let values = drain(&mut it, &mut ctx);
        let ptrs: alloc::vec::Vec<u32> =
            values.into_iter().map(|v| Ptr::from_cell(v).0).collect();
        assert_eq!(ptrs, [64, 68, 72]);

        let mut hollow = FixedArrayIterator::new(Ptr::NULL, 4, 3);
        assert!(!hollow.first(&mut ctx));
    }
}
