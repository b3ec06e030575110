// Copyright 2026 the Sim Tree Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Operator policies: the exact arithmetic of every operation in every
//! supported numeric type.
//!
//! Integer arithmetic wraps (two's complement); integer division and
//! modulo report [`ArithError::DivideByZero`] instead of producing
//! undefined results; float division follows IEEE-754; shift counts are
//! taken modulo the operand width. The node layer extracts operands in
//! the natural type, forwards here, and re-boxes the result.

use crate::cell::{Cell, ValueKind};

/// An arithmetic fault reported by a policy.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ArithError {
    /// Integer `/` or `%` with a zero right-hand side.
    DivideByZero,
}

/// Arithmetic shared by every scalar numeric type.
pub(crate) trait SimPolicy: Copy + PartialEq + PartialOrd {
    fn add(a: Self, b: Self) -> Self;
    fn sub(a: Self, b: Self) -> Self;
    fn mul(a: Self, b: Self) -> Self;
    fn div(a: Self, b: Self) -> Result<Self, ArithError>;
    fn rem(a: Self, b: Self) -> Result<Self, ArithError>;
    fn neg(a: Self) -> Self;
    fn one() -> Self;
}

/// Bitwise operations, integers only.
pub(crate) trait IntPolicy: SimPolicy {
    fn band(a: Self, b: Self) -> Self;
    fn bor(a: Self, b: Self) -> Self;
    fn bxor(a: Self, b: Self) -> Self;
    fn shl(a: Self, b: Self) -> Self;
    fn shr(a: Self, b: Self) -> Self;
    fn bnot(a: Self) -> Self;
}

macro_rules! int_policy {
    ($t:ty) => {
        impl SimPolicy for $t {
            fn add(a: Self, b: Self) -> Self {
                a.wrapping_add(b)
            }

            fn sub(a: Self, b: Self) -> Self {
                a.wrapping_sub(b)
            }

            fn mul(a: Self, b: Self) -> Self {
                a.wrapping_mul(b)
            }

            fn div(a: Self, b: Self) -> Result<Self, ArithError> {
                if b == 0 {
                    Err(ArithError::DivideByZero)
                } else {
                    Ok(a.wrapping_div(b))
                }
            }

            fn rem(a: Self, b: Self) -> Result<Self, ArithError> {
                if b == 0 {
                    Err(ArithError::DivideByZero)
                } else {
                    Ok(a.wrapping_rem(b))
                }
            }

            fn neg(a: Self) -> Self {
                a.wrapping_neg()
            }

            fn one() -> Self {
                1
            }
        }

        impl IntPolicy for $t {
            fn band(a: Self, b: Self) -> Self {
                a & b
            }

            fn bor(a: Self, b: Self) -> Self {
                a | b
            }

            fn bxor(a: Self, b: Self) -> Self {
                a ^ b
            }

            fn shl(a: Self, b: Self) -> Self {
                // wrapping_shl masks the count by the operand width.
                a.wrapping_shl(b as u32)
            }

            fn shr(a: Self, b: Self) -> Self {
                a.wrapping_shr(b as u32)
            }

            fn bnot(a: Self) -> Self {
                !a
            }
        }
    };
}

int_policy!(i32);
int_policy!(u32);
int_policy!(i64);
int_policy!(u64);

impl SimPolicy for f32 {
    fn add(a: Self, b: Self) -> Self {
        a + b
    }

    fn sub(a: Self, b: Self) -> Self {
        a - b
    }

    fn mul(a: Self, b: Self) -> Self {
        a * b
    }

    fn div(a: Self, b: Self) -> Result<Self, ArithError> {
        // IEEE-754: infinity/NaN, never an exception.
        Ok(a / b)
    }

    fn rem(a: Self, b: Self) -> Result<Self, ArithError> {
        Ok(a % b)
    }

    fn neg(a: Self) -> Self {
        -a
    }

    fn one() -> Self {
        1.0
    }
}

/// Per-lane element type of a vector kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum LaneKind {
    I32,
    U32,
    F32,
}

/// Lane layout of a vector kind, or `None` for scalars.
pub(crate) fn vector_lanes(ty: ValueKind) -> Option<(LaneKind, usize)> {
    match ty {
        ValueKind::Int2 => Some((LaneKind::I32, 2)),
        ValueKind::Int3 => Some((LaneKind::I32, 3)),
        ValueKind::Int4 => Some((LaneKind::I32, 4)),
        ValueKind::UInt2 => Some((LaneKind::U32, 2)),
        ValueKind::UInt3 => Some((LaneKind::U32, 3)),
        ValueKind::UInt4 => Some((LaneKind::U32, 4)),
        ValueKind::Float2 => Some((LaneKind::F32, 2)),
        ValueKind::Float3 => Some((LaneKind::F32, 3)),
        ValueKind::Float4 => Some((LaneKind::F32, 4)),
        _ => None,
    }
}

/// An elementwise vector operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum VecOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

fn lane_apply<T: SimPolicy>(op: VecOp, a: T, b: T) -> Result<T, ArithError> {
    match op {
        VecOp::Add => Ok(T::add(a, b)),
        VecOp::Sub => Ok(T::sub(a, b)),
        VecOp::Mul => Ok(T::mul(a, b)),
        VecOp::Div => T::div(a, b),
        VecOp::Rem => T::rem(a, b),
    }
}

/// Elementwise `a op b` over two equally-shaped vectors.
pub(crate) fn vec_binop(
    op: VecOp,
    lane: LaneKind,
    lanes: usize,
    a: Cell,
    b: Cell,
) -> Result<Cell, ArithError> {
    let mut out = Cell::ZERO;
    for i in 0..lanes {
        match lane {
            LaneKind::I32 => {
                out.set_i32_lane(i, lane_apply(op, a.i32_lane(i), b.i32_lane(i))?);
            }
            LaneKind::U32 => {
                out.set_u32_lane(i, lane_apply(op, a.u32_lane(i), b.u32_lane(i))?);
            }
            LaneKind::F32 => {
                out.set_f32_lane(i, lane_apply(op, a.f32_lane(i), b.f32_lane(i))?);
            }
        }
    }
    Ok(out)
}

/// Elementwise `a op scalar` (the scalar sits in lane 0 of `b`).
pub(crate) fn vec_scalar_binop(
    op: VecOp,
    lane: LaneKind,
    lanes: usize,
    a: Cell,
    b: Cell,
) -> Result<Cell, ArithError> {
    vec_binop(op, lane, lanes, a, splat(lane, lanes, b))
}

/// Elementwise `scalar op b` (the scalar sits in lane 0 of `a`).
pub(crate) fn scalar_vec_binop(
    op: VecOp,
    lane: LaneKind,
    lanes: usize,
    a: Cell,
    b: Cell,
) -> Result<Cell, ArithError> {
    vec_binop(op, lane, lanes, splat(lane, lanes, a), b)
}

fn splat(lane: LaneKind, lanes: usize, v: Cell) -> Cell {
    let mut out = Cell::ZERO;
    for i in 0..lanes {
        match lane {
            LaneKind::I32 => out.set_i32_lane(i, v.i32_lane(0)),
            LaneKind::U32 => out.set_u32_lane(i, v.u32_lane(0)),
            LaneKind::F32 => out.set_f32_lane(i, v.f32_lane(0)),
        }
    }
    out
}

/// Lanewise equality (float lanes compare by IEEE `==`).
pub(crate) fn vec_eq(lane: LaneKind, lanes: usize, a: Cell, b: Cell) -> bool {
    (0..lanes).all(|i| match lane {
        LaneKind::I32 => a.i32_lane(i) == b.i32_lane(i),
        LaneKind::U32 => a.u32_lane(i) == b.u32_lane(i),
        LaneKind::F32 => a.f32_lane(i) == b.f32_lane(i),
    })
}

/// Elementwise negation.
pub(crate) fn vec_neg(lane: LaneKind, lanes: usize, a: Cell) -> Cell {
    let mut out = Cell::ZERO;
    for i in 0..lanes {
        match lane {
            LaneKind::I32 => out.set_i32_lane(i, a.i32_lane(i).wrapping_neg()),
            LaneKind::U32 => out.set_u32_lane(i, a.u32_lane(i).wrapping_neg()),
            LaneKind::F32 => out.set_f32_lane(i, -a.f32_lane(i)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{CellCast, Float3, Int2};

    #[test]
    fn integer_arithmetic_wraps() {
        assert_eq!(<i32 as SimPolicy>::add(i32::MAX, 1), i32::MIN);
        assert_eq!(<u32 as SimPolicy>::sub(0, 1), u32::MAX);
        assert_eq!(<i64 as SimPolicy>::mul(i64::MAX, 2), -2);
        assert_eq!(<i32 as SimPolicy>::div(i32::MIN, -1), Ok(i32::MIN));
    }

    #[test]
    fn add_then_sub_restores_except_at_wraparound() {
        for (a, b) in [(5i32, 9), (i32::MAX, 1), (-70, i32::MIN)] {
            let sum = <i32 as SimPolicy>::add(a, b);
            assert_eq!(<i32 as SimPolicy>::sub(sum, b), a);
        }
    }

    #[test]
    fn divide_by_zero_is_reported() {
        assert_eq!(<i32 as SimPolicy>::div(10, 0), Err(ArithError::DivideByZero));
        assert_eq!(<u64 as SimPolicy>::rem(10, 0), Err(ArithError::DivideByZero));
        // Floats follow IEEE instead.
        assert_eq!(<f32 as SimPolicy>::div(1.0, 0.0), Ok(f32::INFINITY));
    }

    #[test]
    fn shift_counts_wrap_to_operand_width() {
        assert_eq!(<u32 as IntPolicy>::shl(1, 33), 2);
        assert_eq!(<u64 as IntPolicy>::shl(1, 65), 2);
        assert_eq!(<i32 as IntPolicy>::shr(-8, 1), -4);
    }

    #[test]
    fn vector_ops_are_elementwise() {
        let a = Int2 { x: 6, y: 9 }.into_cell();
        let b = Int2 { x: 3, y: 3 }.into_cell();
        let sum = vec_binop(VecOp::Div, LaneKind::I32, 2, a, b).unwrap();
        assert_eq!(Int2::from_cell(sum), Int2 { x: 2, y: 3 });

        let v = Float3 { x: 2.0, y: 4.0, z: 8.0 }.into_cell();
        let s = 2.0f32.into_cell();
        let halved = vec_scalar_binop(VecOp::Div, LaneKind::F32, 3, v, s).unwrap();
        assert_eq!(Float3::from_cell(halved), Float3 { x: 1.0, y: 2.0, z: 4.0 });

        let zero = Int2 { x: 1, y: 0 }.into_cell();
        assert_eq!(
            vec_binop(VecOp::Div, LaneKind::I32, 2, a, zero),
            Err(ArithError::DivideByZero)
        );
    }
}
